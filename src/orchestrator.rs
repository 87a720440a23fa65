//! Runs accounts one after another and isolates failures.
//!
//! A login failure abandons its account; anything that goes wrong while
//! working a single UC is logged, dumped and left behind while the loop moves
//! on to the next UC.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::debug::{DebugArtifact, DebugRecorder};
use crate::downstream::DownstreamReport;
use crate::eligibility::eligible_targets;
use crate::error::{Error, Result};
use crate::models::{Account, ProcessingState, UcCode};
use crate::portal::{InvoiceView, NavState, Portal, PortalSession};
use crate::storage::{DedupStore, StorageObjectKey};

#[derive(Debug, Clone, Serialize)]
pub struct UcFailure {
    pub uc: String,
    pub kind: &'static str,
    pub error: String,
    pub debug: DebugArtifact,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub eligible: Vec<String>,
    /// Storage keys written this run.
    pub uploaded: Vec<String>,
    /// UCs whose invoice was already in storage.
    pub already_stored: Vec<String>,
    /// UCs for which the portal reported no invoice.
    pub no_invoice: Vec<String>,
    pub failed: Vec<UcFailure>,
    /// Eligible UCs still not done when the account ended.
    pub unresolved: Vec<String>,
    pub pages_visited: usize,
    pub end_state: Option<NavState>,
    /// Error that ended the account early (login, list, browser).
    pub fatal: Option<String>,
}

impl AccountReport {
    fn new(account: &Account) -> Self {
        Self {
            account: account.name.clone(),
            eligible: Vec::new(),
            uploaded: Vec::new(),
            already_stored: Vec::new(),
            no_invoice: Vec::new(),
            failed: Vec::new(),
            unresolved: Vec::new(),
            pages_visited: 0,
            end_state: None,
            fatal: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub month: String,
    pub date: NaiveDate,
    pub accounts: Vec<AccountReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream: Option<DownstreamReport>,
}

impl RunReport {
    pub fn uploaded_count(&self) -> usize {
        self.accounts.iter().map(|a| a.uploaded.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.accounts.iter().map(|a| a.failed.len()).sum()
    }

    pub fn fatal_count(&self) -> usize {
        self.accounts.iter().filter(|a| a.fatal.is_some()).count()
    }
}

enum Retrieved {
    Uploaded(StorageObjectKey),
    NoInvoice,
}

pub struct Orchestrator {
    portal: Arc<dyn Portal>,
    store: DedupStore,
    debug: DebugRecorder,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl Orchestrator {
    pub fn new(portal: Arc<dyn Portal>, store: DedupStore, debug: DebugRecorder, tz: Tz) -> Self {
        Self {
            portal,
            store,
            debug,
            clock: Arc::new(SystemClock),
            tz,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Month key at this instant; invoices are keyed by the month of upload.
    fn month_key(&self) -> String {
        self.clock.month_key_in(self.tz)
    }

    pub async fn run(&self, accounts: &[Account]) -> RunReport {
        let month = self.month_key();
        let today = self.clock.today_in(self.tz);
        tracing::info!(%month, %today, accounts = accounts.len(), "Starting run");

        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            let span = tracing::info_span!("account", account = %account.name);
            let report = self.run_account(account, today).instrument(span).await;
            reports.push(report);
        }

        RunReport {
            month,
            date: today,
            accounts: reports,
            downstream: None,
        }
    }

    pub async fn run_account(&self, account: &Account, today: NaiveDate) -> AccountReport {
        let mut report = AccountReport::new(account);
        let eligible = eligible_targets(account, today);
        report.eligible = eligible.iter().map(|t| t.uc.to_string()).collect();

        if eligible.is_empty() {
            tracing::info!(outcome = "SKIP", "No targets eligible today");
            return report;
        }
        let mut state = ProcessingState::new(eligible.iter().map(|t| t.uc.clone()));

        self.mark_already_stored(account, &mut state, &mut report).await;
        if state.is_complete() {
            tracing::info!(outcome = "SKIP", "Every eligible invoice already stored");
            report.end_state = Some(NavState::AllTargetsDone);
            return report;
        }

        let mut session = match self.portal.open(account).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(outcome = "WARN", error = %e, "Could not open portal session");
                report.fatal = Some(e.to_string());
                report.unresolved = codes(state.pending());
                return report;
            }
        };

        let outcome = match session.login(account).await {
            Ok(()) => self
                .drive(session.as_mut(), account, &mut state, &mut report)
                .await
                .map_err(|e| ("session", e)),
            Err(e) => Err(("login", e)),
        };
        if let Err((phase, e)) = outcome {
            tracing::error!(outcome = "WARN", error = %e, kind = e.kind(), phase, "Abandoning account");
            let artifact = self
                .dump(session.as_mut(), account, &format!("{phase}_{}", e.kind()))
                .await;
            if artifact.is_empty() {
                tracing::debug!("No debug artifact for account failure");
            }
            report.fatal = Some(e.to_string());
        }
        session.close().await;

        report.unresolved = codes(state.pending());
        for uc in &report.unresolved {
            tracing::warn!(outcome = "WARN", uc = %uc, "UC unresolved this run");
        }
        tracing::info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            done = state.done_count(),
            targets = state.target_count(),
            "Account finished"
        );
        report
    }

    /// Skip the browser entirely for UCs already stored this month.
    async fn mark_already_stored(
        &self,
        account: &Account,
        state: &mut ProcessingState,
        report: &mut AccountReport,
    ) {
        for uc in state.pending() {
            match self.store.exists(&self.month_key(), &account.name, &uc).await {
                Ok(true) => {
                    tracing::info!(outcome = "SKIP", uc = %uc, "Invoice already stored");
                    state.mark_done(&uc);
                    report.already_stored.push(uc.to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(uc = %uc, error = %e, "Existence check failed; rechecking in session")
                }
            }
        }
    }

    async fn drive(
        &self,
        session: &mut dyn PortalSession,
        account: &Account,
        state: &mut ProcessingState,
        report: &mut AccountReport,
    ) -> Result<()> {
        session.open_account_list().await?;

        let mut page_index = 0;
        loop {
            report.pages_visited = page_index + 1;
            let visible = session.visible_codes().await?;
            tracing::debug!(page = page_index + 1, codes = visible.len(), "List page");

            for uc in visible {
                if !state.is_pending(&uc) {
                    continue;
                }
                self.process_uc(session, account, &uc, page_index, state, report)
                    .await?;
                if state.is_complete() {
                    break;
                }
            }

            if state.is_complete() {
                report.end_state = Some(NavState::AllTargetsDone);
                return Ok(());
            }

            match session.next_page().await {
                Ok(true) => page_index += 1,
                Ok(false) => {
                    tracing::debug!(pages = page_index + 1, "No further list page");
                    report.end_state = Some(NavState::PagesExhausted);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(outcome = "WARN", error = %e, "List did not advance; stopping");
                    self.dump(session, account, &format!("pagination_{}", e.kind()))
                        .await;
                    report.end_state = Some(NavState::PagesExhausted);
                    return Ok(());
                }
            }
        }
    }

    /// Work one UC. Only a failure to get back to the list escapes.
    async fn process_uc(
        &self,
        session: &mut dyn PortalSession,
        account: &Account,
        uc: &UcCode,
        page_index: usize,
        state: &mut ProcessingState,
        report: &mut AccountReport,
    ) -> Result<()> {
        match self.store.exists(&self.month_key(), &account.name, uc).await {
            Ok(true) => {
                tracing::info!(outcome = "SKIP", uc = %uc, "Invoice already stored");
                state.mark_done(uc);
                report.already_stored.push(uc.to_string());
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                self.record_failure(session, account, uc, e, report).await;
                return Ok(());
            }
        }

        match self.retrieve(session, account, uc).await {
            Ok(Retrieved::Uploaded(key)) => {
                tracing::info!(outcome = "OK", uc = %uc, key = %key, "Invoice stored");
                state.mark_done(uc);
                report.uploaded.push(key.to_string());
            }
            Ok(Retrieved::NoInvoice) => {
                tracing::info!(outcome = "SKIP", uc = %uc, "Portal reports no invoice");
                state.mark_done(uc);
                report.no_invoice.push(uc.to_string());
            }
            Err(e) => self.record_failure(session, account, uc, e, report).await,
        }

        if let Err(first) = session.return_to_list(page_index).await {
            tracing::warn!(error = %first, "Returning to the list failed; retrying once");
            session.return_to_list(page_index).await?;
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        session: &mut dyn PortalSession,
        account: &Account,
        uc: &UcCode,
    ) -> Result<Retrieved> {
        session.open_project(uc).await?;
        if session.open_invoice_view().await? == InvoiceView::NoInvoice {
            return Ok(Retrieved::NoInvoice);
        }
        let bytes = session.extract_invoice().await?;
        let key = self
            .store
            .put(bytes, &self.month_key(), &account.name, uc)
            .await?;
        Ok(Retrieved::Uploaded(key))
    }

    async fn record_failure(
        &self,
        session: &mut dyn PortalSession,
        account: &Account,
        uc: &UcCode,
        error: Error,
        report: &mut AccountReport,
    ) {
        tracing::warn!(outcome = "WARN", uc = %uc, kind = error.kind(), error = %error, "UC failed");
        let debug = self
            .dump(session, account, &format!("uc_{}_{}", uc.sanitized(), error.kind()))
            .await;
        report.failed.push(UcFailure {
            uc: uc.to_string(),
            kind: error.kind(),
            error: error.to_string(),
            debug,
        });
    }

    async fn dump(&self, session: &mut dyn PortalSession, account: &Account, reason: &str) -> DebugArtifact {
        let snapshot = session.snapshot().await;
        self.debug
            .record(&snapshot, &self.month_key(), &account.name, reason, self.clock.now())
            .await
    }
}

fn codes(ucs: Vec<UcCode>) -> Vec<String> {
    ucs.into_iter().map(|uc| uc.to_string()).collect()
}
