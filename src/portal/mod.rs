//! The portal as seen by the orchestrator.
//!
//! [`Portal`] opens one isolated session per account; [`PortalSession`] exposes
//! the navigation steps the per-UC loop needs. The Chrome implementation lives
//! in [`chrome`]; tests drive the orchestrator with scripted sessions.

#[cfg(feature = "chrome")]
pub mod chrome;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Account, UcCode};

/// Position in the portal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    StateSelection,
    FilterApplied,
    ListLoaded,
    ProjectOpened,
    InvoiceMenuOpened,
    OptionSelected,
    RadioSelected,
    Extracted,
    AllTargetsDone,
    PagesExhausted,
}

impl NavState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AllTargetsDone | Self::PagesExhausted)
    }

    /// Whether `next` may follow `self`.
    ///
    /// Any state may fall back to `StateSelection` (re-navigation to the
    /// list). `ListLoaded` loops to itself on page advance.
    pub fn can_transition_to(self, next: NavState) -> bool {
        use NavState::*;

        if next == StateSelection {
            return true;
        }
        match (self, next) {
            (StateSelection, FilterApplied) => true,
            (FilterApplied, ListLoaded) => true,
            (ListLoaded, ListLoaded | ProjectOpened | AllTargetsDone | PagesExhausted) => true,
            (ProjectOpened, InvoiceMenuOpened) => true,
            (InvoiceMenuOpened, OptionSelected) => true,
            (OptionSelected, RadioSelected) => true,
            (RadioSelected, Extracted) => true,
            (Extracted, ListLoaded | AllTargetsDone) => true,
            _ => false,
        }
    }
}

/// Tracks the current [`NavState`] and refuses illegal jumps.
#[derive(Debug, Clone)]
pub struct NavTracker {
    state: NavState,
}

impl Default for NavTracker {
    fn default() -> Self {
        Self {
            state: NavState::StateSelection,
        }
    }
}

impl NavTracker {
    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn enter(&mut self, next: NavState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::structural(
                format!("{next:?} state"),
                format!("cannot reach {next:?} from {:?}", self.state),
            ));
        }
        tracing::trace!(from = ?self.state, to = ?next, "Navigation state");
        self.state = next;
        Ok(())
    }

    /// Fail unless the flow is currently at `expected`.
    pub fn require(&self, expected: NavState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::structural(
                format!("{expected:?} state"),
                format!("flow is at {:?}", self.state),
            ))
        }
    }
}

/// Screenshot plus HTML of the active page.
#[derive(Debug, Clone, Default)]
pub struct DebugSnapshot {
    pub screenshot: Option<Vec<u8>>,
    pub html: Option<String>,
    pub url: Option<String>,
}

/// What the invoice-options panel offered for the open UC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceView {
    /// The view option was chosen and the mandatory radio is checked.
    Ready,
    /// The portal states that there is no invoice to show.
    NoInvoice,
}

/// Opens isolated sessions, one per account.
#[async_trait::async_trait]
pub trait Portal: Send + Sync {
    async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>>;
}

/// One account's browsing context.
#[async_trait::async_trait]
pub trait PortalSession: Send {
    /// Log in. `Auth` and `Challenge` errors are account-fatal.
    async fn login(&mut self, account: &Account) -> Result<()>;

    /// StateSelection → FilterApplied → ListLoaded.
    async fn open_account_list(&mut self) -> Result<()>;

    /// Digits-only UC codes on the current list page, in display order.
    async fn visible_codes(&mut self) -> Result<Vec<UcCode>>;

    /// ListLoaded → ProjectOpened.
    async fn open_project(&mut self, uc: &UcCode) -> Result<()>;

    /// ProjectOpened → InvoiceMenuOpened → OptionSelected → RadioSelected.
    async fn open_invoice_view(&mut self) -> Result<InvoiceView>;

    /// RadioSelected → Extracted. Returns validated PDF bytes.
    async fn extract_invoice(&mut self) -> Result<Vec<u8>>;

    /// Advance the list. `Ok(false)` when there is no usable next page.
    async fn next_page(&mut self) -> Result<bool>;

    /// Re-navigate to the canonical list, re-apply the filter and advance to
    /// the zero-based `page_index`. Used after every opened UC, whatever its
    /// outcome.
    async fn return_to_list(&mut self, page_index: usize) -> Result<()>;

    /// Best-effort capture for debug dumps.
    async fn snapshot(&mut self) -> DebugSnapshot;

    async fn close(self: Box<Self>);
}
