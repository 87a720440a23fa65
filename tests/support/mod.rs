#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fatura_fetch::models::{Account, Target, UcCode};
use fatura_fetch::portal::{DebugSnapshot, InvoiceView, Portal, PortalSession};
use fatura_fetch::{Error, Result};
use secrecy::SecretString;

pub fn uc(code: &str) -> UcCode {
    UcCode::parse(code).expect("test UC code has digits")
}

pub fn account(name: &str, ucs: &[&str]) -> Account {
    let mut account = Account::new(
        format!("id-{name}"),
        name,
        "123.456.789-00",
        SecretString::from("secret".to_string()),
    );
    for code in ucs {
        account.add_target(Target::new(uc(code)));
    }
    account
}

/// 2025-11-20 12:00 in Sao Paulo.
pub fn noon_utc() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 20, 15, 0, 0).unwrap()
}

pub fn pdf_bytes(tag: &str) -> Vec<u8> {
    let mut bytes = format!("%PDF-1.4\n% {tag}\n").into_bytes();
    bytes.resize(2048, b' ');
    bytes.extend_from_slice(b"\n%%EOF\n");
    bytes
}

/// Where a scripted UC goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    OpenProject,
    InvoiceMenu,
    Extract,
}

#[derive(Debug, Clone)]
pub enum UcScript {
    Invoice(Vec<u8>),
    NoInvoice,
    Fail(FailAt),
}

/// Everything the sessions did, shared with the test after the portal is moved.
#[derive(Debug, Default)]
pub struct MockLog {
    pub sessions_opened: Vec<String>,
    pub sessions_closed: usize,
    pub logins: Vec<String>,
    pub projects_opened: Vec<UcCode>,
    pub extractions: Vec<UcCode>,
    pub returns_to_list: Vec<usize>,
    pub page_advances: usize,
    pub snapshots: usize,
}

#[derive(Clone, Default)]
pub struct MockPortal {
    pages: Vec<Vec<UcCode>>,
    scripts: HashMap<UcCode, UcScript>,
    failing_logins: HashSet<String>,
    stalled_logins: HashSet<String>,
    broken_pagination: bool,
    pub log: Arc<Mutex<MockLog>>,
}

impl MockPortal {
    pub fn new(pages: &[&[&str]]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|page| page.iter().map(|code| uc(code)).collect())
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_uc(mut self, code: &str, script: UcScript) -> Self {
        self.scripts.insert(uc(code), script);
        self
    }

    pub fn with_failing_login(mut self, account_name: &str) -> Self {
        self.failing_logins.insert(account_name.to_string());
        self
    }

    /// The login form for this account never shows its document field.
    pub fn with_stalled_login(mut self, account_name: &str) -> Self {
        self.stalled_logins.insert(account_name.to_string());
        self
    }

    pub fn with_broken_pagination(mut self) -> Self {
        self.broken_pagination = true;
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, MockLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl Portal for MockPortal {
    async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>> {
        self.log().sessions_opened.push(account.name.clone());
        Ok(Box::new(MockSession {
            portal: self.clone(),
            page: 0,
            current: None,
        }))
    }
}

struct MockSession {
    portal: MockPortal,
    page: usize,
    current: Option<UcCode>,
}

impl MockSession {
    fn script(&self) -> Option<UcScript> {
        self.current
            .as_ref()
            .and_then(|uc| self.portal.scripts.get(uc).cloned())
    }

    fn fails_at(&self, step: FailAt) -> bool {
        matches!(self.script(), Some(UcScript::Fail(at)) if at == step)
    }
}

#[async_trait]
impl PortalSession for MockSession {
    async fn login(&mut self, account: &Account) -> Result<()> {
        self.portal.log().logins.push(account.name.clone());
        if self.portal.failing_logins.contains(&account.name) {
            return Err(Error::Auth("portal rejected the credentials".to_string()));
        }
        if self.portal.stalled_logins.contains(&account.name) {
            return Err(Error::Timeout {
                waiting_for: "document field".to_string(),
                timeout: std::time::Duration::from_secs(1),
            });
        }
        Ok(())
    }

    async fn open_account_list(&mut self) -> Result<()> {
        self.page = 0;
        Ok(())
    }

    async fn visible_codes(&mut self) -> Result<Vec<UcCode>> {
        Ok(self.portal.pages.get(self.page).cloned().unwrap_or_default())
    }

    async fn open_project(&mut self, uc: &UcCode) -> Result<()> {
        self.current = Some(uc.clone());
        self.portal.log().projects_opened.push(uc.clone());
        if self.fails_at(FailAt::OpenProject) {
            return Err(Error::structural("project row", format!("UC {uc} did not open")));
        }
        Ok(())
    }

    async fn open_invoice_view(&mut self) -> Result<InvoiceView> {
        if self.fails_at(FailAt::InvoiceMenu) {
            return Err(Error::structural("invoice options", "menu never opened"));
        }
        Ok(match self.script() {
            Some(UcScript::NoInvoice) => InvoiceView::NoInvoice,
            _ => InvoiceView::Ready,
        })
    }

    async fn extract_invoice(&mut self) -> Result<Vec<u8>> {
        let uc = self.current.clone().expect("extract after open_project");
        self.portal.log().extractions.push(uc.clone());
        match self.script() {
            Some(UcScript::Invoice(bytes)) => Ok(bytes),
            Some(UcScript::Fail(FailAt::Extract)) => {
                Err(Error::Extraction("no qualifying invoice response".to_string()))
            }
            _ => Ok(pdf_bytes(uc.as_str())),
        }
    }

    async fn next_page(&mut self) -> Result<bool> {
        if self.portal.broken_pagination {
            return Err(Error::Timeout {
                waiting_for: "list page change".to_string(),
                timeout: std::time::Duration::from_secs(1),
            });
        }
        if self.page + 1 >= self.portal.pages.len() {
            return Ok(false);
        }
        self.page += 1;
        self.portal.log().page_advances += 1;
        Ok(true)
    }

    async fn return_to_list(&mut self, page_index: usize) -> Result<()> {
        self.current = None;
        self.page = page_index;
        self.portal.log().returns_to_list.push(page_index);
        Ok(())
    }

    async fn snapshot(&mut self) -> DebugSnapshot {
        self.portal.log().snapshots += 1;
        DebugSnapshot {
            screenshot: Some(vec![0x89, b'P', b'N', b'G']),
            html: Some("<html><body>mock</body></html>".to_string()),
            url: Some(format!("https://portal.test/#/imoveis?page={}", self.page)),
        }
    }

    async fn close(self: Box<Self>) {
        self.portal.log().sessions_closed += 1;
    }
}
