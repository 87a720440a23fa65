//! Chrome DevTools implementation of [`Portal`].
//!
//! Each account gets its own Chrome process with a throwaway profile, so
//! cookies and storage never leak between logins.

mod extractor;
mod locator;
mod navigation;
mod session;

pub use locator::{ElementState, Located, Locator, Scope, Selector};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::config::{PortalConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::models::{Account, UcCode};
use crate::poll::poll;
use crate::prompt::{FixedPrompter, OperatorPrompter};

use super::{DebugSnapshot, InvoiceView, NavTracker, Portal, PortalSession};
use extractor::InvoiceExtractor;
use navigation::Navigator;
use session::SessionDriver;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub struct ChromePortal {
    portal: Arc<PortalConfig>,
    timeouts: Arc<TimeoutConfig>,
    prompter: Arc<dyn OperatorPrompter>,
    interactive: bool,
}

impl ChromePortal {
    pub fn new(portal: PortalConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            portal: Arc::new(portal),
            timeouts: Arc::new(timeouts),
            prompter: Arc::new(FixedPrompter::deny()),
            interactive: false,
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn OperatorPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Interactive runs hand CAPTCHAs to the operator instead of failing.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

#[async_trait::async_trait]
impl Portal for ChromePortal {
    async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>> {
        let profile = tempfile::Builder::new()
            .prefix("fatura-fetch-")
            .tempdir()
            .map_err(|e| Error::Browser(format!("failed to create profile dir: {e}")))?;

        let (browser, mut handler) = launch_browser(&self.portal, profile.path()).await?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                drop(browser);
                handler_task.abort();
                return Err(e.into());
            }
        };

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeouts.http)
            .gzip(true)
            .build()
            .map_err(|e| Error::Browser(format!("failed to create HTTP client: {e}")))?;

        tracing::debug!(account = %account.name, profile = %profile.path().display(), "Browser started");
        Ok(Box::new(ChromeSession {
            browser,
            handler_task,
            _profile: profile,
            page,
            portal: Arc::clone(&self.portal),
            timeouts: Arc::clone(&self.timeouts),
            prompter: Arc::clone(&self.prompter),
            interactive: self.interactive,
            http,
            nav: NavTracker::default(),
        }))
    }
}

pub struct ChromeSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    _profile: TempDir,
    /// Active page; replaced by the login popup when one opens.
    page: Page,
    portal: Arc<PortalConfig>,
    timeouts: Arc<TimeoutConfig>,
    prompter: Arc<dyn OperatorPrompter>,
    interactive: bool,
    http: reqwest::Client,
    nav: NavTracker,
}

#[async_trait::async_trait]
impl PortalSession for ChromeSession {
    async fn login(&mut self, account: &Account) -> Result<()> {
        let driver = SessionDriver {
            browser: &self.browser,
            portal: &self.portal,
            timeouts: &self.timeouts,
            prompter: &self.prompter,
            interactive: self.interactive,
        };
        let active = driver.login(self.page.clone(), account).await?;
        self.page = active;
        Ok(())
    }

    async fn open_account_list(&mut self) -> Result<()> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .open_account_list(&mut self.nav)
            .await
    }

    async fn visible_codes(&mut self) -> Result<Vec<UcCode>> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .visible_codes()
            .await
    }

    async fn open_project(&mut self, uc: &UcCode) -> Result<()> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .open_project(uc, &mut self.nav)
            .await
    }

    async fn open_invoice_view(&mut self) -> Result<InvoiceView> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .open_invoice_view(&mut self.nav)
            .await
    }

    async fn extract_invoice(&mut self) -> Result<Vec<u8>> {
        let extractor = InvoiceExtractor {
            browser: &self.browser,
            page: &self.page,
            portal: &self.portal,
            timeouts: &self.timeouts,
            http: &self.http,
        };
        extractor.extract(&mut self.nav).await
    }

    async fn next_page(&mut self) -> Result<bool> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .next_page(&mut self.nav)
            .await
    }

    async fn return_to_list(&mut self, page_index: usize) -> Result<()> {
        Navigator::new(&self.page, &self.portal, &self.timeouts)
            .return_to_list(page_index, &mut self.nav)
            .await
    }

    async fn snapshot(&mut self) -> DebugSnapshot {
        let limit = self.timeouts.element;
        let screenshot = tokio::time::timeout(
            limit,
            self.page.screenshot(ScreenshotParams::builder().full_page(true).build()),
        )
        .await;
        let html = tokio::time::timeout(limit, self.page.content()).await;
        let url = tokio::time::timeout(limit, self.page.url()).await;

        DebugSnapshot {
            screenshot: screenshot.ok().and_then(|r| r.ok()),
            html: html.ok().and_then(|r| r.ok()),
            url: url.ok().and_then(|r| r.ok()).flatten(),
        }
    }

    async fn close(self: Box<Self>) {
        let mut this = *self;
        if let Err(e) = this.browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        if let Err(e) = this.browser.wait().await {
            tracing::debug!(error = %e, "Browser wait failed");
        }
        this.handler_task.abort();
    }
}

/// Target ids of every page the browser currently has.
pub(crate) async fn page_ids(browser: &Browser) -> Result<HashSet<TargetId>> {
    Ok(browser
        .pages()
        .await?
        .iter()
        .map(|page| page.target_id().clone())
        .collect())
}

/// A page that was not in `known` when it appears within `timeout`.
pub(crate) async fn wait_for_new_page(
    browser: &Browser,
    known: &HashSet<TargetId>,
    timeout: Duration,
    interval: Duration,
) -> Result<Option<Page>> {
    let found = poll("new browser page", timeout, interval, || async move {
        let pages = browser.pages().await?;
        Ok(pages.into_iter().find(|p| !known.contains(p.target_id())))
    })
    .await;

    match found {
        Ok(page) => Ok(Some(page)),
        Err(Error::Timeout { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn launch_browser(
    portal: &PortalConfig,
    profile_dir: &Path,
) -> Result<(Browser, chromiumoxide::handler::Handler)> {
    let chrome_path = match &portal.chrome_executable {
        Some(path) => path.clone(),
        None => find_chrome().ok_or_else(|| {
            Error::Browser("Chrome/Chromium not found; install it or set portal.chrome_executable".to_string())
        })?,
    };

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .user_data_dir(profile_dir)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        // Keep cross-origin iframes in-process so they show up as frames.
        .arg("--disable-site-isolation-trials")
        .arg("--disable-features=IsolateOrigins,site-per-process")
        .arg(format!("--user-agent={USER_AGENT}"));
    builder = if portal.headless {
        builder.window_size(1366, 900)
    } else {
        builder.with_head().viewport(None)
    };
    let config = builder
        .build()
        .map_err(|e| Error::Browser(format!("failed to configure browser: {e}")))?;

    Browser::launch(config)
        .await
        .map_err(|e| Error::Browser(format!("failed to launch browser: {e}")))
}

fn which(name: &str) -> Option<PathBuf> {
    let output = std::process::Command::new("which").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Find a Chrome/Chromium executable on PATH or in the usual install locations.
fn find_chrome() -> Option<PathBuf> {
    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .into_iter()
        .find_map(which)
        .or_else(|| {
            [
                "/usr/bin/google-chrome",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/snap/bin/chromium",
                "/run/current-system/sw/bin/chromium",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
        })
}
