//! Invoice recovery from network traffic.
//!
//! The viewer never puts the PDF in the DOM: the page's own script fetches a
//! JSON document from the invoice service and renders it. We buffer relevant
//! responses around the "view" click, then dig the PDF out of that JSON.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{PortalConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::pdf::{find_invoice_url, find_pdf_payload, is_pdf_signature, MIN_PDF_BYTES};
use crate::portal::{NavState, NavTracker};

use super::locator::{Locator, Selector};
use super::{page_ids, wait_for_new_page};

/// Which responses are worth buffering, and which one carries the invoice.
#[derive(Debug, Clone)]
pub(crate) struct Relevance {
    service_pattern: String,
    pdf_pattern: String,
}

impl Relevance {
    pub fn new(portal: &PortalConfig) -> Self {
        Self {
            service_pattern: portal.invoice_service_pattern.to_lowercase(),
            pdf_pattern: portal.invoice_pdf_pattern.to_lowercase(),
        }
    }

    pub fn is_relevant(&self, url: &str, mime: &str) -> bool {
        let url = url.to_lowercase();
        let mime = mime.to_lowercase();
        url.starts_with("blob:")
            || url.contains(&self.service_pattern)
            || mime.contains("application/pdf")
            || mime.contains("json")
    }

    /// The invoice service's PDF endpoint answering with JSON.
    pub fn is_invoice_json(&self, url: &str, mime: &str) -> bool {
        let url = url.to_lowercase();
        url.contains(&self.service_pattern)
            && url.contains(&self.pdf_pattern)
            && mime.to_lowercase().contains("json")
    }

    pub fn is_direct_pdf(&self, url: &str, mime: &str) -> bool {
        mime.to_lowercase().contains("application/pdf")
            || url.to_lowercase().split('?').next().is_some_and(|p| p.ends_with(".pdf"))
    }
}

#[derive(Clone)]
pub(crate) struct CapturedResponse {
    pub request_id: RequestId,
    pub url: String,
    pub mime: String,
    pub page: Page,
}

/// Buffers relevant responses of one page until stopped.
pub(crate) struct ResponseCapture {
    buffer: Arc<Mutex<Vec<CapturedResponse>>>,
    _task: ListenerTask,
}

/// Aborts the listener when dropped, whichever path drops the capture.
struct ListenerTask(JoinHandle<()>);

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ResponseCapture {
    pub async fn start(page: Page, relevance: Relevance) -> Result<Self> {
        page.execute(EnableParams::default()).await?;
        let mut events = page.event_listener::<EventResponseReceived>().await?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = event.response.url.clone();
                let mime = event.response.mime_type.clone();
                if !relevance.is_relevant(&url, &mime) {
                    continue;
                }
                tracing::trace!(%url, %mime, "Buffered response");
                sink.lock().await.push(CapturedResponse {
                    request_id: event.request_id.clone(),
                    url,
                    mime,
                    page: page.clone(),
                });
            }
        });

        Ok(Self {
            buffer,
            _task: ListenerTask(task),
        })
    }

    pub async fn stop(self) -> Vec<CapturedResponse> {
        let captured = std::mem::take(&mut *self.buffer.lock().await);
        drop(self);
        captured
    }
}

/// Candidates in the order they are tried: invoice-service JSON first, then
/// any response that is itself a PDF.
pub(crate) fn rank_candidates(
    relevance: &Relevance,
    captured: Vec<CapturedResponse>,
) -> (Vec<CapturedResponse>, Vec<CapturedResponse>) {
    let json = captured
        .iter()
        .filter(|c| relevance.is_invoice_json(&c.url, &c.mime))
        .cloned()
        .collect();
    let direct = captured
        .into_iter()
        .filter(|c| relevance.is_direct_pdf(&c.url, &c.mime))
        .collect();
    (json, direct)
}

fn valid_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_PDF_BYTES && is_pdf_signature(bytes)
}

pub(crate) struct InvoiceExtractor<'a> {
    pub browser: &'a Browser,
    pub page: &'a Page,
    pub portal: &'a PortalConfig,
    pub timeouts: &'a TimeoutConfig,
    pub http: &'a reqwest::Client,
}

impl InvoiceExtractor<'_> {
    /// RadioSelected → Extracted.
    pub async fn extract(&self, nav: &mut NavTracker) -> Result<Vec<u8>> {
        nav.require(NavState::RadioSelected)?;
        let relevance = Relevance::new(self.portal);
        let interval = self.timeouts.poll_interval;
        let locator = Locator::new(self.page.clone(), interval);
        let labels = &self.portal.labels;

        let view = locator
            .wait_for(
                "view invoice button",
                &[
                    Selector::role("button", &labels.confirm_view),
                    Selector::text(&labels.confirm_view),
                ],
                self.timeouts.element,
            )
            .await?;

        let known = page_ids(self.browser).await?;
        let capture = ResponseCapture::start(self.page.clone(), relevance.clone()).await?;
        let settle = tokio::time::Instant::now() + self.timeouts.settle;
        if let Err(e) = view.click().await {
            capture.stop().await;
            return Err(e);
        }

        // Either a popup opens (its traffic is captured too) or the settle
        // window simply runs out.
        let popup = wait_for_new_page(self.browser, &known, self.timeouts.settle, interval)
            .await
            .unwrap_or(None);
        let popup_capture = match &popup {
            Some(page) => ResponseCapture::start(page.clone(), relevance.clone()).await.ok(),
            None => None,
        };
        tokio::time::sleep_until(settle).await;

        let mut captured = capture.stop().await;
        if let Some(extra) = popup_capture {
            captured.extend(extra.stop().await);
        }
        tracing::debug!(responses = captured.len(), popup = popup.is_some(), "Settle window elapsed");

        let result = self.recover(&relevance, captured).await;
        self.restore_focus(popup).await;

        let bytes = result?;
        nav.enter(NavState::Extracted)?;
        Ok(bytes)
    }

    async fn recover(&self, relevance: &Relevance, captured: Vec<CapturedResponse>) -> Result<Vec<u8>> {
        let (json_candidates, direct_candidates) = rank_candidates(relevance, captured);

        for candidate in &json_candidates {
            let body = match response_body(candidate).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(url = %candidate.url, error = %e, "Response body unavailable");
                    continue;
                }
            };
            let value: serde_json::Value = match serde_json::from_slice(&body) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(url = %candidate.url, error = %e, "Invoice response is not JSON");
                    continue;
                }
            };
            if let Some(pdf) = find_pdf_payload(&value) {
                tracing::debug!(url = %candidate.url, size = pdf.len(), "PDF embedded in JSON");
                return Ok(pdf);
            }
            if let Some(url) = find_invoice_url(&value) {
                match self.fetch_direct(&url).await {
                    Ok(pdf) => return Ok(pdf),
                    Err(e) => tracing::debug!(%url, error = %e, "Linked invoice fetch failed"),
                }
            }
        }

        for candidate in &direct_candidates {
            if let Ok(body) = response_body(candidate).await {
                if valid_pdf(&body) {
                    tracing::debug!(url = %candidate.url, "PDF served directly");
                    return Ok(body);
                }
            }
        }

        Err(Error::Extraction(format!(
            "no qualifying invoice response ({} service JSON, {} PDF candidates)",
            json_candidates.len(),
            direct_candidates.len()
        )))
    }

    /// Fetch a linked document with the session's cookies.
    async fn fetch_direct(&self, url: &str) -> Result<Vec<u8>> {
        let cookies = self.page.get_cookies().await?;
        let cookie_header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        let response = self
            .http
            .get(url)
            .header("cookie", cookie_header)
            .header("accept", "application/pdf,*/*")
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Extraction(format!("GET {url}: HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Extraction(format!("GET {url}: {e}")))?;

        if !valid_pdf(&bytes) {
            return Err(Error::Extraction(format!(
                "GET {url}: {} bytes without PDF signature",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    async fn restore_focus(&self, popup: Option<Page>) {
        if let Some(popup) = popup {
            if let Err(e) = popup.close().await {
                tracing::debug!(error = %e, "Closing invoice popup failed");
            }
        }
        if let Err(e) = self.page.bring_to_front().await {
            tracing::debug!(error = %e, "Could not refocus primary page");
        }
    }
}

async fn response_body(candidate: &CapturedResponse) -> Result<Vec<u8>> {
    let reply = candidate
        .page
        .execute(GetResponseBodyParams::new(candidate.request_id.clone()))
        .await?
        .result;
    if reply.base64_encoded {
        STANDARD
            .decode(reply.body.as_bytes())
            .map_err(|e| Error::Extraction(format!("undecodable response body: {e}")))
    } else {
        Ok(reply.body.into_bytes())
    }
}
