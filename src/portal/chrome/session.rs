//! Login: credentials, optional popup, CAPTCHA hand-off.

use std::sync::Arc;

use chromiumoxide::{Browser, Page};

use crate::config::{PortalConfig, PortalLabels, TimeoutConfig};
use crate::error::{Error, Result};
use crate::models::Account;
use crate::poll::poll;
use crate::prompt::OperatorPrompter;

use super::locator::{Locator, Selector};
use super::{page_ids, wait_for_new_page};

/// How many times an interactive run hands a challenge to the operator.
const MAX_CHALLENGE_HANDOFFS: usize = 3;

#[derive(Debug)]
enum LoginOutcome {
    LoggedIn,
    Challenge,
    Rejected(String),
}

fn document_selectors(labels: &PortalLabels) -> Vec<Selector> {
    vec![
        Selector::label(&labels.document_field),
        Selector::placeholder(&labels.document_field),
        Selector::css(
            "input[formcontrolname*='cpf' i], input[formcontrolname*='documento' i], input[name*='cpf' i], input[name*='documento' i]",
        ),
    ]
}

fn password_selectors(labels: &PortalLabels) -> Vec<Selector> {
    vec![
        Selector::css("input[type=password]"),
        Selector::label(&labels.password_field),
        Selector::placeholder(&labels.password_field),
    ]
}

fn submit_selectors(labels: &PortalLabels) -> Vec<Selector> {
    vec![
        Selector::css("button[type=submit], input[type=submit]"),
        Selector::role("button", &labels.submit),
    ]
}

pub(crate) struct SessionDriver<'a> {
    pub browser: &'a Browser,
    pub portal: &'a PortalConfig,
    pub timeouts: &'a TimeoutConfig,
    pub prompter: &'a Arc<dyn OperatorPrompter>,
    pub interactive: bool,
}

impl SessionDriver<'_> {
    /// Log `account` in and return the page to use from now on (the login
    /// popup when one opened).
    pub async fn login(&self, page: Page, account: &Account) -> Result<Page> {
        let labels = &self.portal.labels;
        let interval = self.timeouts.poll_interval;

        page.goto(self.portal.base_url.as_str()).await?;
        let locator = Locator::new(page.clone(), interval);
        self.dismiss_cookies(&locator).await;

        let known = page_ids(self.browser).await?;
        locator
            .wait_for(
                "login button",
                &[
                    Selector::role("button", &labels.login),
                    Selector::role("link", &labels.login),
                    Selector::text(&labels.login),
                ],
                self.timeouts.navigation,
            )
            .await?
            .click()
            .await?;

        let active = match wait_for_new_page(self.browser, &known, self.timeouts.popup, interval).await? {
            Some(popup) => {
                tracing::debug!(account = %account.name, "Login continued in a popup");
                popup.bring_to_front().await?;
                popup
            }
            None => page,
        };
        let locator = Locator::new(active.clone(), interval);

        locator
            .wait_for("document field", &document_selectors(labels), self.timeouts.login)
            .await?
            .fill(&account.document_digits())
            .await?;
        locator
            .wait_for("password field", &password_selectors(labels), self.timeouts.element)
            .await?
            .fill(account.password())
            .await?;

        if self.challenge_visible(&locator).await {
            self.hand_off("CAPTCHA on the login form").await?;
        }

        self.submit(&locator).await?;

        for _ in 0..MAX_CHALLENGE_HANDOFFS {
            match self.await_outcome(&locator).await? {
                LoginOutcome::LoggedIn => {
                    tracing::info!(account = %account.name, "Logged in");
                    return Ok(active);
                }
                LoginOutcome::Rejected(message) => return Err(Error::Auth(message)),
                LoginOutcome::Challenge => self.hand_off("CAPTCHA after submit").await?,
            }
        }
        Err(Error::Challenge(
            "challenge still present after operator hand-off".to_string(),
        ))
    }

    async fn dismiss_cookies(&self, locator: &Locator) {
        let labels = &self.portal.labels;
        let found = locator
            .wait_for(
                "cookie consent",
                &[
                    Selector::role("button", &labels.cookie_accept),
                    Selector::text(&labels.cookie_accept),
                ],
                self.timeouts.popup,
            )
            .await;
        match found {
            Ok(button) => {
                if let Err(e) = button.click().await {
                    tracing::debug!(error = %e, "Cookie consent click failed");
                }
            }
            Err(_) => tracing::debug!("No cookie consent dialog"),
        }
    }

    async fn challenge_visible(&self, locator: &Locator) -> bool {
        locator
            .is_present(&[Selector::css(&self.portal.labels.captcha_selector)])
            .await
    }

    /// Non-interactive runs fail fast; interactive runs wait for the operator.
    async fn hand_off(&self, what: &str) -> Result<()> {
        if !self.interactive {
            return Err(Error::Challenge(format!("{what} (non-interactive run)")));
        }

        tracing::warn!(outcome = "WARN", "{what}: waiting for operator");
        let prompter = Arc::clone(self.prompter);
        let prompt = format!("{what}. Solve it in the browser window, then confirm to continue");
        let answer = tokio::task::spawn_blocking(move || prompter.confirm(&prompt))
            .await
            .map_err(|e| Error::Challenge(format!("prompt task failed: {e}")))?
            .map_err(|e| Error::Challenge(format!("prompt failed: {e}")))?;

        if answer {
            Ok(())
        } else {
            Err(Error::Challenge(format!("{what}: operator declined")))
        }
    }

    async fn submit(&self, locator: &Locator) -> Result<()> {
        let selectors = submit_selectors(&self.portal.labels);
        let submit = locator
            .wait_for("submit button", &selectors, self.timeouts.element)
            .await
            .map_err(|e| Error::Auth(format!("submit control not found: {e}")))?;

        // Angular enables the button once both fields validate.
        let submit_ref = &submit;
        poll("submit enabled", self.timeouts.element, self.timeouts.poll_interval, || async move {
            let state = submit_ref.state().await?;
            Ok((!state.disabled && !state.parent_disabled).then_some(()))
        })
        .await
        .map_err(|_| Error::Auth("submit control is disabled".to_string()))?;

        submit.click().await
    }

    async fn await_outcome(&self, locator: &Locator) -> Result<LoginOutcome> {
        let captcha = [Selector::css(&self.portal.labels.captcha_selector)];
        let rejected = [Selector::text(&self.portal.labels.login_error)];
        let password = password_selectors(&self.portal.labels);
        let (captcha, rejected, password) = (&captcha, &rejected, &password);

        poll("login to complete", self.timeouts.login, self.timeouts.poll_interval, || async move {
            if locator.is_present(captcha).await {
                return Ok(Some(LoginOutcome::Challenge));
            }
            if let Some(message) = locator.find(rejected).await? {
                return Ok(Some(LoginOutcome::Rejected(message.text().to_string())));
            }
            if !locator.is_present(password).await {
                return Ok(Some(LoginOutcome::LoggedIn));
            }
            Ok(None)
        })
        .await
        .map_err(|e| Error::Auth(format!("still on the login form: {e}")))
    }
}
