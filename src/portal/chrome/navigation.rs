//! Region/status filter, the paginated UC list and the per-UC invoice menus.
//!
//! Every step waits for its own precondition and checks the effect it was
//! supposed to have (URL changed, radio checked, first code moved) instead of
//! sleeping.

use std::collections::HashSet;

use chromiumoxide::Page;
use serde::Deserialize;

use crate::config::{PortalConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::models::{digits_only, UcCode};
use crate::poll::poll;
use crate::portal::{InvoiceView, NavState, NavTracker};

use super::locator::{Locator, Selector, MARK_ATTRIBUTE};

/// Digits-only codes in display order, without empties or repeats.
pub(crate) fn parse_codes(labels: &[String]) -> Vec<UcCode> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .filter_map(|label| UcCode::parse(&digits_only(label)).ok())
        .filter(|code| seen.insert(code.clone()))
        .collect()
}

/// Whether the list moved to a new page: the first code changed, or an empty
/// list filled up.
pub(crate) fn page_advanced(previous: &[UcCode], current: &[UcCode]) -> bool {
    match (previous.first(), current.first()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(before), Some(now)) => before != now,
    }
}

#[derive(Debug, Deserialize)]
struct RowHit {
    via_icon: bool,
}

enum MenuOutcome {
    View,
    NoInvoice,
}

pub(crate) struct Navigator<'a> {
    locator: Locator,
    portal: &'a PortalConfig,
    timeouts: &'a TimeoutConfig,
}

impl<'a> Navigator<'a> {
    pub fn new(page: &Page, portal: &'a PortalConfig, timeouts: &'a TimeoutConfig) -> Self {
        Self {
            locator: Locator::new(page.clone(), timeouts.poll_interval),
            portal,
            timeouts,
        }
    }

    /// StateSelection → FilterApplied → ListLoaded on the current page.
    pub async fn open_account_list(&self, nav: &mut NavTracker) -> Result<()> {
        let labels = &self.portal.labels;
        nav.require(NavState::StateSelection)?;

        self.choose(
            "region selector",
            &[
                Selector::label(&labels.region_selector),
                Selector::role("combobox", &labels.region_selector),
                Selector::placeholder(&labels.region_selector),
            ],
            &self.portal.region,
        )
        .await?;
        self.choose(
            "status filter",
            &[
                Selector::label(&labels.status_selector),
                Selector::role("combobox", &labels.status_selector),
                Selector::placeholder(&labels.status_selector),
            ],
            &self.portal.status_filter,
        )
        .await?;
        nav.enter(NavState::FilterApplied)?;

        self.wait_for_list().await?;
        nav.enter(NavState::ListLoaded)
    }

    /// Pick `option` from a select-like overlay. The overlay may already be
    /// open (the region choice pops the status options), otherwise the
    /// trigger is clicked first.
    async fn choose(&self, what: &str, triggers: &[Selector], option: &str) -> Result<()> {
        let open_options = [Selector::role("option", option)];
        let option_selectors = [
            Selector::role("option", option),
            Selector::role("radio", option),
            Selector::role("menuitem", option),
            Selector::text(option),
        ];

        let pick = match self.locator.find(&open_options).await? {
            Some(pick) => pick,
            None => {
                self.locator
                    .wait_for(what, triggers, self.timeouts.element)
                    .await?
                    .click()
                    .await?;
                self.locator
                    .wait_for(&format!("{option:?} option"), &option_selectors, self.timeouts.element)
                    .await?
            }
        };
        pick.click().await?;

        // The choice counts once its overlay closed.
        let locator = &self.locator;
        let open_options = &open_options;
        poll(&format!("{what} to close"), self.timeouts.element, self.timeouts.poll_interval, || async move {
            Ok((!locator.is_present(open_options).await).then_some(()))
        })
        .await
        .map_err(|e| e.missing(what))?;

        tracing::debug!(option, "Selected {what}");
        Ok(())
    }

    async fn wait_for_list(&self) -> Result<()> {
        let empty = [Selector::text(&self.portal.labels.empty_list)];
        let empty = &empty;
        poll("account list", self.timeouts.navigation, self.timeouts.poll_interval, || async move {
            if !self.visible_codes().await?.is_empty() || self.locator.is_present(empty).await {
                Ok(Some(()))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| e.missing("account list"))
    }

    /// Codes on the current page, read from the first scope that shows any.
    pub async fn visible_codes(&self) -> Result<Vec<UcCode>> {
        let selector = serde_json::to_string(&self.portal.labels.code_label_selector)
            .map_err(|e| Error::Browser(e.to_string()))?;
        let body = format!(
            "(() => {{ const labels = Array.from(document.querySelectorAll({selector})).filter(visible).map(textOf); return labels.length ? labels : null; }})()"
        );
        let labels = self
            .locator
            .first_in_scopes::<Vec<String>>(&body)
            .await?
            .map(|(_, labels)| labels)
            .unwrap_or_default();
        Ok(parse_codes(&labels))
    }

    /// ListLoaded → ProjectOpened, confirmed by a URL change.
    pub async fn open_project(&self, uc: &UcCode, nav: &mut NavTracker) -> Result<()> {
        nav.require(NavState::ListLoaded)?;
        let labels = &self.portal.labels;

        let mark = uuid::Uuid::new_v4().to_string();
        let json = |v: &str| serde_json::to_string(v).map_err(|e| Error::Browser(e.to_string()));
        let body = format!(
            r#"(() => {{
  for (const label of document.querySelectorAll({codes})) {{
    if (!visible(label) || textOf(label).replace(/\D/g, '') !== {uc}) continue;
    const row = label.closest({rows}) || label.parentElement;
    const icon = row ? Array.from(row.querySelectorAll({icons})).find(visible) : null;
    (icon || row || label).setAttribute('{MARK_ATTRIBUTE}', {mark});
    return {{ via_icon: !!icon }};
  }}
  return null;
}})()"#,
            codes = json(labels.code_label_selector.as_str())?,
            uc = json(uc.as_str())?,
            rows = json(labels.row_selector.as_str())?,
            icons = json(labels.open_icon_selector.as_str())?,
            mark = json(mark.as_str())?,
        );

        let (scope, hit) = self
            .locator
            .first_in_scopes::<RowHit>(&body)
            .await?
            .ok_or_else(|| Error::structural("UC row", format!("{uc} is not on the current page")))?;
        tracing::debug!(uc = %uc, via_icon = hit.via_icon, "Opening UC");

        let before = self.locator.current_url().await?;
        self.locator.adopt(scope, mark).click().await?;

        let locator = &self.locator;
        let before = &before;
        poll("project page URL", self.timeouts.navigation, self.timeouts.poll_interval, || async move {
            let now = locator.current_url().await?;
            Ok((now != *before).then_some(()))
        })
        .await
        .map_err(|e| e.missing("project page"))?;

        nav.enter(NavState::ProjectOpened)
    }

    /// ProjectOpened → InvoiceMenuOpened → OptionSelected → RadioSelected,
    /// or `NoInvoice` when the panel says there is nothing to show.
    pub async fn open_invoice_view(&self, nav: &mut NavTracker) -> Result<InvoiceView> {
        nav.require(NavState::ProjectOpened)?;
        let labels = &self.portal.labels;

        self.locator
            .wait_for(
                "more options menu",
                &[
                    Selector::role("button", &labels.more_options),
                    Selector::label(&labels.more_options),
                    Selector::text(&labels.more_options),
                ],
                self.timeouts.element,
            )
            .await?
            .click()
            .await?;
        self.locator
            .wait_for(
                "invoice options entry",
                &[
                    Selector::role("menuitem", &labels.invoice_options),
                    Selector::role("button", &labels.invoice_options),
                    Selector::text(&labels.invoice_options),
                ],
                self.timeouts.element,
            )
            .await?
            .click()
            .await?;
        nav.enter(NavState::InvoiceMenuOpened)?;

        let view = [
            Selector::role("menuitem", &labels.view_invoice),
            Selector::role("button", &labels.view_invoice),
            Selector::text(&labels.view_invoice),
        ];
        let none = [Selector::text(&labels.no_invoice_available)];
        let locator = &self.locator;
        let (view_ref, none_ref) = (&view, &none);
        let outcome = poll("invoice options panel", self.timeouts.element, self.timeouts.poll_interval, || async move {
            if locator.is_present(none_ref).await {
                return Ok(Some(MenuOutcome::NoInvoice));
            }
            Ok(locator.is_present(view_ref).await.then_some(MenuOutcome::View))
        })
        .await
        .map_err(|e| e.missing("invoice options panel"))?;

        if let MenuOutcome::NoInvoice = outcome {
            return Ok(InvoiceView::NoInvoice);
        }

        self.locator
            .wait_for("view invoice option", &view, self.timeouts.element)
            .await?
            .click()
            .await?;
        nav.enter(NavState::OptionSelected)?;

        self.select_radio().await?;
        nav.enter(NavState::RadioSelected)?;
        Ok(InvoiceView::Ready)
    }

    /// Check the mandatory "not in hand" radio and verify it took.
    async fn select_radio(&self) -> Result<()> {
        let text = &self.portal.labels.invoice_not_in_hand;
        let radio = self
            .locator
            .wait_for(
                "invoice-not-in-hand radio",
                &[
                    Selector::role("radio", text),
                    Selector::label(text),
                    Selector::text(text),
                ],
                self.timeouts.element,
            )
            .await?;

        // A click that lands during the panel animation is dropped; retry once.
        for attempt in 0..2 {
            radio.click().await?;
            let radio_ref = &radio;
            let checked = poll("radio checked", self.timeouts.popup, self.timeouts.poll_interval, || async move {
                Ok(radio_ref.state().await?.checked.then_some(()))
            })
            .await;
            if checked.is_ok() {
                return Ok(());
            }
            tracing::debug!(attempt, "Radio not checked yet");
        }
        Err(Error::structural(
            "invoice-not-in-hand radio",
            "still unchecked after clicking",
        ))
    }

    /// Advance the list. `Ok(false)` when the next control is absent or inert.
    pub async fn next_page(&self, nav: &mut NavTracker) -> Result<bool> {
        nav.require(NavState::ListLoaded)?;
        let labels = &self.portal.labels;

        let next = self
            .locator
            .find(&[
                Selector::css(&labels.next_page_selector),
                Selector::role("button", &labels.next_page),
            ])
            .await?;
        let Some(next) = next else {
            return Ok(false);
        };
        if next.state().await?.is_inert() {
            return Ok(false);
        }

        let previous = self.visible_codes().await?;
        next.click().await?;

        let previous = &previous;
        poll("next page", self.timeouts.page_advance, self.timeouts.poll_interval, || async move {
            let current = self.visible_codes().await?;
            Ok(page_advanced(previous, &current).then_some(()))
        })
        .await
        .map_err(|e| e.missing("next page"))?;

        nav.enter(NavState::ListLoaded)?;
        Ok(true)
    }

    /// Canonical list URL, filter re-applied, then forward to `page_index`.
    pub async fn return_to_list(&self, page_index: usize, nav: &mut NavTracker) -> Result<()> {
        nav.enter(NavState::StateSelection)?;
        let page = self.locator.page();
        match tokio::time::timeout(self.timeouts.navigation, page.goto(self.portal.list_url.as_str())).await {
            Ok(result) => {
                result?;
            }
            Err(_) => tracing::debug!("List navigation still loading; continuing"),
        }

        self.open_account_list(nav).await?;
        for reached in 0..page_index {
            if !self.next_page(nav).await? {
                return Err(Error::structural(
                    format!("list page {}", page_index + 1),
                    format!("list ends after page {}", reached + 1),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(raw: &[&str]) -> Vec<UcCode> {
        raw.iter().map(|c| UcCode::parse(c).unwrap()).collect()
    }

    #[test]
    fn codes_are_normalized_in_order() {
        let labels = vec![
            "UC: 7001-234".to_string(),
            "  ".to_string(),
            "Nº 55 12".to_string(),
            "7001234".to_string(),
        ];
        assert_eq!(parse_codes(&labels), codes(&["7001234", "5512"]));
    }

    #[test]
    fn advance_requires_a_new_first_code() {
        assert!(page_advanced(&codes(&["1", "2"]), &codes(&["3", "4"])));
        assert!(!page_advanced(&codes(&["1", "2"]), &codes(&["1", "2"])));
        assert!(!page_advanced(&codes(&["1", "2"]), &[]));
        assert!(page_advanced(&[], &codes(&["9"])));
        assert!(!page_advanced(&[], &[]));
    }
}
