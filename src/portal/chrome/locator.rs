//! Element discovery across the main document and every attached frame.
//!
//! The portal renders login, list and invoice panels in different iframes and
//! the live one moves between releases, so nothing here assumes a frame. Each
//! search lists the current scopes afresh (main frame first), tries selector
//! strategies in order and marks the winning element with a random attribute
//! so later actions address exactly that node.

use std::future::Future;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::poll::poll;

pub const MARK_ATTRIBUTE: &str = "data-fatura-mark";

/// One way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Selector {
    Css { css: String },
    /// ARIA role (explicit or implied by the tag) plus accessible name fragment.
    Role { role: String, name: String },
    /// Form control associated with a label containing `text`.
    Label { text: String },
    Placeholder { text: String },
    /// Innermost element whose text contains `text`.
    Text { text: String },
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Self::Css { css: css.into() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
        }
    }

    pub fn label(text: impl Into<String>) -> Self {
        Self::Label { text: text.into() }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder { text: text.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A document the locator can search: the main frame or an attached iframe.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub frame_id: FrameId,
    pub context: ExecutionContextId,
    pub is_main: bool,
}

/// Helpers shared by every injected script.
const PRELUDE: &str = r#"
const norm = (s) => String(s == null ? '' : s).replace(/\s+/g, ' ').trim().toLowerCase();
const visible = (el) => {
  if (!el || !el.isConnected) return false;
  const style = getComputedStyle(el);
  if (style.display === 'none' || style.visibility === 'hidden' || Number(style.opacity) === 0) return false;
  const r = el.getBoundingClientRect();
  return r.width > 0 && r.height > 0;
};
const textOf = (el) => norm(el.innerText || el.textContent || el.value || '');
const accessibleName = (el) => {
  const parts = [el.getAttribute('aria-label'), el.getAttribute('title')];
  const by = el.getAttribute('aria-labelledby');
  if (by) by.split(/\s+/).forEach((id) => { const n = document.getElementById(id); if (n) parts.push(n.textContent); });
  if (el.labels) Array.from(el.labels).forEach((l) => parts.push(l.textContent));
  parts.push(el.innerText, el.value, el.getAttribute('placeholder'));
  return norm(parts.filter(Boolean).join(' '));
};
const IMPLICIT = {
  button: 'button, input[type=button], input[type=submit], [mat-button], [mat-raised-button], [mat-flat-button], [mat-icon-button], [mat-menu-item]',
  link: 'a[href]',
  textbox: 'input:not([type]), input[type=text], input[type=email], input[type=tel], input[type=number], input[type=password], textarea',
  radio: 'input[type=radio], mat-radio-button',
  checkbox: 'input[type=checkbox], mat-checkbox',
  combobox: 'select, mat-select',
  option: 'option, mat-option',
  menuitem: '[mat-menu-item]',
};
const byRole = (role, name) => {
  const sel = `[role="${role}"]` + (IMPLICIT[role] ? `, ${IMPLICIT[role]}` : '');
  const want = norm(name);
  return Array.from(document.querySelectorAll(sel)).filter((el) => !want || accessibleName(el).includes(want));
};
const controlFor = (label) => {
  if (label.control) return label.control;
  const inner = label.querySelector('input, textarea, select, mat-select');
  if (inner) return inner;
  const field = label.closest('mat-form-field, .mat-form-field, .mat-mdc-form-field');
  return field ? field.querySelector('input, textarea, select, mat-select') : null;
};
const byLabel = (text) => {
  const want = norm(text);
  const out = [];
  document.querySelectorAll('label, mat-label').forEach((l) => {
    if (norm(l.textContent).includes(want)) { const c = controlFor(l); if (c) out.push(c); }
  });
  document.querySelectorAll('[aria-label]').forEach((el) => {
    if (norm(el.getAttribute('aria-label')).includes(want)) out.push(el);
  });
  return out;
};
const byPlaceholder = (text) => {
  const want = norm(text);
  return Array.from(document.querySelectorAll('[placeholder], [data-placeholder]')).filter((el) =>
    norm(el.getAttribute('placeholder') || el.getAttribute('data-placeholder')).includes(want));
};
const byText = (text) => {
  const want = norm(text);
  const hits = Array.from(document.querySelectorAll('body *')).filter((el) =>
    !['SCRIPT', 'STYLE', 'NOSCRIPT'].includes(el.tagName) && textOf(el).includes(want));
  return hits.filter((el) => !hits.some((other) => other !== el && el.contains(other)));
};
const candidates = (s) => {
  try {
    switch (s.by) {
      case 'css': return Array.from(document.querySelectorAll(s.css));
      case 'role': return byRole(s.role, s.name);
      case 'label': return byLabel(s.text);
      case 'placeholder': return byPlaceholder(s.text);
      case 'text': return byText(s.text);
      default: return [];
    }
  } catch (e) { return []; }
};
const marked = (mark) => document.querySelector(`[data-fatura-mark="${mark}"]`);
const disabledish = (n) => !!n && n.nodeType === 1 && (n.disabled === true ||
  n.getAttribute('aria-disabled') === 'true' || n.hasAttribute('disabled') ||
  /disabled/i.test(String(n.getAttribute('class') || '')));
const isChecked = (el) => [el, el.closest('mat-radio-button, .mat-mdc-radio-button, mat-checkbox, label, [role=radio]')]
  .filter(Boolean).some((n) => n.checked === true || n.getAttribute('aria-checked') === 'true' ||
    /(^|\s)(mat-radio-checked|mat-mdc-radio-checked|mat-checkbox-checked|mat-mdc-checkbox-checked)(\s|$)/.test(String(n.getAttribute('class') || '')) ||
    !!n.querySelector('input[type=radio]:checked, input[type=checkbox]:checked'));
"#;

/// Wrap `body` (an expression) so the result always comes back as a JSON string.
pub(crate) fn script(body: &str) -> String {
    format!("(async () => {{ {PRELUDE}\n return JSON.stringify((await ({body})) ?? null); }})()")
}

pub(crate) fn find_script(selectors: &[Selector], mark: &str) -> Result<String> {
    let strategies = serde_json::to_string(selectors)
        .map_err(|e| Error::Browser(format!("invalid selector list: {e}")))?;
    let mark = serde_json::to_string(mark).map_err(|e| Error::Browser(e.to_string()))?;
    Ok(script(&format!(
        r#"(() => {{
  for (const s of {strategies}) {{
    const el = candidates(s).find(visible);
    if (el) {{ el.setAttribute('{MARK_ATTRIBUTE}', {mark}); return {{ strategy: s.by, text: textOf(el) }}; }}
  }}
  return null;
}})()"#
    )))
}

fn on_marked(mark: &str, body: &str) -> String {
    let mark = serde_json::to_string(mark).unwrap_or_else(|_| "\"\"".to_string());
    script(&format!(
        "(() => {{ const el = marked({mark}); if (!el) return {{ detached: true }}; {body} }})()"
    ))
}

/// Evaluate a [`script`]-wrapped expression inside `scope`.
pub(crate) async fn eval<T: DeserializeOwned>(page: &Page, scope: &Scope, expression: String) -> Result<T> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .context_id(scope.context.clone())
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(Error::Browser)?;
    let json: String = page
        .evaluate_expression(params)
        .await?
        .into_value()
        .map_err(|e| Error::Browser(format!("unexpected script result: {e}")))?;
    serde_json::from_str(&json).map_err(|e| Error::Browser(format!("unexpected script result: {e}")))
}

/// Current search scopes, main frame first. Frames without a live execution
/// context (detached or still loading) are left out.
pub async fn scopes(page: &Page) -> Result<Vec<Scope>> {
    let main = page.mainframe().await?;
    let mut frames = page.frames().await?;
    if let Some(main) = &main {
        frames.retain(|f| f != main);
        frames.insert(0, main.clone());
    }

    let mut scopes = Vec::with_capacity(frames.len());
    for frame_id in frames {
        match page.frame_execution_context(frame_id.clone()).await {
            Ok(Some(context)) => scopes.push(Scope {
                is_main: main.as_ref() == Some(&frame_id),
                frame_id,
                context,
            }),
            Ok(None) => {}
            Err(e) => tracing::trace!(error = %e, "Skipping frame without context"),
        }
    }
    Ok(scopes)
}

/// Strategy-major search: the first selector is tried in every scope before
/// the next selector is tried anywhere.
pub(crate) async fn first_match<'s, S, T, F, Fut>(
    selectors: &[Selector],
    scopes: &'s [S],
    mut try_one: F,
) -> Option<(&'s S, T)>
where
    F: FnMut(&Selector, &S) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for selector in selectors {
        for scope in scopes {
            match try_one(selector, scope).await {
                Ok(Some(found)) => return Some((scope, found)),
                Ok(None) => {}
                Err(e) => tracing::trace!(error = %e, "Scope unavailable during search"),
            }
        }
    }
    None
}

pub async fn main_scope(page: &Page) -> Result<Scope> {
    scopes(page)
        .await?
        .into_iter()
        .find(|s| s.is_main)
        .ok_or_else(|| Error::Browser("main frame has no execution context".to_string()))
}

#[derive(Debug, Deserialize)]
struct FindResult {
    strategy: String,
    text: String,
}

/// Snapshot of the properties the navigation checks before and after acting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElementState {
    #[serde(default)]
    pub detached: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub parent_disabled: bool,
    #[serde(default)]
    pub pointer_events_none: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub text: String,
}

impl ElementState {
    /// Present but not actionable: hidden, disabled itself or through its
    /// parent, or ignoring pointer events.
    pub fn is_inert(&self) -> bool {
        self.detached || !self.visible || self.disabled || self.parent_disabled || self.pointer_events_none
    }
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    #[serde(default)]
    detached: bool,
    #[serde(default)]
    value: String,
}

/// Finds elements across all scopes of a page.
#[derive(Clone)]
pub struct Locator {
    page: Page,
    interval: Duration,
}

impl Locator {
    pub fn new(page: Page, interval: Duration) -> Self {
        Self { page, interval }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// One pass over all scopes per strategy. Scopes that vanish mid-search
    /// are skipped.
    pub async fn find(&self, selectors: &[Selector]) -> Result<Option<Located>> {
        let scopes = scopes(&self.page).await?;
        let mark = uuid::Uuid::new_v4().to_string();
        let hit = first_match(selectors, &scopes, |selector, scope| {
            let page = self.page.clone();
            let scope = scope.clone();
            let expression = find_script(std::slice::from_ref(selector), &mark);
            async move { eval::<Option<FindResult>>(&page, &scope, expression?).await }
        })
        .await;
        Ok(hit.map(|(scope, found)| {
            tracing::trace!(strategy = %found.strategy, text = %found.text, "Located element");
            Located {
                page: self.page.clone(),
                scope: scope.clone(),
                mark,
                text: found.text,
            }
        }))
    }

    /// Poll until one of `selectors` matches a visible element.
    /// A timeout is reported as a missing `what`.
    pub async fn wait_for(
        &self,
        what: &str,
        selectors: &[Selector],
        timeout: Duration,
    ) -> Result<Located> {
        poll(what, timeout, self.interval, || self.find(selectors))
            .await
            .map_err(|e| e.missing(what))
    }

    /// Whether any selector currently matches.
    pub async fn is_present(&self, selectors: &[Selector]) -> bool {
        matches!(self.find(selectors).await, Ok(Some(_)))
    }

    /// Run a [`script`]-wrapped expression in each scope and return the first
    /// non-`None` answer.
    pub async fn first_in_scopes<T: DeserializeOwned>(&self, body: &str) -> Result<Option<(Scope, T)>> {
        for scope in scopes(&self.page).await? {
            match eval::<Option<T>>(&self.page, &scope, script(body)).await {
                Ok(Some(value)) => return Ok(Some((scope, value))),
                Ok(None) => {}
                Err(e) => tracing::trace!(error = %e, "Scope unavailable during scan"),
            }
        }
        Ok(None)
    }

    /// `location.href` of the top-level document.
    pub async fn current_url(&self) -> Result<String> {
        let scope = main_scope(&self.page).await?;
        eval(&self.page, &scope, script("location.href")).await
    }

    /// Adopt an element that a custom script already marked with `mark`.
    pub fn adopt(&self, scope: Scope, mark: String) -> Located {
        Located {
            page: self.page.clone(),
            scope,
            mark,
            text: String::new(),
        }
    }
}

/// An element found and marked by the [`Locator`].
#[derive(Clone)]
pub struct Located {
    page: Page,
    scope: Scope,
    mark: String,
    text: String,
}

impl Located {
    /// Normalized text at the time the element was found.
    pub fn text(&self) -> &str {
        &self.text
    }

    async fn act(&self, body: &str) -> Result<String> {
        let result: ActionResult = eval(&self.page, &self.scope, on_marked(&self.mark, body)).await?;
        if result.detached {
            return Err(Error::Browser("element detached from document".to_string()));
        }
        Ok(result.value)
    }

    /// Scroll into view and dispatch the full pointer sequence on whatever is
    /// rendered at the element's center (overlays included).
    pub async fn click(&self) -> Result<()> {
        self.act(
            r#"
el.scrollIntoView({ block: 'center', inline: 'center' });
const r = el.getBoundingClientRect();
const x = r.left + r.width / 2, y = r.top + r.height / 2;
const hit = document.elementFromPoint(x, y);
const target = hit && (el.contains(hit) || hit.contains(el)) ? hit : el;
const opts = { bubbles: true, cancelable: true, composed: true, clientX: x, clientY: y, button: 0, view: window };
target.dispatchEvent(new PointerEvent('pointerdown', opts));
target.dispatchEvent(new MouseEvent('mousedown', opts));
if (typeof target.focus === 'function') target.focus();
target.dispatchEvent(new PointerEvent('pointerup', opts));
target.dispatchEvent(new MouseEvent('mouseup', opts));
target.click();
return { value: '' };"#,
        )
        .await
        .map(|_| ())
    }

    /// Clear the field and type `value` into it.
    pub async fn fill(&self, value: &str) -> Result<()> {
        self.act(
            r#"
el.scrollIntoView({ block: 'center' });
el.focus();
if (typeof el.select === 'function') el.select();
const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, '');
el.dispatchEvent(new Event('input', { bubbles: true }));
return { value: '' };"#,
        )
        .await?;

        self.page.execute(InsertTextParams::new(value)).await?;

        // Insert goes to the focused frame; fall back to the setter when the
        // text did not land (focus stolen by an overlay, masked inputs).
        let typed = self.act("return { value: String(el.value || '') };").await?;
        if typed != value {
            let literal = serde_json::to_string(value).map_err(|e| Error::Browser(e.to_string()))?;
            self.act(&format!(
                r#"
const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {literal});
el.dispatchEvent(new Event('input', {{ bubbles: true }}));
el.dispatchEvent(new Event('change', {{ bubbles: true }}));
el.dispatchEvent(new Event('blur', {{ bubbles: true }}));
return {{ value: '' }};"#
            ))
            .await?;
        }
        Ok(())
    }

    pub async fn state(&self) -> Result<ElementState> {
        let state: ElementState = eval(
            &self.page,
            &self.scope,
            on_marked(
                &self.mark,
                r#"
const style = getComputedStyle(el);
const parent = el.parentElement;
return {
  visible: visible(el),
  disabled: disabledish(el),
  parent_disabled: disabledish(parent),
  pointer_events_none: style.pointerEvents === 'none' || (!!parent && getComputedStyle(parent).pointerEvents === 'none'),
  checked: isChecked(el),
  text: textOf(el),
};"#,
            ),
        )
        .await?;
        Ok(state)
    }
}
