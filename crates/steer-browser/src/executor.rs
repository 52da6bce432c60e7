//! Executor - high-level verbs over the active page.
//!
//! Every verb returns an [`OperationResult`] so browser failures flow back
//! to the model as data instead of aborting the agent loop. Access to the
//! single active page is serialized by one mutex; verbs that mutate the DOM
//! invalidate the RefID cache on completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::locator::{locator_for, xpath_literal};
use crate::page::{Browser, Page};
use crate::probe::HELPERS_JS;
use crate::refs::{RefData, RefResolver};
use crate::tree::AccessibilitySnapshot;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a single verb.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(message)
        }
    }

    pub fn fail(error: impl ToString) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
            data: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub wait_load: bool,
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            wait_load: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClickOptions {
    /// Keep the RefID cache alive after the click. Off by default: a click
    /// usually mutates the DOM underneath the cached handles.
    pub hold_refs: bool,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self { hold_refs: false }
    }
}

#[derive(Debug, Clone)]
pub struct TypeOptions {
    pub clear: bool,
    pub press_enter: bool,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            clear: true,
            press_enter: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    #[default]
    Present,
    Visible,
    Hidden,
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub state: WaitState,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            state: WaitState::Present,
        }
    }
}

/// How a tool-supplied identifier is interpreted. Precedence is fixed:
/// RefID shape first, selector-looking strings second, free-text label last.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    RefId(String),
    Selector(String),
    Label(String),
}

impl Identifier {
    pub fn classify(raw: &str) -> Self {
        let s = raw.trim();
        if is_ref_id(s) {
            return Identifier::RefId(s.to_string());
        }
        if looks_like_selector(s) {
            return Identifier::Selector(s.to_string());
        }
        Identifier::Label(s.to_string())
    }
}

fn is_ref_id(s: &str) -> bool {
    s.len() >= 2
        && s.starts_with('e')
        && s.as_bytes()[1..].iter().all(u8::is_ascii_digit)
}

fn looks_like_selector(s: &str) -> bool {
    if !s.contains(['[', '#', '.', '>', ':']) {
        return false;
    }
    match s.chars().next() {
        Some(c) => c.is_ascii_alphanumeric() || matches!(c, '#' | '.' | '[' | '*' | '/' | '('),
        None => false,
    }
}

/// One step of a batch request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchOp {
    Navigate { url: String },
    Click { identifier: String },
    Type { identifier: String, text: String },
    Select { identifier: String, value: String },
    Wait { identifier: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    #[serde(flatten)]
    pub op: BatchOp,
    #[serde(default)]
    pub stop_on_error: bool,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub operations: Vec<OperationResult>,
    pub success: usize,
    pub failed: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Consolidated page inspection script: basic document state, element
/// counts, scroll position, meta/OpenGraph/Twitter metadata, load timings,
/// interactive-element counts, language and direction.
const PAGE_INFO_JS: &str = r#"
(() => {
    const getMeta = (name) => {
        const meta = document.querySelector('meta[name="' + name + '"], meta[property="' + name + '"]');
        return meta ? meta.content : null;
    };
    const count = (sel) => document.querySelectorAll(sel).length;
    const timing = (window.performance && window.performance.timing) || null;
    const inputs = document.querySelectorAll('input, textarea, select, [role="textbox"], [role="combobox"]');
    return {
        viewport: {
            width: window.innerWidth,
            height: window.innerHeight,
            devicePixelRatio: window.devicePixelRatio,
        },
        documentState: {
            readyState: document.readyState,
            body: !!document.body,
        },
        elementCounts: {
            links: count('a'),
            buttons: count('button, [role="button"]'),
            inputs: count('input, textarea, select'),
            images: count('img'),
            forms: count('form'),
            iframes: count('iframe'),
            headings: count('h1, h2, h3, h4, h5, h6'),
        },
        scroll: {
            scrollX: window.scrollX || 0,
            scrollY: window.scrollY || 0,
            scrollWidth: document.documentElement.scrollWidth,
            scrollHeight: document.documentElement.scrollHeight,
            isScrollable: document.documentElement.scrollHeight > window.innerHeight,
        },
        metadata: {
            description: getMeta('description'),
            keywords: getMeta('keywords'),
            author: getMeta('author'),
            ogTitle: getMeta('og:title'),
            ogDescription: getMeta('og:description'),
            ogImage: getMeta('og:image'),
            ogUrl: getMeta('og:url'),
            ogType: getMeta('og:type'),
            twitterCard: getMeta('twitter:card'),
            twitterTitle: getMeta('twitter:title'),
            twitterDescription: getMeta('twitter:description'),
            twitterImage: getMeta('twitter:image'),
            viewport: getMeta('viewport'),
            charset: document.characterSet || null,
        },
        performance: timing ? {
            domContentLoadedTime: timing.domContentLoadedEventEnd - timing.navigationStart,
            loadTime: timing.loadEventEnd - timing.navigationStart,
            domInteractive: timing.domInteractive - timing.navigationStart,
            domComplete: timing.domComplete - timing.navigationStart,
        } : null,
        interactive: {
            clickableElements: count('a, button, [role="button"], [onclick], [role="link"]'),
            inputElements: inputs.length,
            visibleInputs: Array.from(inputs).filter(el => {
                const style = window.getComputedStyle(el);
                return style.display !== 'none' && style.visibility !== 'hidden';
            }).length,
        },
        language: {
            language: document.documentElement.lang || null,
            direction: document.documentElement.dir || 'ltr',
        },
    };
})()
"#;

const PAGE_TEXT_JS: &str = r#"
(() => {
    try {
        return { text: document.body.innerText };
    } catch (e) {
        return { error: String(e && e.message || e) };
    }
})()
"#;

/// High-level browser verbs over an externally owned page.
pub struct Executor {
    browser: Arc<dyn Browser>,
    refs: RefResolver,
    // The active page is a singleton; all verbs go through this lock.
    page_lock: Mutex<()>,
}

impl Executor {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            refs: RefResolver::new(),
            page_lock: Mutex::new(()),
        }
    }

    pub fn with_ref_ttl(browser: Arc<dyn Browser>, ttl: Duration) -> Self {
        Self {
            browser,
            refs: RefResolver::with_ttl(ttl),
            page_lock: Mutex::new(()),
        }
    }

    pub fn refs(&self) -> &RefResolver {
        &self.refs
    }

    pub fn is_ready(&self) -> bool {
        self.browser.active_page().is_some()
    }

    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.is_ready() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(Error::Timeout("waiting for an active page".into()))
    }

    fn page(&self) -> Result<Arc<dyn Page>> {
        self.browser.active_page().ok_or(Error::NoActivePage)
    }

    /// Wait for load and inject the accessibility helpers. Runs implicitly
    /// before any verb that needs the accessibility tree.
    pub async fn ensure_page_ready(&self) -> Result<()> {
        let page = self.page()?;
        self.ready(page.as_ref()).await
    }

    async fn ready(&self, page: &dyn Page) -> Result<()> {
        page.wait_load().await?;
        page.eval(HELPERS_JS).await?;
        Ok(())
    }

    /// Current snapshot via the RefID resolver (cached or re-acquired).
    pub async fn snapshot(&self) -> Result<Arc<AccessibilitySnapshot>> {
        let page = self.page()?;
        let _guard = self.page_lock.lock().await;
        self.ready(page.as_ref()).await?;
        if let Ok(info) = page.info().await {
            self.refs.note_url(&info.url).await;
        }
        self.refs.snapshot(page.as_ref()).await
    }

    // ── Verbs ───────────────────────────────────────────────────────────

    pub async fn navigate(&self, url: &str, opts: NavigateOptions) -> OperationResult {
        if !is_absolute_http_url(url) {
            return OperationResult::fail(Error::InvalidUrl(url.to_string()));
        }
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };

        let _guard = self.page_lock.lock().await;
        info!(%url, "navigate");
        if let Err(e) = page.navigate(url).await {
            return OperationResult::fail(e);
        }
        if opts.wait_load {
            match tokio::time::timeout(opts.timeout, page.wait_load()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return OperationResult::fail(e),
                Err(_) => {
                    return OperationResult::fail(Error::NavigationTimeout(opts.timeout))
                }
            }
        }
        self.refs.invalidate().await;

        match page.info().await {
            Ok(info) => OperationResult::ok_with(
                format!("Navigated to {url}"),
                json!({ "url": info.url, "title": info.title }),
            ),
            Err(_) => OperationResult::ok(format!("Navigated to {url}")),
        }
    }

    pub async fn click(&self, identifier: &str, opts: ClickOptions) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let (expr, nth) = match self.resolve_identifier(page.as_ref(), identifier).await {
            Ok(t) => t,
            Err(e) => return OperationResult::fail(e),
        };

        if let Err(e) = page.scroll_into_view(&expr, nth).await {
            debug!(error = %e, "scroll_into_view failed, clicking anyway");
        }
        if let Err(e) = page.click(&expr, nth).await {
            let err = match e {
                Error::ElementNotFound(_) => e,
                other => Error::ElementNotClickable(other.to_string()),
            };
            return OperationResult::fail(err);
        }
        if !opts.hold_refs {
            self.refs.invalidate().await;
        }

        info!(identifier, %expr, nth, "clicked");
        OperationResult::ok_with(
            format!("Clicked {identifier}"),
            json!({ "identifier": identifier, "expression": expr, "nth": nth }),
        )
    }

    pub async fn type_text(
        &self,
        identifier: &str,
        text: &str,
        opts: TypeOptions,
    ) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let (expr, nth) = match self.resolve_identifier(page.as_ref(), identifier).await {
            Ok(t) => t,
            Err(e) => return OperationResult::fail(e),
        };

        if let Err(e) = page.type_text(&expr, nth, text, opts.clear).await {
            return OperationResult::fail(e);
        }
        if opts.press_enter {
            if let Err(e) = page.press_enter(&expr, nth).await {
                return OperationResult::fail(e);
            }
        }
        self.refs.invalidate().await;

        info!(identifier, chars = text.chars().count(), "typed");
        OperationResult::ok_with(
            format!("Typed into {identifier}"),
            json!({ "identifier": identifier, "expression": expr }),
        )
    }

    pub async fn select_option(&self, identifier: &str, value: &str) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let (expr, nth) = match self.resolve_identifier(page.as_ref(), identifier).await {
            Ok(t) => t,
            Err(e) => return OperationResult::fail(e),
        };

        if let Err(e) = page.select_option(&expr, nth, value).await {
            return OperationResult::fail(e);
        }
        self.refs.invalidate().await;

        OperationResult::ok_with(
            format!("Selected '{value}' in {identifier}"),
            json!({ "identifier": identifier, "value": value }),
        )
    }

    pub async fn wait_for(&self, identifier: &str, opts: WaitOptions) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let (expr, nth) = match self.resolve_identifier(page.as_ref(), identifier).await {
            Ok(t) => t,
            // A missing element is a valid starting state to wait from.
            Err(Error::ElementNotFound(_)) => (generic_label_xpath(identifier), 0),
            Err(e) => return OperationResult::fail(e),
        };

        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            let satisfied = match opts.state {
                WaitState::Present => page.count(&expr).await.map(|c| c > nth),
                WaitState::Visible => page.is_visible(&expr, nth).await,
                WaitState::Hidden => page.is_visible(&expr, nth).await.map(|v| !v),
            };
            match satisfied {
                Ok(true) => {
                    return OperationResult::ok_with(
                        format!("Condition met for {identifier}"),
                        json!({ "identifier": identifier, "state": format!("{:?}", opts.state).to_lowercase() }),
                    );
                }
                Ok(false) => {}
                Err(e) => return OperationResult::fail(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return OperationResult::fail(Error::Timeout(format!(
                    "waiting for {identifier}"
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn page_info(&self) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let mut data = json!({});
        if let Ok(info) = page.info().await {
            self.refs.note_url(&info.url).await;
            data["url"] = json!(info.url);
            data["title"] = json!(info.title);
        }
        match page.eval(PAGE_INFO_JS).await {
            Ok(Value::Object(extra)) => {
                for (k, v) in extra {
                    data[k] = v;
                }
            }
            Ok(_) => {}
            Err(e) => return OperationResult::fail(e),
        }

        OperationResult::ok_with("Retrieved page info", data)
    }

    pub async fn page_content(&self) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        match page.html().await {
            Ok(html) => OperationResult::ok_with("Retrieved page content", json!({ "html": html })),
            Err(e) => OperationResult::fail(e),
        }
    }

    pub async fn page_text(&self) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        match page.eval(PAGE_TEXT_JS).await {
            Ok(value) => {
                if let Some(text) = value.get("text").and_then(Value::as_str) {
                    OperationResult::ok_with("Retrieved page text", json!({ "text": text }))
                } else if let Some(err) = value.get("error").and_then(Value::as_str) {
                    OperationResult::fail(format!("page text script failed: {err}"))
                } else {
                    OperationResult::fail("page text script returned nothing")
                }
            }
            Err(e) => OperationResult::fail(e),
        }
    }

    /// Overlay a short-lived marker on the element matching `label`.
    /// Best-effort: failures are reported but never fatal.
    pub async fn highlight(&self, label: &str) -> OperationResult {
        let page = match self.page() {
            Ok(p) => p,
            Err(e) => return OperationResult::fail(e),
        };
        let _guard = self.page_lock.lock().await;

        let (expr, _) = match self.resolve_identifier(page.as_ref(), label).await {
            Ok(t) => t,
            Err(e) => return OperationResult::fail(e),
        };

        if let Err(e) = page.eval(HELPERS_JS).await {
            return OperationResult::fail(e);
        }
        let script = format!("window.__steerHighlight({})", xpath_literal(&expr));
        match page.eval(&script).await {
            Ok(Value::Bool(true)) => OperationResult::ok(format!("Highlighted {label}")),
            Ok(_) => OperationResult::fail(Error::ElementNotFound(label.to_string())),
            Err(e) => OperationResult::fail(e),
        }
    }

    /// Execute operations strictly in order; never parallelises.
    pub async fn batch(&self, items: Vec<BatchItem>) -> BatchResult {
        let start_time = Utc::now();
        let mut operations = Vec::with_capacity(items.len());
        let mut success = 0;
        let mut failed = 0;

        for item in items {
            let result = match &item.op {
                BatchOp::Navigate { url } => self.navigate(url, NavigateOptions::default()).await,
                BatchOp::Click { identifier } => {
                    self.click(identifier, ClickOptions::default()).await
                }
                BatchOp::Type { identifier, text } => {
                    self.type_text(identifier, text, TypeOptions::default()).await
                }
                BatchOp::Select { identifier, value } => {
                    self.select_option(identifier, value).await
                }
                BatchOp::Wait { identifier } => {
                    self.wait_for(identifier, WaitOptions::default()).await
                }
            };

            let ok = result.success;
            operations.push(result);
            if ok {
                success += 1;
            } else {
                failed += 1;
                if item.stop_on_error {
                    warn!("batch stopped on error");
                    break;
                }
            }
        }

        let end_time = Utc::now();
        BatchResult {
            operations,
            success,
            failed,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
        }
    }

    // ── Identifier resolution ───────────────────────────────────────────

    /// Turn a tool identifier into (expression, nth). RefIDs resolve via the
    /// cache with a backend-id fast path and a semantic re-resolve fallback;
    /// selector-looking strings pass through; anything else is matched as a
    /// label against the current snapshot.
    async fn resolve_identifier(
        &self,
        page: &dyn Page,
        identifier: &str,
    ) -> Result<(String, usize)> {
        match Identifier::classify(identifier) {
            Identifier::RefId(ref_id) => self.resolve_ref(page, &ref_id).await,
            Identifier::Selector(selector) => Ok((selector, 0)),
            Identifier::Label(label) => self.resolve_label(page, &label).await,
        }
    }

    async fn resolve_ref(&self, page: &dyn Page, ref_id: &str) -> Result<(String, usize)> {
        let data = match self.refs.resolve(ref_id).await {
            Some(d) => d,
            None => {
                // No cache epoch knows this handle; build one so the model
                // can at least re-observe, then report the miss.
                self.ready(page).await?;
                self.refs.snapshot(page).await?;
                self.refs
                    .resolve(ref_id)
                    .await
                    .ok_or_else(|| Error::ElementNotFound(ref_id.to_string()))?
            }
        };
        self.expression_for_ref(page, ref_id, &data).await
    }

    async fn expression_for_ref(
        &self,
        page: &dyn Page,
        ref_id: &str,
        data: &RefData,
    ) -> Result<(String, usize)> {
        // Fast path: the probed element is still in the document.
        let backend_expr = format!("//*[@data-steer-id='{}']", data.backend_id);
        if page.count(&backend_expr).await? > 0 {
            return Ok((backend_expr, 0));
        }

        // The DOM moved on; re-locate by semantic identity.
        debug!(ref_id, role = %data.role, name = %data.name, nth = data.nth,
            "backend id gone, re-resolving semantically");
        let expr = locator_for(&data.role, &data.name);
        let count = page.count(&expr).await?;
        if count <= data.nth {
            return Err(Error::ElementNotFound(format!(
                "{ref_id} ({}:{} #{})",
                data.role, data.name, data.nth
            )));
        }
        Ok((expr, data.nth))
    }

    async fn resolve_label(&self, page: &dyn Page, label: &str) -> Result<(String, usize)> {
        self.ready(page).await?;
        if let Ok(info) = page.info().await {
            self.refs.note_url(&info.url).await;
        }
        let snapshot = self.refs.snapshot(page).await?;
        let node = snapshot
            .find_by_label(label)
            .ok_or_else(|| Error::ElementNotFound(label.to_string()))?;

        let expr = locator_for(&node.role, &node.label);
        if page.count(&expr).await? > 0 {
            return Ok((expr, 0));
        }
        // The locator union may not cover exotic markup; fall back to the
        // probe-assigned selector.
        if let Some(selector) = &node.selector {
            if page.count(selector).await? > 0 {
                return Ok((selector.clone(), 0));
            }
        }
        Err(Error::ElementNotFound(label.to_string()))
    }
}

/// Label fallback used by `wait_for` when nothing matches yet.
fn generic_label_xpath(label: &str) -> String {
    let lit = xpath_literal(label.trim());
    format!(
        "//*[normalize-space(.)={lit} or @aria-label={lit} or @placeholder={lit}]"
    )
}

fn is_absolute_http_url(url: &str) -> bool {
    let rest = match url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")) {
        Some(r) => r,
        None => return false,
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBrowser, MockPage};

    fn probe_json() -> String {
        serde_json::json!({
            "role": "generic",
            "name": "",
            "attrs": {"tag": "body"},
            "backendId": 1,
            "visible": true,
            "enabled": true,
            "children": [
                {
                    "role": "button",
                    "name": "Submit",
                    "attrs": {"tag": "button"},
                    "backendId": 2,
                    "visible": true,
                    "enabled": true,
                    "children": []
                },
                {
                    "role": "textbox",
                    "name": "Search",
                    "placeholder": "Search",
                    "attrs": {"tag": "input", "type": "text"},
                    "backendId": 3,
                    "visible": true,
                    "enabled": true,
                    "children": []
                }
            ]
        })
        .to_string()
    }

    fn setup() -> (Arc<MockPage>, Executor) {
        let page = Arc::new(MockPage::new("https://example.com/", "Example"));
        page.on_probe(probe_json());
        let executor = Executor::new(Arc::new(MockBrowser::with_page(page.clone())));
        (page, executor)
    }

    #[test]
    fn identifier_precedence_is_stable() {
        assert_eq!(Identifier::classify("e12"), Identifier::RefId("e12".into()));
        assert_eq!(
            Identifier::classify("#submit"),
            Identifier::Selector("#submit".into())
        );
        assert_eq!(
            Identifier::classify("div.card > a"),
            Identifier::Selector("div.card > a".into())
        );
        assert_eq!(
            Identifier::classify("input[name=q]"),
            Identifier::Selector("input[name=q]".into())
        );
        assert_eq!(
            Identifier::classify("More information"),
            Identifier::Label("More information".into())
        );
        // "e" alone and "email" are labels, not handles.
        assert_eq!(Identifier::classify("e"), Identifier::Label("e".into()));
        assert_eq!(
            Identifier::classify("email"),
            Identifier::Label("email".into())
        );
    }

    #[test]
    fn url_validation() {
        assert!(is_absolute_http_url("https://example.com"));
        assert!(is_absolute_http_url("http://example.com/a?b#c"));
        assert!(!is_absolute_http_url("example.com"));
        assert!(!is_absolute_http_url("ftp://example.com"));
        assert!(!is_absolute_http_url("https://"));
    }

    #[tokio::test]
    async fn navigate_rejects_relative_urls() {
        let (_page, executor) = setup();
        let result = executor.navigate("not-a-url", Default::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid url"));
    }

    #[tokio::test]
    async fn navigate_invalidates_the_ref_cache() {
        let (page, executor) = setup();
        executor.snapshot().await.unwrap();
        assert_eq!(executor.refs().ref_count().await, 2);

        let result = executor
            .navigate("https://example.com/next", Default::default())
            .await;
        assert!(result.success);
        assert_eq!(executor.refs().ref_count().await, 0);
        assert!(page.actions().contains(&"navigate https://example.com/next".to_string()));
    }

    #[tokio::test]
    async fn no_active_page_is_reported_not_crashed() {
        let executor = Executor::new(Arc::new(MockBrowser::default()));
        let result = executor.page_info().await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no active page"));
    }

    #[tokio::test]
    async fn click_by_ref_id_uses_backend_fast_path() {
        let (page, executor) = setup();
        executor.snapshot().await.unwrap();

        // Probe assigned backend id 2 to the Submit button.
        page.set_count("//*[@data-steer-id='2']", 1);
        let result = executor.click("e1", Default::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(page
            .actions()
            .iter()
            .any(|a| a == "click //*[@data-steer-id='2'] #0"));

        // Click is a mutating verb.
        assert_eq!(executor.refs().ref_count().await, 0);
    }

    #[tokio::test]
    async fn stale_ref_id_recovers_via_semantic_locator() {
        let (page, executor) = setup();
        executor.snapshot().await.unwrap();

        // Backend id no longer present; two Submit buttons now match the
        // semantic locator. e1 was (button, Submit, nth=0) and must click
        // the element that is now the first Submit.
        let expr = locator_for("button", "Submit");
        page.set_count(&expr, 2);
        let result = executor.click("e1", Default::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(page.actions().iter().any(|a| a == &format!("click {expr} #0")));
    }

    #[tokio::test]
    async fn unknown_ref_id_is_element_not_found() {
        let (_page, executor) = setup();
        let result = executor.click("e99", Default::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("element not found"));
    }

    #[tokio::test]
    async fn type_into_placeholder_label() {
        let (page, executor) = setup();

        let expr = locator_for("textbox", "Search");
        page.set_count(&expr, 1);
        let result = executor
            .type_text(
                "Search",
                "hello",
                TypeOptions {
                    clear: true,
                    press_enter: true,
                },
            )
            .await;
        assert!(result.success, "{:?}", result.error);

        let actions = page.actions();
        assert!(actions.iter().any(|a| a == &format!("type {expr} #0 'hello' clear=true")));
        assert!(actions.iter().any(|a| a == &format!("enter {expr} #0")));
    }

    #[tokio::test]
    async fn raw_selector_passes_through_untouched() {
        let (page, executor) = setup();
        page.set_count("#login", 1);
        let result = executor.click("#login", Default::default()).await;
        assert!(result.success);
        assert!(page.actions().iter().any(|a| a == "click #login #0"));
    }

    #[tokio::test]
    async fn wait_for_hidden_succeeds_when_absent() {
        let (_page, executor) = setup();
        let result = executor
            .wait_for(
                "Nonexistent thing",
                WaitOptions {
                    timeout: Duration::from_millis(300),
                    state: WaitState::Hidden,
                },
            )
            .await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn wait_for_present_times_out() {
        let (_page, executor) = setup();
        let result = executor
            .wait_for(
                "#never",
                WaitOptions {
                    timeout: Duration::from_millis(250),
                    state: WaitState::Present,
                },
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn page_text_recovers_script_failure() {
        let (page, executor) = setup();
        page.route_eval("innerText", serde_json::json!({ "error": "detached frame" }));
        let result = executor.page_text().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("detached frame"));
    }

    #[tokio::test]
    async fn page_text_returns_body_text() {
        let (page, executor) = setup();
        page.route_eval("innerText", serde_json::json!({ "text": "hello world" }));
        let result = executor.page_text().await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["text"], "hello world");
    }

    #[tokio::test]
    async fn batch_runs_in_order_and_stops_on_error() {
        let (page, executor) = setup();
        page.set_count("#a", 1);

        let items: Vec<BatchItem> = serde_json::from_value(serde_json::json!([
            { "type": "click", "identifier": "#a" },
            { "type": "click", "identifier": "#missing", "stop_on_error": true },
            { "type": "click", "identifier": "#a" }
        ]))
        .unwrap();

        let result = executor.batch(items).await;
        assert_eq!(result.operations.len(), 2);
        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 1);
        assert!(result.duration_ms >= 0);
    }

    #[tokio::test]
    async fn page_info_merges_script_sections() {
        let (page, executor) = setup();
        page.route_eval(
            "elementCounts",
            serde_json::json!({
                "viewport": {"width": 1280, "height": 720},
                "elementCounts": {"links": 3},
                "language": {"language": "en", "direction": "ltr"}
            }),
        );
        let result = executor.page_info().await;
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["url"], "https://example.com/");
        assert_eq!(data["viewport"]["width"], 1280);
        assert_eq!(data["language"]["language"], "en");
    }
}
