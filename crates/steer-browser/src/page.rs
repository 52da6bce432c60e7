//! Browser collaborator traits - the narrow surface the executor consumes.
//!
//! The embedded browser launcher lives outside this crate; anything that can
//! show a page, evaluate a script and act on elements keyed by a path
//! expression can drive the executor.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Basic facts about the active page.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// A live page. Element primitives are keyed by a path expression (XPath)
/// plus an `nth` index selecting among matches in document order.
#[async_trait]
pub trait Page: Send + Sync {
    async fn info(&self) -> Result<PageInfo>;

    async fn html(&self) -> Result<String>;

    /// Evaluate a script in the page, returning its JSON value.
    async fn eval(&self, script: &str) -> Result<Value>;

    /// Wait until the document has finished loading.
    async fn wait_load(&self) -> Result<()>;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Number of elements matching the expression.
    async fn count(&self, expr: &str) -> Result<usize>;

    async fn is_visible(&self, expr: &str, nth: usize) -> Result<bool>;

    async fn scroll_into_view(&self, expr: &str, nth: usize) -> Result<()>;

    async fn click(&self, expr: &str, nth: usize) -> Result<()>;

    /// Focus the element, optionally clear it, then type `text` key by key.
    async fn type_text(&self, expr: &str, nth: usize, text: &str, clear: bool) -> Result<()>;

    async fn press_enter(&self, expr: &str, nth: usize) -> Result<()>;

    /// Select an option by value or visible text.
    async fn select_option(&self, expr: &str, nth: usize, value: &str) -> Result<()>;
}

/// Owner of the active page. A single page is active at a time; the executor
/// serializes access to it.
pub trait Browser: Send + Sync {
    fn active_page(&self) -> Option<Arc<dyn Page>>;

    /// Ask the collaborator to shut down. Called last on process teardown.
    fn close(&self) {}
}

/// Placeholder collaborator used until a real browser is registered.
/// Every executor verb observes `NoActivePage` through it.
#[derive(Debug, Default)]
pub struct DetachedBrowser;

impl Browser for DetachedBrowser {
    fn active_page(&self) -> Option<Arc<dyn Page>> {
        None
    }
}
