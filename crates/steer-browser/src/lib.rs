//! # steer-browser
//!
//! Browser-facing half of the steer service: accessibility snapshots,
//! RefID resolution, semantic locators and the executor that exposes
//! high-level verbs (navigate, click, type, ...) over a live page.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use steer_browser::{Executor, mock::MockBrowser};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let browser = Arc::new(MockBrowser::default());
//! let executor = Executor::new(browser);
//!
//! let result = executor.navigate("https://example.com", Default::default()).await;
//! println!("{}", result.success);
//! # }
//! ```

pub mod executor;
pub mod locator;
pub mod mock;
pub mod page;
pub mod probe;
pub mod refs;
pub mod tree;

pub use executor::{
    BatchItem, BatchOp, BatchResult, ClickOptions, Executor, Identifier, NavigateOptions,
    OperationResult, TypeOptions, WaitOptions, WaitState,
};
pub use page::{Browser, Page, PageInfo};
pub use refs::{RefData, RefResolver};
pub use tree::{AccessibilityNode, AccessibilitySnapshot, Bounds, NodeState};

/// Result type for steer-browser operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while probing or driving the page.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no active page")]
    NoActivePage,

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("probe timed out")]
    ProbeTimeout,

    #[error("malformed snapshot: {0}")]
    SnapshotMalformed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(std::time::Duration),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element not clickable: {0}")]
    ElementNotClickable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("browser error: {0}")]
    Browser(String),
}
