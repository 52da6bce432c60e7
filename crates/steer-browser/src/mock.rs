//! In-memory collaborator used by the test suites and offline runs.
//!
//! `MockPage` answers the executor's primitives from scripted tables instead
//! of a live browser: eval results are routed by script substring or popped
//! from a queue, element counts are keyed by the exact expression, and every
//! interaction is appended to an action log the tests assert on.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::page::{Browser, Page, PageInfo};
use crate::{Error, Result};

#[derive(Default)]
struct MockState {
    url: String,
    title: String,
    eval_routes: Vec<(String, Value)>,
    eval_queue: VecDeque<Value>,
    counts: HashMap<String, usize>,
    hidden: HashMap<(String, usize), bool>,
    actions: Vec<String>,
    fail_eval: Option<String>,
}

pub struct MockPage {
    state: Mutex<MockState>,
}

impl MockPage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            state: Mutex::new(MockState {
                url: url.into(),
                title: title.into(),
                ..Default::default()
            }),
        }
    }

    /// Queue a one-shot eval result (consumed in FIFO order).
    pub fn script_eval(&self, value: impl Into<Value>) {
        self.state.lock().unwrap().eval_queue.push_back(value.into());
    }

    /// Route evals whose script contains `needle` to a fixed result.
    /// Routes win over the queue.
    pub fn route_eval(&self, needle: &str, value: impl Into<Value>) {
        self.state
            .lock()
            .unwrap()
            .eval_routes
            .push((needle.into(), value.into()));
    }

    /// Convenience: route the accessibility probe to a canned JSON document.
    pub fn on_probe(&self, json: impl Into<String>) {
        self.route_eval("accName", Value::String(json.into()));
    }

    /// Make every subsequent eval fail with a browser error.
    pub fn fail_eval(&self, message: &str) {
        self.state.lock().unwrap().fail_eval = Some(message.into());
    }

    /// Script how many elements match an expression.
    pub fn set_count(&self, expr: &str, count: usize) {
        self.state.lock().unwrap().counts.insert(expr.into(), count);
    }

    pub fn set_hidden(&self, expr: &str, nth: usize, hidden: bool) {
        self.state
            .lock()
            .unwrap()
            .hidden
            .insert((expr.into(), nth), hidden);
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().unwrap().url = url.into();
    }

    /// Everything the executor did to this page, in order.
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    fn record(&self, action: String) {
        self.state.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl Page for MockPage {
    async fn info(&self) -> Result<PageInfo> {
        let s = self.state.lock().unwrap();
        Ok(PageInfo {
            url: s.url.clone(),
            title: s.title.clone(),
        })
    }

    async fn html(&self) -> Result<String> {
        Ok(format!("<html><title>{}</title></html>", {
            self.state.lock().unwrap().title.clone()
        }))
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        let mut s = self.state.lock().unwrap();
        if let Some(msg) = &s.fail_eval {
            return Err(Error::Browser(msg.clone()));
        }
        for (needle, value) in &s.eval_routes {
            if script.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(s.eval_queue.pop_front().unwrap_or(Value::Null))
    }

    async fn wait_load(&self) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.url = url.into();
        s.actions.push(format!("navigate {url}"));
        Ok(())
    }

    async fn count(&self, expr: &str) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .counts
            .get(expr)
            .copied()
            .unwrap_or(0))
    }

    async fn is_visible(&self, expr: &str, nth: usize) -> Result<bool> {
        let s = self.state.lock().unwrap();
        if s.counts.get(expr).copied().unwrap_or(0) <= nth {
            return Ok(false);
        }
        Ok(!s.hidden.get(&(expr.to_string(), nth)).copied().unwrap_or(false))
    }

    async fn scroll_into_view(&self, expr: &str, nth: usize) -> Result<()> {
        self.record(format!("scroll {expr} #{nth}"));
        Ok(())
    }

    async fn click(&self, expr: &str, nth: usize) -> Result<()> {
        if self.count(expr).await? <= nth {
            return Err(Error::ElementNotFound(expr.into()));
        }
        self.record(format!("click {expr} #{nth}"));
        Ok(())
    }

    async fn type_text(&self, expr: &str, nth: usize, text: &str, clear: bool) -> Result<()> {
        if self.count(expr).await? <= nth {
            return Err(Error::ElementNotFound(expr.into()));
        }
        self.record(format!(
            "type {expr} #{nth} '{text}' clear={clear}"
        ));
        Ok(())
    }

    async fn press_enter(&self, expr: &str, nth: usize) -> Result<()> {
        self.record(format!("enter {expr} #{nth}"));
        Ok(())
    }

    async fn select_option(&self, expr: &str, nth: usize, value: &str) -> Result<()> {
        if self.count(expr).await? <= nth {
            return Err(Error::ElementNotFound(expr.into()));
        }
        self.record(format!("select {expr} #{nth} '{value}'"));
        Ok(())
    }
}

/// Browser collaborator wrapping zero or one `MockPage`.
#[derive(Default)]
pub struct MockBrowser {
    page: Mutex<Option<Arc<MockPage>>>,
}

impl MockBrowser {
    pub fn with_page(page: Arc<MockPage>) -> Self {
        Self {
            page: Mutex::new(Some(page)),
        }
    }
}

impl Browser for MockBrowser {
    fn active_page(&self) -> Option<Arc<dyn Page>> {
        self.page
            .lock()
            .unwrap()
            .clone()
            .map(|p| p as Arc<dyn Page>)
    }
}
