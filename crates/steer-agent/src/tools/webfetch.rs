//! WebFetch side tool - fetch a page and return it as HTML or Markdown.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{Error, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Some sites reject obvious bot agents; present a mainstream browser.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FetchFormat {
    Html,
    #[default]
    Markdown,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebFetchParams {
    #[schemars(description = "The URL of the web page to fetch")]
    pub url: String,
    #[schemars(description = "Output format: 'html' or 'markdown' (default: markdown)")]
    #[serde(default)]
    pub format: FetchFormat,
}

pub struct WebFetch {
    client: reqwest::Client,
}

impl Default for WebFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl WebFetch {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub async fn fetch(&self, params: WebFetchParams) -> Result<Value> {
        if params.url.trim().is_empty() {
            return Err(Error::MalformedArguments("url is required".into()));
        }

        let response = self.client.get(&params.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("HTTP error: {status}")));
        }

        let html = response.text().await?;
        let content = match params.format {
            FetchFormat::Html => html,
            FetchFormat::Markdown => html_to_markdown(&html),
        };

        Ok(json!({
            "url": params.url,
            "format": match params.format {
                FetchFormat::Html => "html",
                FetchFormat::Markdown => "markdown",
            },
            "content": content,
        }))
    }
}

/// Deterministic HTML → Markdown conversion. Boilerplate containers are
/// skipped so the model sees the main content.
fn html_to_markdown(html: &str) -> String {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe"])
        .build();
    converter.convert(html).unwrap_or_else(|_| html.to_string())
}
