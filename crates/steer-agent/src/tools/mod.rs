//! Tool registry - declares executor verbs to the model and dispatches
//! tool-call records back onto them.
//!
//! Everything a tool does wrong is folded into its output payload: the model
//! may retry with different arguments, the agent loop never aborts because a
//! tool misfired.

pub mod webfetch;

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use steer_browser::{
    BatchItem, ClickOptions, Executor, NavigateOptions, TypeOptions, WaitOptions, WaitState,
};

use crate::llm::ToolDef;
use webfetch::{WebFetch, WebFetchParams};

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NavigateParams {
    #[schemars(description = "Absolute URL to load")]
    pub url: String,
    #[schemars(description = "Wait for the DOM to be ready (default: true)")]
    pub wait_load: Option<bool>,
    #[schemars(description = "Timeout in seconds (default: 30)")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClickParams {
    #[schemars(
        description = "Element to click: a RefID (e.g. 'e3'), a CSS selector, or a visible label"
    )]
    pub identifier: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TypeParams {
    #[schemars(
        description = "Target input: a RefID, a CSS selector, or a label/placeholder text"
    )]
    pub identifier: String,
    #[schemars(description = "Text to type")]
    pub text: String,
    #[schemars(description = "Clear the field first (default: true)")]
    pub clear: Option<bool>,
    #[schemars(description = "Press Enter after typing (default: false)")]
    pub press_enter: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectParams {
    #[schemars(description = "Target select element: a RefID, a CSS selector, or a label")]
    pub identifier: String,
    #[schemars(description = "Option value or visible text to select")]
    pub value: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WaitForParams {
    #[schemars(description = "Element to wait for: a RefID, a CSS selector, or a label")]
    pub identifier: String,
    #[schemars(description = "Timeout in seconds (default: 30)")]
    pub timeout_secs: Option<u64>,
    #[schemars(description = "Condition: 'present', 'visible' or 'hidden' (default: present)")]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HighlightParams {
    #[schemars(description = "Element to highlight: a RefID, a CSS selector, or a label")]
    pub label: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchParams {
    #[schemars(
        description = "Operations to run in order. Each is {type: navigate|click|type|select|wait, ...} and may set stop_on_error"
    )]
    pub operations: Vec<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Result of one tool dispatch: the payload handed back to the model and
/// whether it describes an error.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub payload: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(payload: String) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    fn error(message: impl ToString) -> Self {
        Self {
            payload: json!({ "error": message.to_string() }).to_string(),
            is_error: true,
        }
    }
}

pub struct ToolRegistry {
    executor: Arc<Executor>,
    fetcher: WebFetch,
}

impl ToolRegistry {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            fetcher: WebFetch::new(),
        }
    }

    /// Tool declarations handed to the model on every chat call.
    pub fn declarations(&self) -> Vec<ToolDef> {
        vec![
            declare::<NavigateParams>("navigate", "Load an absolute URL in the browser and wait for the page to be ready."),
            declare::<ClickParams>("click", "Click an element identified by RefID, CSS selector or visible label."),
            declare::<TypeParams>("type", "Type text into an input identified by RefID, CSS selector or label."),
            declare::<SelectParams>("select", "Select an option in a dropdown by value or visible text."),
            declare::<WaitForParams>("wait_for", "Wait until an element is present, visible or hidden."),
            declare::<EmptyParams>("page_info", "Get the current page's URL, title, metadata, element counts and load timings."),
            declare::<EmptyParams>("page_content", "Get the raw HTML of the current page."),
            declare::<EmptyParams>("page_text", "Get the visible text of the current page."),
            declare::<HighlightParams>("highlight", "Draw a short-lived marker around an element to confirm targeting."),
            declare::<BatchParams>("batch", "Run several browser operations strictly in order."),
            declare::<WebFetchParams>("webfetch", "Fetch a web page over HTTP and convert it to HTML or Markdown."),
        ]
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.declarations()
            .into_iter()
            .map(|d| d.function.name)
            .collect()
    }

    /// Dispatch one tool call. Never fails outward: malformed arguments,
    /// unknown names and verb failures all come back as error payloads.
    pub async fn invoke(&self, name: &str, arguments: &str) -> ToolOutput {
        debug!(tool = name, "invoking tool");
        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => return ToolOutput::error(format!("malformed tool arguments: {e}")),
            }
        };

        match name {
            "navigate" => match parse::<NavigateParams>(args) {
                Ok(p) => {
                    let opts = NavigateOptions {
                        wait_load: p.wait_load.unwrap_or(true),
                        timeout: secs_or_default(p.timeout_secs),
                    };
                    operation(self.executor.navigate(&p.url, opts).await)
                }
                Err(e) => e,
            },
            "click" => match parse::<ClickParams>(args) {
                Ok(p) => operation(
                    self.executor
                        .click(&p.identifier, ClickOptions::default())
                        .await,
                ),
                Err(e) => e,
            },
            "type" => match parse::<TypeParams>(args) {
                Ok(p) => {
                    let opts = TypeOptions {
                        clear: p.clear.unwrap_or(true),
                        press_enter: p.press_enter.unwrap_or(false),
                    };
                    operation(self.executor.type_text(&p.identifier, &p.text, opts).await)
                }
                Err(e) => e,
            },
            "select" => match parse::<SelectParams>(args) {
                Ok(p) => operation(self.executor.select_option(&p.identifier, &p.value).await),
                Err(e) => e,
            },
            "wait_for" => match parse::<WaitForParams>(args) {
                Ok(p) => {
                    let state = match p.state.as_deref() {
                        None | Some("present") => WaitState::Present,
                        Some("visible") => WaitState::Visible,
                        Some("hidden") => WaitState::Hidden,
                        Some(other) => {
                            return ToolOutput::error(format!(
                                "malformed tool arguments: unknown state '{other}'"
                            ))
                        }
                    };
                    let opts = WaitOptions {
                        timeout: secs_or_default(p.timeout_secs),
                        state,
                    };
                    operation(self.executor.wait_for(&p.identifier, opts).await)
                }
                Err(e) => e,
            },
            "page_info" => operation(self.executor.page_info().await),
            "page_content" => operation(self.executor.page_content().await),
            "page_text" => operation(self.executor.page_text().await),
            "highlight" => match parse::<HighlightParams>(args) {
                Ok(p) => operation(self.executor.highlight(&p.label).await),
                Err(e) => e,
            },
            "batch" => match parse::<BatchParams>(args) {
                Ok(p) => {
                    let items: Vec<BatchItem> =
                        match serde_json::from_value(Value::Array(p.operations)) {
                            Ok(items) => items,
                            Err(e) => {
                                return ToolOutput::error(format!(
                                    "malformed tool arguments: {e}"
                                ))
                            }
                        };
                    let result = self.executor.batch(items).await;
                    let is_error = result.failed > 0 && result.success == 0;
                    ToolOutput {
                        payload: serde_json::to_string(&result)
                            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string()),
                        is_error,
                    }
                }
                Err(e) => e,
            },
            "webfetch" => match parse::<WebFetchParams>(args) {
                Ok(p) => match self.fetcher.fetch(p).await {
                    Ok(value) => ToolOutput::ok(value.to_string()),
                    Err(e) => ToolOutput::error(e),
                },
                Err(e) => e,
            },
            other => ToolOutput::error(format!("unknown tool: {other}")),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> std::result::Result<T, ToolOutput> {
    serde_json::from_value(args)
        .map_err(|e| ToolOutput::error(format!("malformed tool arguments: {e}")))
}

fn operation(result: steer_browser::OperationResult) -> ToolOutput {
    ToolOutput {
        is_error: !result.success,
        payload: serde_json::to_string(&result)
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string()),
    }
}

fn secs_or_default(secs: Option<u64>) -> Duration {
    secs.map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

fn declare<T: JsonSchema>(name: &str, description: &str) -> ToolDef {
    ToolDef::function(name, description, schema_of::<T>())
}

/// JSON-schema parameters object for a derive target. Schemars metadata
/// that models do not care about is stripped.
fn schema_of<T: JsonSchema>() -> Value {
    let mut value =
        serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("type").or_insert(json!("object"));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use steer_browser::mock::{MockBrowser, MockPage};

    fn registry() -> (Arc<MockPage>, ToolRegistry) {
        let page = Arc::new(MockPage::new("https://example.com/", "Example"));
        let executor = Arc::new(Executor::new(Arc::new(MockBrowser::with_page(
            page.clone(),
        ))));
        (page, ToolRegistry::new(executor))
    }

    #[test]
    fn declarations_cover_every_verb_plus_webfetch() {
        let (_page, registry) = registry();
        let names = registry.tool_names();
        for expected in [
            "navigate",
            "click",
            "type",
            "select",
            "wait_for",
            "page_info",
            "page_content",
            "page_text",
            "highlight",
            "batch",
            "webfetch",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn schemas_are_plain_parameter_objects() {
        let (_page, registry) = registry();
        for def in registry.declarations() {
            let params = &def.function.parameters;
            assert!(params.get("$schema").is_none());
            assert!(params.get("title").is_none());
            assert_eq!(params["type"], "object", "{}", def.function.name);
            assert!(!def.function.description.is_empty());
        }

        let nav = registry
            .declarations()
            .into_iter()
            .find(|d| d.function.name == "navigate")
            .unwrap();
        let required = nav.function.parameters["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "url"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_error() {
        let (_page, registry) = registry();
        let out = registry.invoke("teleport", "{}").await;
        assert!(out.is_error);
        let payload: Value = serde_json::from_str(&out.payload).unwrap();
        assert!(payload["error"].as_str().unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_a_structured_error() {
        let (_page, registry) = registry();
        let out = registry.invoke("navigate", "{not json").await;
        assert!(out.is_error);
        assert!(out.payload.contains("malformed"));

        let out = registry.invoke("navigate", r#"{"no_url": true}"#).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn navigate_dispatches_to_the_executor() {
        let (page, registry) = registry();
        let out = registry
            .invoke("navigate", r#"{"url":"https://example.com/next"}"#)
            .await;
        assert!(!out.is_error, "{}", out.payload);

        let payload: Value = serde_json::from_str(&out.payload).unwrap();
        assert_eq!(payload["success"], true);
        assert!(page
            .actions()
            .contains(&"navigate https://example.com/next".to_string()));
    }

    #[tokio::test]
    async fn failed_verbs_flow_back_as_error_payloads() {
        let (_page, registry) = registry();
        let out = registry.invoke("click", r##"{"identifier":"#missing"}"##).await;
        assert!(out.is_error);
        let payload: Value = serde_json::from_str(&out.payload).unwrap();
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn wait_for_rejects_unknown_state() {
        let (_page, registry) = registry();
        let out = registry
            .invoke("wait_for", r##"{"identifier":"#x","state":"glowing"}"##)
            .await;
        assert!(out.is_error);
        assert!(out.payload.contains("glowing"));
    }

    #[tokio::test]
    async fn batch_parses_typed_operations() {
        let (page, registry) = registry();
        page.set_count("#a", 1);
        let out = registry
            .invoke(
                "batch",
                r##"{"operations":[
                    {"type":"click","identifier":"#a"},
                    {"type":"navigate","url":"https://example.com/two"}
                ]}"##,
            )
            .await;
        assert!(!out.is_error, "{}", out.payload);
        let payload: Value = serde_json::from_str(&out.payload).unwrap();
        assert_eq!(payload["success"], 2);
        assert_eq!(payload["failed"], 0);
        assert_eq!(payload["operations"].as_array().unwrap().len(), 2);
    }
}
