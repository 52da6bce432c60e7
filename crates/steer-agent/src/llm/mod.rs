//! Streaming chat-model client: wire types, the `ChatModel` seam and the
//! OpenAI-compatible provider.

pub mod openai;
pub mod registry;
pub mod scripted;
mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// One conversation message. Tool results carry the id and name of the
/// call they answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..Self::plain("assistant", content)
        }
    }

    pub fn tool(call_id: &str, tool_name: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            tool_name: Some(tool_name.to_string()),
            ..Self::plain("tool", content)
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: None,
        }
    }
}

/// A structured tool request issued by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments exactly as the model emitted them.
    pub arguments: String,
}

/// A tool declaration handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// JSON-schema object with `properties` and `required`.
    pub parameters: Value,
}

impl ToolDef {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            def_type: "function".to_string(),
            function: FunctionDef {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Why a model turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

/// The accumulated result of one streamed model call.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishReason,
}

/// Streaming chat endpoint. Token deltas go out through `tokens` as they
/// arrive; the full turn is returned once the stream ends. Implementations
/// must honor `cancel` at every await.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn id(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        tokens: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<ModelTurn>;
}

/// One LLM configuration, identified by an opaque id. Stored in a
/// [`registry::LlmConfigStore`]; persistence lives outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Full URL of the chat-completions endpoint.
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_message_omits_empty_tool_calls() {
        let m = ChatMessage::assistant("hi", vec![]);
        assert!(m.tool_calls.is_none());
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_message_carries_call_id_and_name() {
        let m = ChatMessage::tool("call_1", "navigate", "{\"success\":true}");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["name"], "navigate");
    }

    #[test]
    fn llm_config_defaults() {
        let cfg: LlmConfig = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "api_base": "https://llm.local/v1/chat/completions",
            "model": "test-model"
        }))
        .unwrap();
        assert_eq!(cfg.temperature, 0.7);
        assert!(cfg.api_key.is_empty());
    }
}
