//! Deterministic chat model used by the test suites and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, ChatModel, FinishReason, FunctionCall, ModelTurn, ToolCall, ToolDef};
use crate::{Error, Result};

/// One pre-scripted model turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    /// Token deltas emitted before the turn resolves.
    pub tokens: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishReason,
    /// Emit the turn's tokens spaced by this delay (for disconnect tests).
    pub token_delay: Option<Duration>,
    /// Fail with `ModelUnavailable(reason)` instead of producing a turn.
    pub fail: Option<String>,
}

impl ScriptedTurn {
    pub fn text(content: &str) -> Self {
        Self {
            tokens: content
                .split_inclusive(' ')
                .map(str::to_string)
                .collect(),
            tool_calls: Vec::new(),
            finish: FinishReason::Stop,
            token_delay: None,
            fail: None,
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self {
            tokens: Vec::new(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }],
            finish: FinishReason::ToolCalls,
            token_delay: None,
            fail: None,
        }
    }

    pub fn failure(reason: &str) -> Self {
        Self {
            tokens: Vec::new(),
            tool_calls: Vec::new(),
            finish: FinishReason::Stop,
            token_delay: None,
            fail: Some(reason.to_string()),
        }
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }
}

/// Plays back queued turns in order; an exhausted script reports
/// `ModelUnavailable`.
pub struct ScriptedModel {
    id: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedModel {
    pub fn new(id: &str, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.to_string(),
            turns: Mutex::new(turns.into()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDef],
        tokens: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<ModelTurn> {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::ModelUnavailable("script exhausted".into()))?;

        if let Some(reason) = turn.fail {
            return Err(Error::ModelUnavailable(reason));
        }

        let mut content = String::new();
        for token in turn.tokens {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(delay) = turn.token_delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            content.push_str(&token);
            if tokens.send(token).await.is_err() {
                return Err(Error::Cancelled);
            }
        }

        Ok(ModelTurn {
            content,
            tool_calls: turn.tool_calls,
            finish: turn.finish,
        })
    }
}
