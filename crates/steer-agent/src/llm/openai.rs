//! OpenAI-compatible streaming provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sse::{parse_sse_line, SseChunk};
use super::{ChatMessage, ChatModel, FinishReason, FunctionCall, LlmConfig, ModelTurn, ToolCall, ToolDef};
use crate::{Error, Result};

pub struct OpenAiCompatibleModel {
    cfg: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(cfg: LlmConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn id(&self) -> &str {
        &self.cfg.id
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        tokens: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<ModelTurn> {
        let mut body = serde_json::json!({
            "model": self.cfg.model,
            "messages": messages,
            "stream": true,
            "temperature": self.cfg.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)
                .map_err(|e| Error::Internal(format!("tool serialization: {e}")))?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        debug!(
            model = %self.cfg.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending chat request"
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = self
                .client
                .post(&self.cfg.api_base)
                .bearer_auth(&self.cfg.api_key)
                .json(&body)
                .send() => r?,
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::ModelRateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::ModelUnavailable(format!("{status}: {detail}")));
        }

        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();

        let mut content = String::new();
        // Tool-call accumulator: delta index → (id, type, name, arguments).
        let mut builders: BTreeMap<usize, (String, String, String, String)> = BTreeMap::new();
        let mut finish = None;

        'stream: loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = byte_stream.next() => match next {
                    Some(bytes) => bytes?,
                    None => break 'stream,
                },
            };

            for ch in String::from_utf8_lossy(&chunk).chars() {
                if ch != '\n' {
                    line_buf.push(ch);
                    continue;
                }
                let line = line_buf.trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }

                match parse_sse_line(&line) {
                    Ok(Some(SseChunk::Content(text))) => {
                        content.push_str(&text);
                        // The receiver dropping means nobody wants this
                        // stream any more.
                        if tokens.send(text).await.is_err() {
                            return Err(Error::Cancelled);
                        }
                    }
                    Ok(Some(SseChunk::ToolCallDelta(raw))) => {
                        merge_tool_call_deltas(&raw, &mut builders);
                    }
                    Ok(Some(SseChunk::Finish(reason))) => {
                        finish = Some(reason);
                    }
                    Ok(Some(SseChunk::Done)) => break 'stream,
                    Ok(None) => {}
                    Err(e) => debug!("sse line skipped: {e}"),
                }
            }
        }

        let tool_calls = build_tool_calls(builders);
        let finish = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else if finish.as_deref() == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        info!(
            content_len = content.len(),
            tool_calls = tool_calls.len(),
            "chat stream complete"
        );

        Ok(ModelTurn {
            content,
            tool_calls,
            finish,
        })
    }
}

/// Merge streaming tool-call fragments into the accumulator, keyed by the
/// delta index.
fn merge_tool_call_deltas(
    raw: &str,
    builders: &mut BTreeMap<usize, (String, String, String, String)>,
) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(raw) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str() {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(t) = delta["type"].as_str() {
            if !t.is_empty() {
                entry.1 = t.to_string();
            }
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            if !name.is_empty() {
                entry.2.push_str(name);
            }
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

fn build_tool_calls(
    builders: BTreeMap<usize, (String, String, String, String)>,
) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
