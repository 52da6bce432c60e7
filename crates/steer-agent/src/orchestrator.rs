//! Streaming orchestrator - drives the chat/tool/chat loop for one
//! send-message request and emits ordered chunks on a bounded channel.
//!
//! The worker runs detached from the HTTP handler; they share only the
//! channel and a cancellation token. Four cancellation sources fan into
//! that token: client disconnect, session delete, the per-request model
//! timeout and process shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::llm::{ChatMessage, FinishReason, LlmConfig};
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::{Error, ModelRegistry, Result};

/// Bounded stream capacity between worker and handler.
pub const STREAM_CAPACITY: usize = 10;
/// Tool rounds allowed per message before the stream ends with
/// `final{tool_limit}`.
pub const MAX_TOOL_ROUNDS: usize = 25;
/// Budget for a single model call.
pub const MODEL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

const SYSTEM_PROMPT: &str = "\
You are a browser automation agent. You control a real web browser through tools.

Rules:
- Use `navigate` to open pages, then `page_info` or `page_text` to see where you are.
- Element identifiers: RefIDs like `e3` from earlier observations, CSS selectors, or visible labels.
- Prefer RefIDs when you have them; fall back to labels.
- After the task is done, summarize the outcome for the user in plain text.";

/// One chunk on a message stream, in causal order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Token {
        text: String,
    },
    ToolStart {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolEnd {
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Observation {
        kind: String,
        data: Value,
    },
    Final {
        reason: FinalReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalReason {
    Stop,
    Length,
    ToolLimit,
    Error,
}

pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModelRegistry>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Start processing one user message. Returns the chunk receiver and the
    /// request-scoped cancellation token; cancelling it stops the worker at
    /// its next suspension point.
    ///
    /// With `override_config` set, the session's model binding is swapped for
    /// the duration of this request and restored on every exit path.
    pub async fn send_message(
        self: &Arc<Self>,
        session: Arc<Session>,
        text: String,
        override_config: Option<LlmConfig>,
    ) -> Result<(mpsc::Receiver<StreamChunk>, CancellationToken)> {
        if text.trim().is_empty() {
            return Err(Error::MessageEmpty);
        }
        let busy = session.try_begin()?;

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let cancel = session.cancel_token().child_token();
        let override_model = override_config.map(|cfg| self.registry.build(&cfg));

        let orchestrator = self.clone();
        let worker_session = session.clone();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            // Claimed for the whole request, including binding restore.
            let _busy = busy;

            worker_session.touch().await;
            worker_session
                .push_message(ChatMessage::user(text.as_str()))
                .await;

            let saved_binding = worker_session.binding().await;
            let overridden = override_model.is_some();
            if let Some(model) = override_model {
                worker_session.set_binding(Some(model)).await;
            }

            // Recover worker panics here; they surface as `final{error}`,
            // never as a dead session.
            let outcome = AssertUnwindSafe(orchestrator.run_loop(
                &worker_session,
                &tx,
                &worker_cancel,
            ))
            .catch_unwind()
            .await;

            if overridden {
                worker_session.set_binding(saved_binding).await;
            }
            worker_session.touch().await;

            match outcome {
                Ok(Ok(reason)) => {
                    let _ = tx.send(StreamChunk::Final { reason }).await;
                }
                Ok(Err(Error::Cancelled)) => {
                    // Silent on the wire: the stream simply ends.
                    info!(session_id = %worker_session.id, "stream cancelled");
                }
                Ok(Err(e)) => {
                    warn!(session_id = %worker_session.id, error = %e, "stream failed");
                    let _ = tx
                        .send(StreamChunk::Final {
                            reason: FinalReason::Error,
                        })
                        .await;
                }
                Err(_) => {
                    error!(session_id = %worker_session.id, "worker panicked");
                    let _ = tx
                        .send(StreamChunk::Final {
                            reason: FinalReason::Error,
                        })
                        .await;
                }
            }
        });
        session.set_worker(handle).await;

        Ok((rx, cancel))
    }

    /// The chat → tool → chat loop. Returns the final reason, or
    /// `Cancelled` when any suspension point observed the token.
    async fn run_loop(
        &self,
        session: &Arc<Session>,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<FinalReason> {
        let declarations = self.tools.declarations();
        let mut rounds = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let model = match session.binding().await {
                Some(model) => model,
                None => self.registry.current().await?,
            };

            let mut history = vec![ChatMessage::system(self.system_prompt.as_str())];
            history.extend(session.messages().await);

            // Forward token deltas in order while the model streams.
            let (token_tx, mut token_rx) = mpsc::channel::<String>(16);
            let forwarder = {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(text) = token_rx.recv().await {
                        if tx.send(StreamChunk::Token { text }).await.is_err() {
                            break;
                        }
                    }
                })
            };

            let turn = tokio::select! {
                _ = cancel.cancelled() => {
                    forwarder.abort();
                    return Err(Error::Cancelled);
                }
                result = tokio::time::timeout(
                    MODEL_CALL_TIMEOUT,
                    model.chat(&history, &declarations, token_tx, cancel),
                ) => match result {
                    Ok(turn) => turn?,
                    Err(_) => {
                        forwarder.abort();
                        return Err(Error::ModelUnavailable("model call timed out".into()));
                    }
                },
            };
            // The model dropped its sender; drain remaining tokens so no
            // chunk can overtake the tool events below.
            let _ = forwarder.await;

            session
                .push_message(ChatMessage::assistant(
                    turn.content.as_str(),
                    turn.tool_calls.clone(),
                ))
                .await;

            if turn.tool_calls.is_empty() {
                return Ok(match turn.finish {
                    FinishReason::Length => FinalReason::Length,
                    _ => FinalReason::Stop,
                });
            }

            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                warn!(session_id = %session.id, rounds, "tool round limit reached");
                return Ok(FinalReason::ToolLimit);
            }

            for call in &turn.tool_calls {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let arguments: Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                self.emit(
                    tx,
                    StreamChunk::ToolStart {
                        call_id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments,
                    },
                )
                .await?;

                let output = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    output = self.tools.invoke(&call.function.name, &call.function.arguments) => output,
                };

                let parsed: Option<Value> = serde_json::from_str(&output.payload).ok();
                if output.is_error {
                    let message = parsed
                        .as_ref()
                        .and_then(|v| v.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| output.payload.clone());
                    self.emit(
                        tx,
                        StreamChunk::ToolEnd {
                            call_id: call.id.clone(),
                            result: None,
                            error: Some(message),
                        },
                    )
                    .await?;
                } else {
                    self.emit(
                        tx,
                        StreamChunk::ToolEnd {
                            call_id: call.id.clone(),
                            result: parsed
                                .clone()
                                .or_else(|| Some(Value::String(output.payload.clone()))),
                            error: None,
                        },
                    )
                    .await?;

                    // Page moves are worth surfacing to the client directly.
                    if call.function.name == "navigate" {
                        if let Some(data) = parsed.as_ref().and_then(|v| v.get("data")) {
                            self.emit(
                                tx,
                                StreamChunk::Observation {
                                    kind: "navigation".to_string(),
                                    data: data.clone(),
                                },
                            )
                            .await?;
                        }
                    }
                }

                session
                    .push_message(ChatMessage::tool(
                        &call.id,
                        &call.function.name,
                        output.payload.as_str(),
                    ))
                    .await;
            }
        }
    }

    /// Send one chunk; a dropped receiver means the client is gone.
    async fn emit(&self, tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> Result<()> {
        tx.send(chunk).await.map_err(|_| Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::registry::MemoryConfigStore;
    use crate::llm::scripted::{ScriptedModel, ScriptedTurn};
    use crate::llm::ChatModel;
    use crate::session::SessionManager;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use steer_browser::mock::{MockBrowser, MockPage};
    use steer_browser::Executor;

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        sessions: SessionManager,
        page: Arc<MockPage>,
    }

    /// Registry whose factory plays back per-config scripts.
    fn harness(scripts: Vec<(&str, Vec<ScriptedTurn>)>) -> Harness {
        let store = Arc::new(MemoryConfigStore::new());
        let mut table: HashMap<String, Vec<ScriptedTurn>> = HashMap::new();
        for (id, turns) in scripts {
            store.insert(LlmConfig {
                id: id.to_string(),
                display_name: id.to_string(),
                api_base: "https://llm.local/v1/chat/completions".into(),
                api_key: String::new(),
                model: format!("model-{id}"),
                temperature: 0.0,
            });
            table.insert(id.to_string(), turns);
        }
        let table = Arc::new(Mutex::new(table));

        let registry = Arc::new(ModelRegistry::with_factory(
            store,
            Arc::new(move |cfg: &LlmConfig| {
                let turns = table
                    .lock()
                    .unwrap()
                    .get(&cfg.id)
                    .cloned()
                    .unwrap_or_default();
                Arc::new(ScriptedModel::new(&cfg.id, turns)) as Arc<dyn ChatModel>
            }),
        ));

        let page = Arc::new(MockPage::new("https://start.example/", "Start"));
        let executor = Arc::new(Executor::new(Arc::new(MockBrowser::with_page(
            page.clone(),
        ))));
        let tools = Arc::new(ToolRegistry::new(executor));

        Harness {
            orchestrator: Arc::new(Orchestrator::new(registry, tools)),
            sessions: SessionManager::new(),
            page,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    fn final_reason(chunks: &[StreamChunk]) -> Option<FinalReason> {
        chunks.iter().rev().find_map(|c| match c {
            StreamChunk::Final { reason } => Some(*reason),
            _ => None,
        })
    }

    #[tokio::test]
    async fn plain_reply_streams_tokens_then_final_stop() {
        let h = harness(vec![("m1", vec![ScriptedTurn::text("Hi there friend")])]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "Say hi".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;

        let text: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there friend");
        assert_eq!(final_reason(&chunks), Some(FinalReason::Stop));

        let history = session.messages().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "Hi there friend");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_up_front() {
        let h = harness(vec![("m1", vec![])]);
        let session = h.sessions.create().await;
        let result = h
            .orchestrator
            .send_message(session, "   ".into(), None)
            .await;
        assert!(matches!(result, Err(Error::MessageEmpty)));
    }

    #[tokio::test]
    async fn tool_loop_emits_causally_ordered_chunks() {
        let h = harness(vec![(
            "m1",
            vec![
                ScriptedTurn::tool_call(
                    "call_1",
                    "navigate",
                    json!({ "url": "https://example.com/" }),
                ),
                ScriptedTurn::text("Opened it."),
            ],
        )]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "Open example.com".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;

        let start = chunks
            .iter()
            .position(|c| matches!(c, StreamChunk::ToolStart { .. }))
            .expect("tool_start missing");
        let end = chunks
            .iter()
            .position(|c| matches!(c, StreamChunk::ToolEnd { .. }))
            .expect("tool_end missing");
        assert!(start < end, "tool_end must follow tool_start");

        match &chunks[start] {
            StreamChunk::ToolStart { call_id, name, arguments } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "navigate");
                assert_eq!(arguments["url"], "https://example.com/");
            }
            _ => unreachable!(),
        }
        match &chunks[end] {
            StreamChunk::ToolEnd { call_id, result, error } => {
                assert_eq!(call_id, "call_1");
                assert!(error.is_none());
                assert_eq!(result.as_ref().unwrap()["success"], true);
            }
            _ => unreachable!(),
        }

        // Navigation surfaces an observation, then post-tool tokens.
        assert!(chunks.iter().any(|c| matches!(
            c,
            StreamChunk::Observation { kind, .. } if kind == "navigation"
        )));
        let post_tool_text: String = chunks[end..]
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(post_tool_text, "Opened it.");
        assert_eq!(final_reason(&chunks), Some(FinalReason::Stop));

        // The browser really navigated and history carries the tool result.
        assert!(h
            .page
            .actions()
            .contains(&"navigate https://example.com/".to_string()));
        let history = session.messages().await;
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn model_failure_terminates_with_final_error_and_session_survives() {
        let h = harness(vec![(
            "m1",
            vec![
                ScriptedTurn::failure("connection refused"),
                ScriptedTurn::text("Back again"),
            ],
        )]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "hello".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(final_reason(&chunks), Some(FinalReason::Error));

        // The session remains usable: the next send goes through the same
        // binding and completes normally.
        let (rx, _cancel) = h
            .orchestrator
            .send_message(session, "again".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(final_reason(&chunks), Some(FinalReason::Stop));
        let text: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Back again");
    }

    #[tokio::test]
    async fn one_shot_override_swaps_and_restores_the_binding() {
        let h = harness(vec![
            ("m1", vec![ScriptedTurn::text("from m1")]),
            ("m2", vec![ScriptedTurn::failure("m2 always fails")]),
        ]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;
        let before = session.binding().await;
        assert!(before.is_none());

        let m2 = h.orchestrator.registry().store().get("m2").unwrap();
        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "try m2".into(), Some(m2))
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(final_reason(&chunks), Some(FinalReason::Error));

        // Binding restored to what it was before the request began.
        assert!(session.binding().await.is_none());

        // A subsequent send without override uses m1 again.
        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "plain".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(final_reason(&chunks), Some(FinalReason::Stop));
        let text: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "from m1");
    }

    #[tokio::test]
    async fn client_disconnect_stops_the_worker_and_discards_partial_output() {
        let h = harness(vec![(
            "m1",
            vec![ScriptedTurn::text(
                "a long reply with many many tokens to stream out slowly",
            )
            .with_token_delay(Duration::from_millis(20))],
        )]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;

        let (mut rx, cancel) = h
            .orchestrator
            .send_message(session.clone(), "talk".into(), None)
            .await
            .unwrap();

        // Read one token, then disconnect like a closed TCP client.
        let first = rx.recv().await;
        assert!(matches!(first, Some(StreamChunk::Token { .. })));
        cancel.cancel();
        drop(rx);

        // The worker unwinds promptly and releases the busy guard.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if session.try_begin().is_ok() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker leaked after disconnect");

        // Partial assistant output is discarded: history ends with the
        // user message.
        let history = session.messages().await;
        assert_eq!(history.last().unwrap().role, "user");
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected_as_busy() {
        let h = harness(vec![(
            "m1",
            vec![ScriptedTurn::text("slow slow slow slow slow")
                .with_token_delay(Duration::from_millis(30))],
        )]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session.clone(), "first".into(), None)
            .await
            .unwrap();

        let second = h
            .orchestrator
            .send_message(session.clone(), "second".into(), None)
            .await;
        assert!(matches!(second, Err(Error::SessionBusy(_))));

        collect(rx).await;
    }

    #[tokio::test]
    async fn runaway_tool_use_ends_with_tool_limit() {
        let turns: Vec<ScriptedTurn> = (0..=MAX_TOOL_ROUNDS)
            .map(|i| ScriptedTurn::tool_call(&format!("call_{i}"), "page_text", json!({})))
            .collect();
        let h = harness(vec![("m1", turns)]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        let session = h.sessions.create().await;
        h.page.route_eval("innerText", json!({ "text": "x" }));

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session, "loop forever".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(final_reason(&chunks), Some(FinalReason::ToolLimit));
    }

    #[tokio::test]
    async fn every_tool_start_pairs_with_exactly_one_tool_end() {
        let h = harness(vec![(
            "m1",
            vec![
                ScriptedTurn::tool_call("c1", "page_text", json!({})),
                ScriptedTurn::tool_call("c2", "no_such_tool", json!({})),
                ScriptedTurn::text("done"),
            ],
        )]);
        h.orchestrator.registry().set_config("m1").await.unwrap();
        h.page.route_eval("innerText", json!({ "text": "body" }));
        let session = h.sessions.create().await;

        let (rx, _cancel) = h
            .orchestrator
            .send_message(session, "go".into(), None)
            .await
            .unwrap();
        let chunks = collect(rx).await;

        let starts: Vec<&String> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolStart { call_id, .. } => Some(call_id),
                _ => None,
            })
            .collect();
        let ends: Vec<&String> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolEnd { call_id, .. } => Some(call_id),
                _ => None,
            })
            .collect();
        assert_eq!(starts, ends);
        assert_eq!(starts.len(), 2);

        // The unknown tool came back as a structured error, and the loop
        // carried on to the final text turn.
        assert!(chunks.iter().any(|c| matches!(
            c,
            StreamChunk::ToolEnd { error: Some(e), .. } if e.contains("no_such_tool")
        )));
        assert_eq!(final_reason(&chunks), Some(FinalReason::Stop));
    }
}
