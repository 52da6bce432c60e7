//! Agent sessions - per-conversation state, entirely in memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::{ChatMessage, ChatModel};
use crate::{Error, Result};

/// One conversation: message history, the current model binding and the
/// cancellation token every worker observes.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    last_active_at: RwLock<DateTime<Utc>>,
    messages: RwLock<Vec<ChatMessage>>,
    /// Session-bound model; `None` falls through to the registry's current
    /// binding. Swapped and restored around one-shot overrides.
    model_binding: RwLock<Option<Arc<dyn ChatModel>>>,
    /// Held by the active send-message worker. At most one per session; a
    /// concurrent send is rejected with `SessionBusy`.
    busy: Arc<Mutex<()>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(cancel: CancellationToken) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            created_at: now,
            last_active_at: RwLock::new(now),
            messages: RwLock::new(Vec::new()),
            model_binding: RwLock::new(None),
            busy: Arc::new(Mutex::new(())),
            cancel,
            worker: Mutex::new(None),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Claim the session for one send-message request.
    pub fn try_begin(&self) -> Result<OwnedMutexGuard<()>> {
        self.busy
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::SessionBusy(self.id.clone()))
    }

    pub async fn touch(&self) {
        *self.last_active_at.write().await = Utc::now();
    }

    pub async fn push_message(&self, message: ChatMessage) {
        self.messages.write().await.push(message);
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    pub async fn binding(&self) -> Option<Arc<dyn ChatModel>> {
        self.model_binding.read().await.clone()
    }

    pub async fn set_binding(&self, binding: Option<Arc<dyn ChatModel>>) {
        *self.model_binding.write().await = binding;
    }

    pub async fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().await = Some(handle);
    }

    async fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().await.take()
    }

    /// JSON view served over HTTP.
    pub async fn view(&self) -> Value {
        let messages = self.messages.read().await;
        json!({
            "id": self.id,
            "created_at": self.created_at,
            "last_active_at": *self.last_active_at.read().await,
            "message_count": messages.len(),
            "messages": *messages,
        })
    }
}

/// Process-wide session map. Creation, lookup and deletion are explicit;
/// deletion cancels and awaits the session's worker before releasing it.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    root: CancellationToken,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.root.child_token()));
        info!(session_id = %session.id, "session created");
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Remove a session, cancel its live worker and wait for it to unwind.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        session.cancel.cancel();
        if let Some(worker) = session.take_worker().await {
            debug!(session_id = %session.id, "awaiting cancelled worker");
            let _ = worker.await;
        }
        info!(session_id = %session.id, "session deleted");
        Ok(())
    }

    /// Cancel every session. Called once on process shutdown, before the
    /// browser collaborator is closed.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let sessions: Vec<Arc<Session>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Some(worker) = session.take_worker().await {
                let _ = worker.await;
            }
        }
        info!("all sessions shut down");
    }
}
