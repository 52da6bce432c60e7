//! # steer
//!
//! HTTP service wiring for the steer browser agent: sessions CRUD, the
//! SSE message stream, LLM configuration endpoints and status.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use steer_agent::llm::registry::LlmConfigStore;
use steer_agent::{ModelRegistry, Orchestrator, SessionManager, ToolRegistry};
use steer_browser::page::Browser;
use steer_browser::Executor;

/// Process-wide state: the session registry, the LLM registry and the
/// browser-facing executor. Built once at startup, torn down explicitly,
/// passed by reference everywhere.
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ModelRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<Executor>,
}

impl AppState {
    /// Default production wiring over a browser collaborator and a config
    /// store.
    pub fn new(browser: Arc<dyn Browser>, store: Arc<dyn LlmConfigStore>) -> Arc<Self> {
        let registry = Arc::new(ModelRegistry::new(store));
        Self::assemble(browser, registry)
    }

    /// Wiring with a caller-supplied model registry (tests splice in
    /// scripted models this way).
    pub fn assemble(browser: Arc<dyn Browser>, registry: Arc<ModelRegistry>) -> Arc<Self> {
        let executor = Arc::new(Executor::new(browser));
        let tools = Arc::new(ToolRegistry::new(executor.clone()));
        let orchestrator = Arc::new(Orchestrator::new(registry.clone(), tools));
        Arc::new(Self {
            sessions: Arc::new(SessionManager::new()),
            registry,
            orchestrator,
            executor,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/sessions",
            post(routes::create_session).get(routes::list_sessions),
        )
        .route(
            "/sessions/:id",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/:id/messages", post(routes::send_message))
        .route("/llm/config", post(routes::set_llm_config))
        .route("/llm/reload", post(routes::reload_llm))
        .route("/mcp/status", get(routes::mcp_status))
        .with_state(state)
}
