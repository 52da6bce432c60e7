use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use steer::{build_router, AppState};
use steer_agent::llm::registry::MemoryConfigStore;
use steer_agent::LlmConfig;
use steer_browser::page::{Browser, DetachedBrowser};

#[derive(Parser)]
#[command(name = "steer")]
#[command(about = "Backend service that lets a language-model agent drive a web browser")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8920")]
    bind: String,

    /// JSON file with an array of LLM configurations to seed the store
    #[arg(long)]
    llm_configs: Option<PathBuf>,

    /// Config id to bind as the current model at startup
    #[arg(long)]
    default_config: Option<String>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let store = Arc::new(MemoryConfigStore::new());
    if let Some(path) = &cli.llm_configs {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("reading {}: {e}", path.display()))?;
        let configs: Vec<LlmConfig> =
            serde_json::from_str(&raw).map_err(|e| format!("parsing {}: {e}", path.display()))?;
        info!(count = configs.len(), "loaded llm configs");
        for config in configs {
            store.insert(config);
        }
    }

    // The browser launcher is an external collaborator; until one registers
    // a live page, executor verbs report NoActivePage.
    let browser: Arc<dyn Browser> = Arc::new(DetachedBrowser);
    let state = AppState::new(browser.clone(), store);

    if let Some(id) = &cli.default_config {
        state
            .registry
            .set_config(id)
            .await
            .map_err(|e| e.to_string())?;
    } else {
        warn!("no default llm config; set one via POST /llm/config");
    }

    let addr: SocketAddr = cli.bind.parse().map_err(|e| format!("--bind: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("binding {addr}: {e}"))?;
    info!("listening on http://{addr}");

    let router = build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| e.to_string())?;

    // Sessions first, the browser collaborator last.
    state.sessions.shutdown().await;
    browser.close();
    info!("bye");
    Ok(())
}
