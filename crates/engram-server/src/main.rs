//! Engram server: HTTP introspection surface and background runtime host
//! for the associative memory core.
//!
//! Serves the wire API (graph, scoring, facts, events, loops) over JSON,
//! streams live events over a WebSocket, and drives the consolidation,
//! decay, and health loops with cooperative shutdown on Ctrl-C.

mod routes;
mod state;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use engram_core::{Core, CoreConfig, Mode, Runtime};

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "engram-server", version, about = "Associative memory engine for local-LLM assistants")]
struct Cli {
    /// Custom data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file; omitted sections use the documented defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Open the demo database instead of the primary one
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and background loops (default)
    Serve {
        /// Port to bind on 127.0.0.1
        #[arg(long, default_value_t = 3930)]
        port: u16,
    },
    /// Run one consolidation sweep and exit
    Consolidate {
        /// Consolidate a single session instead of every pending one
        #[arg(long)]
        session: Option<String>,
    },
    /// Print a health snapshot and exit
    Stats,
}

fn load_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => CoreConfig::default(),
    };
    if cli.demo {
        config.storage_mode = Mode::Demo;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout stays clean for command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let core = Arc::new(Core::open(config, cli.data_dir.clone()).context("opening storage")?);

    match cli.command.unwrap_or(Command::Serve { port: 3930 }) {
        Command::Serve { port } => serve(core, port).await,
        Command::Consolidate { session } => {
            let reports = match session {
                Some(session) => vec![core.consolidate(&session)?],
                None => core.consolidate_all()?,
            };
            for report in &reports {
                println!(
                    "session {}: {} promoted, {} updated, {} duplicates, {} deferred, {} discarded",
                    report.session_id,
                    report.promoted,
                    report.updated,
                    report.duplicates,
                    report.deferred,
                    report.discarded,
                );
            }
            if reports.is_empty() {
                println!("nothing pending");
            }
            Ok(())
        }
        Command::Stats => {
            let health = core.health()?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
    }
}

async fn serve(core: Arc<Core>, port: u16) -> anyhow::Result<()> {
    info!(version = engram_core::VERSION, mode = %core.mode(), "engram server starting");

    let runtime = Arc::new(Runtime::start(Arc::clone(&core)));
    let state = AppState::new(Arc::clone(&core), Arc::clone(&runtime));
    let app = routes::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down background runtime");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
