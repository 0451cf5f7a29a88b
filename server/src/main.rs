//! Codescout binary: a thin CLI shell over the [`codescout_server`]
//! library crate.

use clap::Parser;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use codescout_server::api::{router, AppContext};
use codescout_server::config::{default_data_dir, ServiceConfig};
use codescout_server::mcp::run_stdio;
use codescout_server::mcp_http::{mcp_router, prune_idle_sessions, McpAppContext, McpSession};
use codescout_server::supervisor::Supervisor;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Live code-index daemon: symbol search, dependency graph, and commit
/// lineage over HTTP and MCP.
#[derive(Parser)]
#[command(name = "codescout", version, about, long_about = None)]
struct Cli {
    /// Data directory (default: $CODESCOUT_DATA or ~/.codescout)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to codescout.toml (default: <data-dir>/codescout.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Register a project path at startup (repeatable)
    #[arg(long = "project", value_name = "PATH")]
    projects: Vec<PathBuf>,

    /// Run as MCP stdio server (for AI tool clients)
    #[arg(long)]
    mcp: bool,

    /// Shared secret for the HTTP API (overrides config)
    #[arg(long)]
    api_key: Option<String>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1
    #[arg(long)]
    bind_all: bool,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codescout=info".parse().expect("static directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Resolve data dir and config (CLI flag > config file > default).
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = cli.config.clone().unwrap_or_else(|| data_dir.join("codescout.toml"));
    let mut config = match ServiceConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }
    let data_dir = cli.data_dir.or(config.data_dir.clone()).unwrap_or(data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        error!(path = %data_dir.display(), error = %e, "cannot create data directory");
        std::process::exit(1);
    }

    let api_key: Option<Arc<str>> = config.api_key.clone().map(|k| Arc::from(k.as_str()));
    let supervisor = Arc::new(Supervisor::new(data_dir.clone(), config));

    // Restore registered projects, then apply any --project flags.
    if let Err(e) = supervisor.initialize() {
        error!(error = %e, "supervisor initialization failed");
        std::process::exit(1);
    }
    for path in &cli.projects {
        match supervisor.register(path) {
            Ok(project) => {
                info!(project = project.name.as_str(), id = project.id.as_str(), "registered")
            }
            Err(e) if e.tag() == "already_exists" => {
                debug!(path = %path.display(), "project already registered");
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to register project");
                std::process::exit(1);
            }
        }
    }

    info!(
        projects = supervisor.project_count(),
        data_dir = %data_dir.display(),
        "codescout ready"
    );

    if cli.mcp {
        run_stdio(Arc::clone(&supervisor));
        supervisor.shutdown();
        return;
    }

    // HTTP mode.
    let ctx = AppContext {
        supervisor: Arc::clone(&supervisor),
        api_key,
        start_time: std::time::Instant::now(),
    };

    let sessions: Arc<DashMap<String, McpSession>> = Arc::new(DashMap::new());
    let mcp_ctx =
        McpAppContext { supervisor: Arc::clone(&supervisor), sessions: Arc::clone(&sessions) };

    let app = router(ctx)
        .merge(mcp_router(mcp_ctx))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    // Prune idle MCP sessions every 5 minutes.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let pruned = prune_idle_sessions(&sessions);
            if pruned > 0 {
                debug!(pruned, remaining = sessions.len(), "pruned idle MCP sessions");
            }
        }
    });

    // Bind: explicit PORT wins, otherwise scan a small local range.
    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port, error = %e, "could not bind to port");
            std::process::exit(1);
        })
    } else {
        const BASE: u16 = 8460;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            if let Ok(l) = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                found = Some(l);
                break;
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "no free port found");
            eprintln!("  Try: PORT=<port> codescout");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    info!(port, "http://localhost:{port}");
    info!("MCP HTTP transport at /mcp");
    // Machine-readable line for scripts (not through tracing).
    eprintln!("CODESCOUT_PORT={port}");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        warn!(error = %e, "server exited with error");
    }
    supervisor.shutdown();
}
