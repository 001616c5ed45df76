//! Surge control server
//!
//! Binds the WebSocket control channel and the REST surface, wires the
//! driver registry, config store, and session orchestrator together, and
//! shuts everything down in order on ctrl-c.

mod api;
mod config;
mod protocol;
mod state;
mod store;
mod ws;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use config::ServerConfig;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::ConfigStore;
use surge_engine::runtime::CANCEL_GRACE;
use surge_engine::{SessionEvent, SessionOrchestrator, SessionParameters, WorkerRuntime};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "surge")]
#[command(version, about = "Controllable load-generation harness", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "surge.toml", global = true)]
    config: PathBuf,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Accept session starts even when no relay matches (direct mode)
    #[arg(long, global = true)]
    allow_empty: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch a single attack from the terminal and exit
    Attack {
        /// Driver id (http_flood, http_bypass, http_slowloris, tcp_flood,
        /// minecraft_ping)
        method: String,

        /// Target URL, host:port, or bare host
        target: String,

        /// Duration in seconds
        #[arg(long, default_value = "60")]
        duration: u64,

        /// Packet delay in milliseconds
        #[arg(long, default_value = "500")]
        delay: u64,

        /// Packet size in bytes
        #[arg(long, default_value = "512")]
        packet_size: usize,
    },
}

#[tokio::main]
async fn main() -> surge_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "surge=info,surge_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    let registry = Arc::new(surge_drivers::builtin());
    let driver_count = registry.len();
    let store = Arc::new(ConfigStore::load(&config));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        registry.clone(),
        store.clone(),
        WorkerRuntime::new(),
        cli.allow_empty,
    ));

    if let Some(Commands::Attack {
        method,
        target,
        duration,
        delay,
        packet_size,
    }) = cli.command
    {
        return run_attack(orchestrator, method, target, duration, delay, packet_size).await;
    }

    let state = AppState {
        registry,
        store,
        orchestrator: orchestrator.clone(),
    };

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/methods", get(api::list_methods))
        .route(
            "/configuration",
            get(api::get_configuration).post(api::put_configuration),
        )
        .route("/health", get(api::health))
        .layer(cors_layer(&config.allowed_origin))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    info!(%addr, drivers = driver_count, "Surge control server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Listener is down; give in-flight workers the runtime's grace to
    // wind down before the process exits.
    orchestrator
        .shutdown(CANCEL_GRACE + Duration::from_secs(1))
        .await;
    info!("Shutdown complete");
    Ok(())
}

/// Headless one-shot mode: run one session to completion, printing its
/// telemetry, with ctrl-c mapped to a cooperative stop.
async fn run_attack(
    orchestrator: Arc<SessionOrchestrator>,
    method: String,
    target: String,
    duration: u64,
    delay: u64,
    packet_size: usize,
) -> surge_core::Result<()> {
    let session = Uuid::new_v4();
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let started = orchestrator.start(
        session,
        SessionParameters {
            target: target.clone(),
            driver: method.clone(),
            duration: Duration::from_secs(duration),
            packet_delay: Duration::from_millis(delay),
            packet_size,
        },
        tx,
    )?;
    info!(
        method = %method,
        target = %target,
        relays = started.relays,
        "Attack started"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping attack");
                orchestrator.stop(session);
            }
            event = rx.recv() => match event {
                Some(SessionEvent::Stats(s)) => match &s.log {
                    Some(log) => info!(
                        pps = s.pps,
                        total = s.total,
                        relays = s.relays,
                        log = %log.key,
                        "stats"
                    ),
                    None => info!(pps = s.pps, total = s.total, relays = s.relays, "stats"),
                },
                Some(SessionEvent::Ended { total, outcome }) => {
                    info!(total, ?outcome, "Attack ended");
                    break;
                }
                None => break,
            }
        }
    }
    Ok(())
}

fn cors_layer(origin: &str) -> CorsLayer {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "Invalid allowed_origin, CORS left permissive");
            CorsLayer::permissive()
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
