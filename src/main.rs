//! # Transkriptor Backend - Main Application Entry Point
//!
//! HTTP service that turns a YouTube URL or an uploaded audio/video file into a
//! transcript, as plain text or SubRip subtitles.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: requests, jobs and subprocesses all run on the tokio runtime
//! - **modules**: one module per pipeline component
//! - **Result<T, E>**: startup uses `anyhow`, request handling uses `AppError`
//! - **Arc**: shared application state
//! - **static**: the shutdown flag lives for the entire program duration
//!
//! ## Application Architecture:
//! - **config**: configuration (defaults, config.toml, environment variables)
//! - **job**: job model and its one-way state machine
//! - **workspace**: one private directory per job, released on every exit path
//! - **process / pool**: scoped subprocesses and the bounded worker pool
//! - **acquire → extract → transcription → format**: the pipeline stages
//! - **orchestrator**: runs the stages under the job deadline
//! - **handlers / health / middleware / state**: the HTTP surface

mod acquire;
mod config;
mod error;
mod extract;
mod format;
mod handlers;
mod health;
mod job;
mod middleware;
mod orchestrator;
mod pool;
mod process;
mod state;
mod transcription;
mod workspace;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use orchestrator::Orchestrator;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler; polled by [`wait_for_shutdown`].
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Sweeps orphaned workspaces** left by a previous crash
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transkriptor-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let orchestrator = Orchestrator::from_config(&config).context("failed to prepare the workspace root")?;

    let report = orchestrator.workspaces().sweep_orphans();
    info!(
        root = %orchestrator.workspaces().root().display(),
        orphaned = report.orphaned,
        husks = report.husks,
        failed = report.failed,
        "workspace sweep finished"
    );
    for (name, program, found) in orchestrator.tool_availability() {
        if !found {
            warn!(tool = name, program = %program, "external tool not found on PATH");
        }
    }
    for tier in orchestrator.tier_info() {
        info!(
            position = tier.position,
            kind = %tier.kind,
            target = %tier.target,
            timeout_secs = tier.timeout_secs,
            available = tier.available,
            "transcription tier"
        );
    }

    let app_state = AppState::new(config.clone(), orchestrator);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // The front-end is served from another origin
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["content-disposition"])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .service(web::scope("/api/v1").configure(handlers::configure_routes))
            .configure(handlers::configure_routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // In-flight jobs get the graceful period; cancelled ones release
            // their workspace and subprocess through their guards
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout.
///
/// ## Environment Variables:
/// - `RUST_LOG`: e.g. `transkriptor_backend=trace`; defaults to
///   `transkriptor_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transkriptor_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install the tracing subscriber")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
