//! Translate Server - standalone headless server for the real-time audio
//! translation pipeline.
//!
//! Wires `translate-core`'s session/connection store, WebSocket gateway,
//! ingest bus, and translation worker pool into a runnable HTTP server, and
//! drives graceful shutdown on Ctrl+C / SIGTERM.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use translate_core::ports::{FakeStt, FakeSynthesize, FakeTranslate, InMemoryBlobStore};
use translate_core::{bootstrap_services, start_server, AppState};

use crate::config::ServerConfig;

/// Translate Server - headless speaker-to-listener audio translation server.
#[derive(Parser, Debug)]
#[command(name = "translate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TRANSLATE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "TRANSLATE_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Translate Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    let core_config = config.to_core_config();
    log::info!(
        "Configuration: bind_port={}, batch_window_secs={}, worker_pool_size={}",
        core_config.preferred_port,
        core_config.batch_window_secs,
        core_config.worker_pool_size,
    );

    // STT/MT/TTS/blob-store are external collaborators specified only by
    // their port contract; this binary wires the in-memory reference
    // adapters by default. A production deployment injects real upstream
    // adapters at this same seam (see DESIGN.md).
    let services = bootstrap_services(
        core_config,
        Arc::new(FakeStt::new("transcribed audio")),
        Arc::new(FakeTranslate::new()),
        Arc::new(FakeSynthesize::new(16 * 1024)),
        Arc::new(InMemoryBlobStore::new()),
    );

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::builder().from_services(&services).build();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
