//! Vigil Server - standalone headless video monitoring server.
//!
//! Wires the core services together, starts the delivery surface and the
//! background workers, and runs until a shutdown signal arrives.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use vigil_core::{bootstrap_services, start_server};

use crate::config::StreamProfile;

/// Vigil Server - real-time VLM video monitoring.
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VIGIL_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Upstream frame stream endpoint (overrides config file).
    #[arg(short, long, value_name = "HOST:PORT")]
    endpoint: Option<String>,

    /// Output directory for session data (overrides config file).
    #[arg(short, long, env = "VIGIL_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Bind port for the delivery surface (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Packager mode override.
    #[arg(long, value_enum)]
    stream_type: Option<StreamProfile>,

    /// Reattach to the most recent session directory under the output root
    /// instead of starting a new session.
    #[arg(long)]
    resume: bool,

    /// Disable the ASR question intake server.
    #[arg(long)]
    no_asr: bool,

    /// Enable the TTS summary fan-out worker.
    #[arg(long)]
    tts: bool,

    /// Start with sentry mode enabled.
    #[arg(long)]
    sentry: bool,

    /// Enable the MCP camera-control bridge.
    #[arg(long)]
    mcp: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Vigil Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(endpoint) = args.endpoint {
        config.ingest.endpoint = endpoint;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(profile) = args.stream_type {
        config::apply_stream_profile(&mut config, profile);
    }
    if args.resume {
        config.resume = true;
    }
    if args.no_asr {
        config.asr.enabled = false;
    }
    if args.tts {
        config.tts.enabled = true;
    }
    if args.sentry {
        config.sentry_enabled = true;
    }
    if args.mcp {
        config.mcp.enabled = true;
    }

    log::info!(
        "Configuration: endpoint={}, port={}, output={}, mode={}",
        config.ingest.endpoint,
        config.port,
        config.output_dir.display(),
        if config.packager.is_image_mode() { "image" } else { "video" },
    );

    let services = bootstrap_services(config).context("Failed to bootstrap services")?;
    services.start_background_tasks();

    let app_state = services.app_state();
    let port = app_state.config.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });
    log::info!("HTTP server started on port {}", port);

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
