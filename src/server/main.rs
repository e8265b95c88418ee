//! PQC Signaling Server - Main Entry Point
//!
//! Hosts the signaling service until Ctrl-C, then drains all connections.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use pqc_signaling::{ServerConfig, SignalingServer};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pqc-signal-server")]
#[command(about = "PQC Signaling Server - peer rendezvous with post-quantum key advertisement")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override signaling port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    // Load configuration
    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config.to_string_lossy())?
    } else {
        info!("Config file not found, using defaults");
        ServerConfig::default()
    };
    if let Some(host) = args.host {
        config.signaling_host = host;
    }
    if let Some(port) = args.port {
        config.signaling_port = port;
    }
    if config.auth.api_secret.is_none() {
        info!("No api_secret configured, registration tokens will not be checked");
    }

    let server = Arc::new(SignalingServer::new(config)?);
    let listener = server.bind().await?;

    let mut serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    tokio::select! {
        result = &mut serve => return result?,
        signal = tokio::signal::ctrl_c() => signal?,
    }
    info!("Shutdown signal received, closing connections");
    server.stop();

    serve.await??;
    Ok(())
}
