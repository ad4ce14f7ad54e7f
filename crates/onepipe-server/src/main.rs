//! onepipe: single-session TCP relay.
//!
//! Listens on a local port and forwards one client connection at a time to a
//! target host. Further clients are accepted and closed straight away while a
//! session is active.

mod config;

use clap::Parser;
use config::{CliOverrides, ServerConfig, TargetMode};
use onepipe_core::{transport, SessionGate, SessionHandler, SharedTarget, TargetSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// onepipe — forward one TCP connection at a time to a target
#[derive(Parser, Debug)]
#[command(name = "onepipe", version, about = "Single-session TCP relay")]
struct Cli {
    /// Enable debug log (per-read and per-write detail)
    #[arg(long)]
    debug: bool,

    /// Local listen port (required here or in the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Local listen host [default: localhost]
    #[arg(long)]
    listen_host: Option<String>,

    /// Proxied host [default: localhost]
    #[arg(long)]
    proxy_host: Option<String>,

    /// Proxied port [default: 80]
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Dial the target per session, or share one pre-dialed connection [default: dial]
    #[arg(long, value_enum)]
    mode: Option<TargetMode>,

    /// Read deadline on the target side in milliseconds, 0 disables it [default: 50]
    #[arg(long)]
    read_deadline_ms: Option<u64>,

    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            listen_host: self.listen_host.clone(),
            port: self.port,
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            mode: self.mode,
            read_deadline_ms: self.read_deadline_ms,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .init();

    let server_config = match ServerConfig::load(cli.config.as_deref(), cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = server_config.listen_port,
        target_addr = %server_config.target,
        mode = ?server_config.mode,
        "starting onepipe"
    );

    tokio::select! {
        result = run(server_config) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("onepipe stopped");
}

/// Set up the target, bind the listener and serve until the process ends.
async fn run(config: ServerConfig) -> onepipe_core::RelayResult<()> {
    let target = match config.mode {
        TargetMode::Dial => TargetSource::Dial(config.target.clone()),
        TargetMode::Shared => TargetSource::Shared(SharedTarget::connect(config.target.clone()).await?),
    };

    let listener = transport::bind(&config.listen_host, config.listen_port).await?;
    let handler = Arc::new(SessionHandler::new(SessionGate::new(), target, config.pipe));
    handler.run(listener).await;
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
