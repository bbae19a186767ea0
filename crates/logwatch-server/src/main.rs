//! logwatch: live log monitoring server.
//!
//! Run with: `logwatch --config logwatch.toml`, then point a browser or
//! `curl -N` at `http://127.0.0.1:8000/logs/stream`.

mod config;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use logwatch_collect::LogArchive;
use logwatch_core::RemoteSession;
use logwatch_monitor::{Monitor, RuleGateway};
use logwatch_ssh::{Credentials, SshSession};
use logwatch_transport::{AppState, router};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{DEFAULT_CONFIG_FILE, LogConfig, LogFormat, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "logwatch",
    version,
    about = "Stream remote and local log sources to browsers over SSE",
    long_about = None,
)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "LOGWATCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the log filter (e.g. `debug`, `logwatch_ssh=trace`).
    #[arg(long, env = "LOGWATCH_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    init_tracing(&config.log);

    let credentials = Credentials::from_env();
    tracing::debug!(?credentials, "credentials loaded");
    let session: Arc<dyn RemoteSession> =
        Arc::new(SshSession::new(config.ssh.clone(), credentials));

    let archive = config
        .archive
        .clone()
        .map(LogArchive::open)
        .transpose()
        .context("failed to open archive")?
        .map(Arc::new);

    let monitor = Monitor::start(config.monitor.clone(), Arc::clone(&session), archive)
        .await
        .context("failed to start monitoring")?;
    let rules = config
        .rules
        .clone()
        .map(|rules| RuleGateway::new(Arc::clone(&session), rules));
    let app = router(AppState::new(monitor.context(), rules));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    // Stopping the monitor ends every SSE stream, which lets the server drain.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            monitor.stop().await;
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Console => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown requested");
}
