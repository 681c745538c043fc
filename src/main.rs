#![forbid(unsafe_code)]

//! `reducto-bridge`: host side of the reducto sidecar protocol.
//!
//! `serve` answers JSON-RPC requests on this process's own stdio.
//! `spawn` launches the configured sidecar and serves it over its pipes.
//! Logs always go to stderr; stdout carries protocol frames only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use reducto_bridge::config::BridgeConfig;
use reducto_bridge::host::server::serve;
use reducto_bridge::host::spawner::{spawn_sidecar, terminate, TERMINATE_GRACE};
use reducto_bridge::host::HostServer;
use reducto_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the host protocol on this process's stdin/stdout.
    Serve,
    /// Spawn the configured sidecar and serve it over its pipes.
    Spawn,
}

#[derive(Debug, Parser)]
#[command(name = "reducto-bridge", about = "Host/sidecar JSON-RPC bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Override the workspace root.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("reducto-bridge bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A blocking stdin read may still be parked; do not wait for it.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config, args.workspace)?;
    info!(workspace = %config.workspace_root.display(), backend = ?config.checkpoint_backend, "configuration loaded");

    let host = Arc::new(HostServer::from_config(&config));
    let ct = CancellationToken::new();

    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let result = match args.command {
        Command::Serve => serve(host, tokio::io::stdin(), tokio::io::stdout(), ct.clone())
            .await
            .map(|exit| info!(?exit, "serve finished")),
        Command::Spawn => run_spawn(&config, host, ct.clone()).await,
    };

    signal_handle.abort();
    if let Err(err) = &result {
        error!(%err, "reducto-bridge failed");
    }
    info!("reducto-bridge shut down");
    result
}

fn load_config(path: Option<PathBuf>, workspace: Option<PathBuf>) -> Result<BridgeConfig> {
    match (path, workspace) {
        (Some(path), workspace) => {
            let mut config = BridgeConfig::load_from_path(path)?;
            if let Some(ws) = workspace {
                config.override_workspace(ws)?;
            }
            Ok(config)
        }
        (None, Some(ws)) => BridgeConfig::for_workspace(ws),
        (None, None) => {
            let cwd = std::env::current_dir()
                .map_err(|err| AppError::Config(format!("cannot determine working directory: {err}")))?;
            BridgeConfig::for_workspace(cwd)
        }
    }
}

async fn run_spawn(config: &BridgeConfig, host: Arc<HostServer>, ct: CancellationToken) -> Result<()> {
    let sidecar = config
        .sidecar
        .as_ref()
        .ok_or_else(|| AppError::Config("`spawn` needs a [sidecar] section".into()))?;

    let mut process = spawn_sidecar(sidecar, &config.workspace_root).await?;
    let served = serve(host, process.stdout, process.stdin, ct).await;

    // EOF means the sidecar closed stdout, usually because it exited.
    let status = terminate(&mut process.child, TERMINATE_GRACE).await;
    info!(?status, "sidecar stopped");

    let exit = served?;
    info!(?exit, "serve finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
