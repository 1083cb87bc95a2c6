mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use libloopcsi::{CsiServer, LoopBackend, VolumeManager};

use crate::config::{DriverArgs, DriverConfig, LogFormat, Profile};

#[tokio::main]
async fn main() {
    let args = DriverArgs::parse();
    init_tracing(args.log_format);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        eprintln!("failed to initialize tracing: {e}");
    }
}

async fn run(args: DriverArgs) -> Result<()> {
    let endpoint = args.endpoint.clone();
    let config = DriverConfig::try_from(args)?;

    if config.profile == Profile::Native && !nix::unistd::getuid().is_root() {
        warn!("not running as root; mkfs and mount will most likely fail");
    }

    let env = config.environment();
    env.prepare(&config.plugin_dirs())
        .await
        .context("failed to create plugin directories")?;

    let socket_path = env.real_path(&config.socket_path);
    let manager = VolumeManager::new(env, config.loop_config.clone());
    let backend = LoopBackend::new(manager, config.node_id.clone());
    let server = CsiServer::bind(&socket_path, Arc::new(backend))
        .await
        .with_context(|| format!("failed to listen on {}", socket_path.display()))?;

    info!(
        node_id = %config.node_id,
        %endpoint,
        profile = ?config.profile,
        backing_dir = %config.loop_config.backing_dir.display(),
        fs_type = %config.loop_config.fs_type,
        "csi loop driver started",
    );

    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("wait for ctrl-c")?;
            info!("interrupted, shutting down");
        }
        _ = terminate.recv() => info!("terminated, shutting down"),
    }

    if let Err(e) = tokio::fs::remove_file(server.socket_path()).await {
        warn!(error = %e, "failed to remove socket");
    }
    Ok(())
}
