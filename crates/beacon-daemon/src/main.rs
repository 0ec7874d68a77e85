//! Process entrypoint for the `beacond` binary.
//!
//! Argument parsing, config-file loading, and credential persistence are
//! external collaborators — this binary only reads the handful of
//! environment variables the host is expected to already have resolved, and
//! wires them into a running [`Daemon`].

use std::path::PathBuf;

use beacon_core::{config::BackoffConfig, DaemonConfig, MachineId, MachineMetadata};
use beacon_daemon::Daemon;
use beacon_telemetry::logging::setup_default_logging;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> Result<(DaemonConfig, PathBuf), anyhow::Error> {
    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let server_url = std::env::var("BEACON_SERVER_URL")
        .map_err(|_| anyhow::anyhow!("BEACON_SERVER_URL must be set"))?;
    let bearer_token = std::env::var("BEACON_TOKEN")
        .map_err(|_| anyhow::anyhow!("BEACON_TOKEN must be set"))?;
    let machine_id = MachineId::new(env_or("BEACON_MACHINE_ID", &uuid::Uuid::new_v4().to_string()));
    let working_directory = std::env::var("BEACON_WORKING_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.clone());
    let blobs_root = std::env::var("BEACON_BLOBS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join(".beacon").join("blobs"));

    let config = DaemonConfig {
        server_url,
        bearer_token,
        machine_id,
        working_directory,
        blobs_root,
        heartbeat_ms: 20_000,
        reconnect_backoff: BackoffConfig::default(),
    };
    Ok((config, home))
}

fn machine_metadata(home: &PathBuf) -> MachineMetadata {
    MachineMetadata {
        host: hostname(),
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        home_dir: Some(home.display().to_string()),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    setup_default_logging().ok();

    let (config, home) = load_config()?;
    tracing::info!(%config, "starting beacon daemon");

    let daemon = Daemon::bootstrap(config, machine_metadata(&home), home).await?;

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::select! {
        () = daemon.run() => {},
        result = shutdown_signal => {
            if let Err(err) = result {
                tracing::warn!(%err, "failed to install ctrl-c handler");
            }
            tracing::info!("shutdown signal received");
            daemon.shutdown().await;
        },
    }

    Ok(())
}
