//! Machine-only RPCs layered on top of the generic sandboxed handlers:
//! `spawn-happy-session`, `stop-session`, `stop-daemon`.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use beacon_core::SessionId;
use beacon_rpc::RpcRegistry;

use crate::daemon::Daemon;
use crate::sessions::spawn_session;

/// Delay between acking `stop-daemon` and actually tearing the process
/// down, so the ack has time to reach the peer first.
const STOP_DAEMON_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnHappySessionArgs {
    #[serde(default)]
    tag: Option<String>,
    directory: String,
    #[serde(default)]
    approved_new_directory_creation: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopSessionArgs {
    session_id: SessionId,
}

/// Register `spawn-happy-session`, `stop-session`, and `stop-daemon` on the
/// machine connector's `rpc`. Every handler upgrades `daemon` fresh on each
/// call and reports a transient "daemon shutting down" error if it no
/// longer exists.
pub async fn install_machine_rpc(daemon: Weak<Daemon>, rpc: &RpcRegistry) {
    let d = daemon.clone();
    rpc.register(
        "spawn-happy-session",
        Box::new(move |params: Value| {
            let daemon = d.clone();
            Box::pin(async move { spawn_happy_session(daemon, params).await })
        }),
    )
    .await;

    let d = daemon.clone();
    rpc.register(
        "stop-session",
        Box::new(move |params: Value| {
            let daemon = d.clone();
            Box::pin(async move { stop_session(daemon, params).await })
        }),
    )
    .await;

    let d = daemon;
    rpc.register(
        "stop-daemon",
        Box::new(move |_params: Value| {
            let daemon = d.clone();
            Box::pin(async move { stop_daemon(daemon).await })
        }),
    )
    .await;
}

async fn spawn_happy_session(daemon: Weak<Daemon>, params: Value) -> Result<Value, String> {
    let daemon = daemon.upgrade().ok_or_else(|| "daemon shutting down".to_string())?;
    let args: SpawnHappySessionArgs = serde_json::from_value(params).map_err(|e| e.to_string())?;

    let directory = PathBuf::from(&args.directory);
    match tokio::fs::metadata(&directory).await {
        Ok(meta) if meta.is_dir() => {},
        Ok(_) => return Err(format!("{} exists and is not a directory", args.directory)),
        Err(_) if args.approved_new_directory_creation => {
            tokio::fs::create_dir_all(&directory)
                .await
                .map_err(|err| format!("failed to create {}: {err}", args.directory))?;
        },
        Err(_) => {
            return Ok(json!({
                "type": "requestToApproveDirectoryCreation",
                "directory": args.directory,
            }));
        },
    }

    let tag = args.tag.unwrap_or_else(|| args.directory.clone());
    let (machine_metadata, _) = daemon.machine.metadata().current().await;

    let handle = spawn_session(
        daemon.config.clone(),
        &daemon.bootstrap,
        &tag,
        &machine_metadata.host,
        directory,
        Arc::clone(&daemon.home),
        Arc::clone(&daemon.uploads),
    )
    .await
    .map_err(|err| err.to_string())?;

    let session_id = handle.id.clone();
    daemon.track_session(handle).await;

    Ok(json!({ "sessionId": session_id.as_str() }))
}

async fn stop_session(daemon: Weak<Daemon>, params: Value) -> Result<Value, String> {
    let daemon = daemon.upgrade().ok_or_else(|| "daemon shutting down".to_string())?;
    let args: StopSessionArgs = serde_json::from_value(params).map_err(|e| e.to_string())?;
    daemon.stop_session(&args.session_id).await.map_err(|err| err.to_string())?;
    Ok(json!({}))
}

async fn stop_daemon(daemon: Weak<Daemon>) -> Result<Value, String> {
    tokio::spawn(async move {
        tokio::time::sleep(STOP_DAEMON_DELAY).await;
        if let Some(daemon) = daemon.upgrade() {
            daemon.shutdown().await;
        }
    });
    Ok(json!({}))
}
