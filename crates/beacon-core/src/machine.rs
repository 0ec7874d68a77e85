//! The `Machine` record: a workstation or remote host running the daemon.

use serde::{Deserialize, Serialize};

use crate::ids::MachineId;
use crate::time::EpochMillis;

/// Host/platform information the daemon reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineMetadata {
    /// Hostname as reported by the OS.
    pub host: String,
    /// Platform string (e.g. `"darwin-arm64"`, `"linux-x86_64"`).
    pub platform: String,
    /// Version of the daemon/CLI binary.
    pub cli_version: String,
    /// Home directory layout marker (e.g. the daemon's data directory).
    #[serde(default)]
    pub home_dir: Option<String>,
}

/// Lifecycle status of the daemon process on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DaemonStatus {
    /// The daemon is accepting connections and serving RPCs.
    Running,
    /// The daemon has begun an orderly shutdown.
    ShuttingDown,
}

/// Runtime state of the daemon process, independently versioned from
/// [`MachineMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    /// Current lifecycle status.
    pub status: DaemonStatus,
    /// OS process id of the daemon.
    pub pid: u32,
    /// Local HTTP bootstrap port, if one is bound.
    #[serde(default)]
    pub http_port: Option<u16>,
    /// When this daemon process started.
    pub started_at: EpochMillis,
    /// When a shutdown was requested, if any.
    #[serde(default)]
    pub shutdown_requested_at: Option<EpochMillis>,
    /// What requested the shutdown (e.g. `"rpc"`, `"signal"`).
    #[serde(default)]
    pub shutdown_source: Option<String>,
}

impl DaemonState {
    /// Construct the initial daemon state for a freshly started process.
    #[must_use]
    pub fn started(pid: u32, http_port: Option<u16>) -> Self {
        Self {
            status: DaemonStatus::Running,
            pid,
            http_port,
            started_at: EpochMillis::now(),
            shutdown_requested_at: None,
            shutdown_source: None,
        }
    }

    /// Mark this state as shutting down, preserving everything else.
    #[must_use]
    pub fn mark_shutting_down(&self, source: impl Into<String>) -> Self {
        Self {
            status: DaemonStatus::ShuttingDown,
            shutdown_requested_at: Some(EpochMillis::now()),
            shutdown_source: Some(source.into()),
            ..self.clone()
        }
    }
}

/// A machine known to the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Opaque machine id.
    pub id: MachineId,
    /// Server-assigned monotonic sequence number.
    pub seq: u64,
    /// When the machine record was first created.
    pub created_at: EpochMillis,
    /// When the machine record was last updated.
    pub updated_at: EpochMillis,
    /// Liveness flag derived from heartbeats.
    pub active: bool,
    /// When the machine was last observed active.
    #[serde(default)]
    pub active_at: Option<EpochMillis>,
    /// Host/platform metadata.
    pub metadata: MachineMetadata,
    /// Version of `metadata`.
    pub metadata_version: u64,
    /// Daemon runtime state.
    pub daemon_state: DaemonState,
    /// Version of `daemon_state`.
    pub daemon_state_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_shutting_down_preserves_pid_and_port() {
        let started = DaemonState::started(1234, Some(8080));
        let stopping = started.mark_shutting_down("rpc");
        assert_eq!(stopping.pid, 1234);
        assert_eq!(stopping.http_port, Some(8080));
        assert_eq!(stopping.status, DaemonStatus::ShuttingDown);
        assert_eq!(stopping.shutdown_source.as_deref(), Some("rpc"));
        assert!(stopping.shutdown_requested_at.is_some());
    }

    #[test]
    fn daemon_status_wire_shape() {
        let json = serde_json::to_string(&DaemonStatus::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting-down\"");
    }
}
