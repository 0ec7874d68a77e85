//! Runtime configuration consumed by the in-scope components.
//!
//! Loading this from a config file, environment variables, or a keychain is
//! the job of the CLI entrypoint (an external collaborator); this type only
//! models the already-resolved values the connector/RPC/sandbox stack needs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::MachineId;

/// Backoff bounds for WebSocket reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Minimum delay before the first retry, in milliseconds.
    pub base_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 5_000,
        }
    }
}

/// Configuration for one running daemon process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the coordination service (e.g. `https://api.example.com`).
    pub server_url: String,
    /// Bearer token used for HTTP and WebSocket authentication.
    pub bearer_token: String,
    /// This machine's id, as previously assigned by the coordination service.
    pub machine_id: MachineId,
    /// Default working directory new sessions are sandboxed to, absent an
    /// explicit override.
    pub working_directory: PathBuf,
    /// Root directory under which session upload staging directories are
    /// created.
    pub blobs_root: PathBuf,
    /// Machine heartbeat interval, in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// WebSocket reconnection backoff bounds.
    #[serde(default)]
    pub reconnect_backoff: BackoffConfig,
}

fn default_heartbeat_ms() -> u64 {
    20_000
}

impl DaemonConfig {
    /// The heartbeat interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

impl std::fmt::Display for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately omit `bearer_token` from any rendering of this config.
        write!(
            f,
            "DaemonConfig(machine={}, server={}, working_directory={})",
            self.machine_id,
            self.server_url,
            self.working_directory.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_leaks_the_bearer_token() {
        let cfg = DaemonConfig {
            server_url: "https://example.com".into(),
            bearer_token: "super-secret-token".into(),
            machine_id: MachineId::new("m1"),
            working_directory: PathBuf::from("/home/user/project"),
            blobs_root: PathBuf::from("/home/user/.beacon/blobs"),
            heartbeat_ms: default_heartbeat_ms(),
            reconnect_backoff: BackoffConfig::default(),
        };
        assert!(!format!("{cfg}").contains("super-secret-token"));
    }

    #[test]
    fn heartbeat_interval_matches_configured_ms() {
        let cfg = DaemonConfig {
            server_url: String::new(),
            bearer_token: String::new(),
            machine_id: MachineId::new("m"),
            working_directory: PathBuf::new(),
            blobs_root: PathBuf::new(),
            heartbeat_ms: 5_000,
            reconnect_backoff: BackoffConfig::default(),
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(5_000));
    }
}
