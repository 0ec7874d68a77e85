//! HTTP bootstrap: `getOrCreateMachine` / `getOrCreateSession`.
//!
//! Plain bearer-authenticated JSON POSTs via `reqwest`, matching the
//! teacher's `reqwest` dependency line and its 60s default timeout for
//! one-shot coordination-service calls.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use beacon_core::{
    AgentState, DaemonState, EpochMillis, Machine, MachineId, MachineMetadata, Session,
    SessionId, SessionMetadata,
};

use crate::error::TransportError;

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

/// The outer shape of a bootstrap response, excluding the inner
/// `metadata`/`daemonState`/`agentState` slots. Parsed strictly: corruption
/// here means the response itself is malformed and the call fails (fatal,
/// per the error taxonomy). Unknown fields (the inner slots, among others)
/// are ignored by serde's default behavior.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineShell {
    id: MachineId,
    seq: u64,
    created_at: EpochMillis,
    updated_at: EpochMillis,
    active: bool,
    #[serde(default)]
    active_at: Option<EpochMillis>,
    metadata_version: u64,
    daemon_state_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionShell {
    id: SessionId,
    seq: u64,
    created_at: EpochMillis,
    updated_at: EpochMillis,
    active: bool,
    #[serde(default)]
    active_at: Option<EpochMillis>,
    metadata_version: u64,
    agent_state_version: u64,
    #[serde(default)]
    thinking: Option<bool>,
    #[serde(default)]
    permission_mode: Option<String>,
    #[serde(default)]
    model_mode: Option<String>,
}

/// Deserialize `raw.get(key)` into `T`, tolerating a malformed or missing
/// value: returns `None` instead of propagating the error. Used for the
/// inner `metadata`/`daemonState`/`agentState` slots, which a valid
/// bootstrap response may still carry corrupted (a stale schema, a partial
/// write) without the rest of the response being untrustworthy.
fn lenient_field<T: serde::de::DeserializeOwned>(raw: &Value, key: &str) -> Option<T> {
    raw.get(key).cloned().and_then(|value| serde_json::from_value(value).ok())
}

/// Thin HTTP client for the two bootstrap calls. Holds the server base URL
/// and bearer token; stateless otherwise.
pub struct BootstrapClient {
    client: reqwest::Client,
    server_url: String,
    bearer_token: String,
}

impl BootstrapClient {
    /// Build a client with a 60s request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the underlying `reqwest::Client`
    /// fails to build (e.g. an invalid TLS configuration).
    pub fn new(server_url: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(BOOTSTRAP_TIMEOUT).build()?;
        Ok(Self {
            client,
            server_url: server_url.into(),
            bearer_token: bearer_token.into(),
        })
    }

    /// `POST /cli/machines` — register or fetch this machine's record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] on a transport/HTTP failure or
    /// [`TransportError::Json`] if the response body does not match the
    /// expected shape.
    pub async fn get_or_create_machine(
        &self,
        machine_id: &str,
        metadata: &MachineMetadata,
        daemon_state: Option<&DaemonState>,
    ) -> Result<Machine, TransportError> {
        let body = json!({
            "id": machine_id,
            "metadata": metadata,
            "daemonState": daemon_state,
        });
        let response: Value = self.post("/cli/machines", &body).await?;
        let machine = response
            .get("machine")
            .cloned()
            .ok_or_else(|| TransportError::Protocol("missing machine in response".to_string()))?;
        let shell: MachineShell = serde_json::from_value(machine.clone())?;

        let resolved_metadata = lenient_field(&machine, "metadata").unwrap_or_else(|| {
            tracing::warn!(
                %machine_id,
                "bootstrap response metadata is malformed, falling back to the requested value"
            );
            metadata.clone()
        });
        let resolved_daemon_state = lenient_field(&machine, "daemonState").unwrap_or_else(|| {
            tracing::warn!(
                %machine_id,
                "bootstrap response daemonState is malformed, falling back to a fresh state"
            );
            daemon_state
                .cloned()
                .unwrap_or_else(|| DaemonState::started(std::process::id(), None))
        });

        Ok(Machine {
            id: shell.id,
            seq: shell.seq,
            created_at: shell.created_at,
            updated_at: shell.updated_at,
            active: shell.active,
            active_at: shell.active_at,
            metadata: resolved_metadata,
            metadata_version: shell.metadata_version,
            daemon_state: resolved_daemon_state,
            daemon_state_version: shell.daemon_state_version,
        })
    }

    /// `POST /cli/sessions` — register a new session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] on a transport/HTTP failure or
    /// [`TransportError::Json`] if the response body does not match the
    /// expected shape.
    pub async fn get_or_create_session(
        &self,
        tag: &str,
        metadata: &SessionMetadata,
        agent_state: &AgentState,
    ) -> Result<Session, TransportError> {
        let body = json!({
            "tag": tag,
            "metadata": metadata,
            "agentState": agent_state,
        });
        let response: Value = self.post("/cli/sessions", &body).await?;
        let session = response
            .get("session")
            .cloned()
            .ok_or_else(|| TransportError::Protocol("missing session in response".to_string()))?;
        let shell: SessionShell = serde_json::from_value(session.clone())?;

        let resolved_metadata = lenient_field(&session, "metadata").unwrap_or_else(|| {
            tracing::warn!(
                %tag,
                "bootstrap response metadata is malformed, falling back to the requested value"
            );
            metadata.clone()
        });
        let resolved_agent_state = lenient_field(&session, "agentState").unwrap_or_else(|| {
            tracing::warn!(
                %tag,
                "bootstrap response agentState is malformed, falling back to the requested value"
            );
            agent_state.clone()
        });

        Ok(Session {
            id: shell.id,
            seq: shell.seq,
            created_at: shell.created_at,
            updated_at: shell.updated_at,
            active: shell.active,
            active_at: shell.active_at,
            metadata: resolved_metadata,
            metadata_version: shell.metadata_version,
            agent_state: resolved_agent_state,
            agent_state_version: shell.agent_state_version,
            thinking: shell.thinking,
            permission_mode: shell.permission_mode,
            model_mode: shell.model_mode,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let url = format!("{}{path}", self.server_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
