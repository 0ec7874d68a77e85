//! Wire envelope standing in for `/socket.io/` framing.
//!
//! socket.io has no maintained Rust client, so inbound/outbound messages are
//! modeled as a flat JSON envelope over a plain `tokio-tungstenite`
//! `WebSocket`, the same way `discord_proxy::protocol` models the Discord
//! Gateway's own JSON envelope over a plain `WebSocket`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use beacon_state::AckOutcome;

use crate::error::TransportError;

/// One frame of the hand-rolled envelope: an event name, its JSON payload,
/// and an optional correlation id for request/ack pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire event name (e.g. `"update-metadata"`, `"rpc-request"`, `"terminal:open"`).
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Correlation id, present on requests that expect a reply and on the
    /// reply itself.
    #[serde(default, rename = "ackId", skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
}

impl Envelope {
    /// Construct an envelope with no ack correlation.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack_id: None,
        }
    }

    /// Construct an envelope carrying an ack id, used for requests that
    /// expect a reply.
    #[must_use]
    pub fn with_ack(event: impl Into<String>, data: Value, ack_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data,
            ack_id: Some(ack_id.into()),
        }
    }
}

/// Reserved wire event names shared between this daemon and the
/// coordination service.
pub mod event {
    /// Outbound: announce a newly registered RPC method.
    pub const RPC_REGISTER: &str = "rpc-register";
    /// Outbound: announce a method is no longer routed to us.
    pub const RPC_UNREGISTER: &str = "rpc-unregister";
    /// Inbound: an RPC call from the peer, expecting a reply via `ackId`.
    pub const RPC_REQUEST: &str = "rpc-request";
    /// Inbound: a versioned-slot broadcast, discriminated by `data.t`.
    pub const UPDATE: &str = "update";
    /// Outbound: a machine metadata update proposal.
    pub const UPDATE_METADATA: &str = "update-metadata";
    /// Outbound: a machine daemon-state update proposal.
    pub const UPDATE_STATE: &str = "update-state";
    /// Outbound/reserved for `machine-scoped` connections.
    pub const MACHINE_ALIVE: &str = "machine-alive";
    /// Outbound/reserved for `session-scoped` connections.
    pub const SESSION_ALIVE: &str = "session-alive";
    /// Outbound: tell the server the session has ended.
    pub const SESSION_END: &str = "session-end";
    /// Outbound: best-effort liveness ping.
    pub const PING: &str = "ping";
    /// Inbound/outbound: a chat message on a session-scoped connection.
    pub const MESSAGE: &str = "message";
    /// Inbound: a transport-level error report from the peer.
    pub const ERROR: &str = "error";
    /// Inbound/outbound: open a pseudo-terminal.
    pub const TERMINAL_OPEN: &str = "terminal:open";
    /// Inbound/outbound: write bytes to a pseudo-terminal.
    pub const TERMINAL_WRITE: &str = "terminal:write";
    /// Inbound/outbound: resize a pseudo-terminal.
    pub const TERMINAL_RESIZE: &str = "terminal:resize";
    /// Inbound/outbound: close a pseudo-terminal.
    pub const TERMINAL_CLOSE: &str = "terminal:close";
    /// Outbound: a pseudo-terminal is ready.
    pub const TERMINAL_READY: &str = "terminal:ready";
    /// Outbound: a chunk of pseudo-terminal output.
    pub const TERMINAL_OUTPUT: &str = "terminal:output";
    /// Outbound: a pseudo-terminal's child process exited.
    pub const TERMINAL_EXIT: &str = "terminal:exit";
    /// Outbound: a pseudo-terminal error.
    pub const TERMINAL_ERROR: &str = "terminal:error";
}

/// Auth payload sent immediately after the `WebSocket` handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthPayload {
    /// `clientType: "machine-scoped"`.
    Machine {
        /// Bearer token.
        token: String,
        /// This machine's id.
        machine_id: String,
    },
    /// `clientType: "session-scoped"`.
    Session {
        /// Bearer token.
        token: String,
        /// This session's id.
        session_id: String,
    },
}

impl AuthPayload {
    /// Render as the JSON value the handshake expects.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Machine { token, machine_id } => json!({
                "clientType": "machine-scoped",
                "token": token,
                "machineId": machine_id,
            }),
            Self::Session { token, session_id } => json!({
                "clientType": "session-scoped",
                "token": token,
                "sessionId": session_id,
            }),
        }
    }
}

/// Build the outbound envelope proposing a versioned-slot update.
#[must_use]
pub fn build_update_request(method: &str, expected_version: u64, value: Value, ack_id: &str) -> Envelope {
    Envelope::with_ack(
        method,
        json!({ "expectedVersion": expected_version, "value": value }),
        ack_id,
    )
}

/// Parse a versioned-update ack. `slot_key` is the wire key the updated
/// value is carried under (`"metadata"`, `"agentState"`, `"daemonState"`),
/// supplied by the caller since it already knows which slot it proposed a
/// change to.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if `result` is missing or not one
/// of the three recognized values.
pub fn parse_update_ack(raw: &Value, slot_key: &str) -> Result<AckOutcome, TransportError> {
    let result = raw
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::Protocol("update ack missing result".to_string()))?;

    match result {
        "success" => Ok(AckOutcome::Success {
            version: raw.get("version").and_then(Value::as_u64).unwrap_or(0),
            value: raw.get(slot_key).cloned().unwrap_or(Value::Null),
        }),
        "version-mismatch" => Ok(AckOutcome::VersionMismatch {
            version: raw.get("version").and_then(Value::as_u64).unwrap_or(0),
            value: raw.get(slot_key).cloned().unwrap_or(Value::Null),
        }),
        "error" => Ok(AckOutcome::Error),
        other => Err(TransportError::Protocol(format!("unknown update ack result {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_carries_ack_id() {
        let env = build_update_request("update-metadata", 3, json!({"host": "x"}), "abc");
        assert_eq!(env.event, "update-metadata");
        assert_eq!(env.ack_id.as_deref(), Some("abc"));
        assert_eq!(env.data["expectedVersion"], 3);
    }

    #[test]
    fn parses_success_ack() {
        let raw = json!({"result": "success", "version": 7, "metadata": {"host": "x"}});
        let outcome = parse_update_ack(&raw, "metadata").unwrap();
        assert!(matches!(outcome, AckOutcome::Success { version: 7, .. }));
    }

    #[test]
    fn parses_version_mismatch_ack() {
        let raw = json!({"result": "version-mismatch", "version": 9, "agentState": {}});
        let outcome = parse_update_ack(&raw, "agentState").unwrap();
        assert!(matches!(outcome, AckOutcome::VersionMismatch { version: 9, .. }));
    }

    #[test]
    fn parses_error_ack() {
        let raw = json!({"result": "error"});
        assert!(matches!(parse_update_ack(&raw, "metadata").unwrap(), AckOutcome::Error));
    }

    #[test]
    fn unknown_result_is_a_protocol_error() {
        let raw = json!({"result": "???"});
        assert!(parse_update_ack(&raw, "metadata").is_err());
    }

    #[test]
    fn auth_payload_shapes() {
        let m = AuthPayload::Machine { token: "t".into(), machine_id: "m1".into() }.to_value();
        assert_eq!(m["clientType"], "machine-scoped");
        let s = AuthPayload::Session { token: "t".into(), session_id: "s1".into() }.to_value();
        assert_eq!(s["clientType"], "session-scoped");
    }
}
