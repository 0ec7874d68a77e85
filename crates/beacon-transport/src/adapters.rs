//! Thin adapters binding a live [`Socket`] to the `beacon-rpc`/`beacon-state`
//! transport traits those crates define against their own abstractions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use beacon_state::{AckOutcome, SlotUpdateRequest, UpdateTransport};

use crate::connection::Socket;
use crate::protocol::{build_update_request, parse_update_ack, event, Envelope};

/// Round-trip deadline for one versioned-update attempt: a 15s ack timeout
/// per attempt, with the slot's own retry loop handling the rest.
const UPDATE_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Adapts a [`Socket`] into `beacon_state::UpdateTransport` for one
/// versioned slot, identified by the wire key its value is carried under.
pub struct SocketUpdateTransport {
    socket: Arc<Socket>,
    slot_key: &'static str,
}

impl SocketUpdateTransport {
    /// `slot_key` must match the key the server echoes the updated value
    /// under (`"metadata"`, `"agentState"`, `"daemonState"`).
    #[must_use]
    pub fn new(socket: Arc<Socket>, slot_key: &'static str) -> Self {
        Self { socket, slot_key }
    }
}

#[async_trait]
impl UpdateTransport for SocketUpdateTransport {
    async fn send_update(&self, request: SlotUpdateRequest) -> Result<AckOutcome, String> {
        let ack_id = Uuid::new_v4().to_string();
        let envelope = build_update_request(&request.method, request.expected_version, request.value, &ack_id);
        let reply = self
            .socket
            .send_with_ack(envelope, UPDATE_ACK_TIMEOUT)
            .await
            .map_err(|err| err.to_string())?;
        parse_update_ack(&reply.data, self.slot_key).map_err(|err| err.to_string())
    }
}

/// Adapts a [`Socket`] into `beacon_rpc::Transport`, used only to announce
/// method (de)registration.
pub struct SocketRpcTransport {
    socket: Arc<Socket>,
}

impl SocketRpcTransport {
    /// Wrap `socket` for RPC-registration announcements.
    #[must_use]
    pub fn new(socket: Arc<Socket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl beacon_rpc::Transport for SocketRpcTransport {
    async fn send_register(&self, method: &str) {
        let envelope = Envelope::new(event::RPC_REGISTER, json!({ "method": method }));
        if let Err(err) = self.socket.send(&envelope).await {
            tracing::debug!(%err, method, "rpc-register send skipped, not connected");
        }
    }
}
