//! Machine Connector: the single machine-scoped `WebSocket` connection, its
//! versioned metadata/daemon-state slots, and its RPC registry.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};

use beacon_core::{Backoff, DaemonConfig, DaemonState, EpochMillis, MachineMetadata};
use beacon_rpc::{RpcOutcome, RpcRegistry};
use beacon_state::VersionedSlot;

use crate::adapters::{SocketRpcTransport, SocketUpdateTransport};
use crate::connection::Socket;
use crate::error::TransportError;
use crate::heartbeat::run_alive_ticker;
use crate::protocol::{event, AuthPayload, Envelope};
use crate::ws_url;

/// Owns the machine-scoped connection for the lifetime of the daemon
/// process. Reconnects with full-jitter exponential backoff on any
/// disconnect; handler registrations and versioned-slot state survive
/// reconnection untouched.
pub struct MachineConnector {
    config: DaemonConfig,
    rpc: Arc<RpcRegistry>,
    metadata: Arc<VersionedSlot<MachineMetadata>>,
    daemon_state: Arc<VersionedSlot<DaemonState>>,
    current_socket: watch::Sender<Option<Arc<Socket>>>,
}

impl MachineConnector {
    /// Construct a connector seeded with the machine record returned by
    /// the HTTP bootstrap call.
    #[must_use]
    pub fn new(
        config: DaemonConfig,
        metadata: MachineMetadata,
        metadata_version: u64,
        daemon_state: DaemonState,
        daemon_state_version: u64,
    ) -> Arc<Self> {
        let (current_socket, _) = watch::channel(None);
        Arc::new(Self {
            rpc: Arc::new(RpcRegistry::new(config.machine_id.as_str())),
            metadata: Arc::new(VersionedSlot::new(metadata, metadata_version)),
            daemon_state: Arc::new(VersionedSlot::new(daemon_state, daemon_state_version)),
            config,
            current_socket,
        })
    }

    /// The RPC registry handlers are installed on.
    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcRegistry> {
        &self.rpc
    }

    /// The versioned machine-metadata slot.
    #[must_use]
    pub fn metadata(&self) -> &Arc<VersionedSlot<MachineMetadata>> {
        &self.metadata
    }

    /// The versioned daemon-state slot.
    #[must_use]
    pub fn daemon_state(&self) -> &Arc<VersionedSlot<DaemonState>> {
        &self.daemon_state
    }

    /// Propose a new machine metadata value, computed from the current one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if no connection is live
    /// after a 15s wait, or wraps a [`beacon_state::StateError`].
    pub async fn update_metadata<F>(&self, mutator: F) -> Result<(), TransportError>
    where
        F: Fn(&MachineMetadata) -> MachineMetadata,
    {
        let socket = self.wait_for_socket().await?;
        let transport = SocketUpdateTransport::new(socket, "metadata");
        self.metadata
            .update("update-metadata", mutator, &transport, self.config.reconnect_backoff)
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    /// Propose a new daemon state value, computed from the current one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_metadata`].
    pub async fn update_daemon_state<F>(&self, mutator: F) -> Result<(), TransportError>
    where
        F: Fn(&DaemonState) -> DaemonState,
    {
        let socket = self.wait_for_socket().await?;
        let transport = SocketUpdateTransport::new(socket, "daemonState");
        self.daemon_state
            .update("update-state", mutator, &transport, self.config.reconnect_backoff)
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    /// Bounded 15s wait for a live connection.
    async fn wait_for_socket(&self) -> Result<Arc<Socket>, TransportError> {
        if let Some(socket) = self.current_socket.subscribe().borrow().clone() {
            return Ok(socket);
        }
        let mut rx = self.current_socket.subscribe();
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(socket) = rx.borrow().clone() {
                    return Some(socket);
                }
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(15), wait)
            .await
            .ok()
            .flatten()
            .ok_or(TransportError::NotConnected)
    }

    /// Run the connect/reconnect loop until `shutdown_rx` fires.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let machine_id = self.config.machine_id.to_string();
        tokio::spawn(run_alive_ticker(
            self.config.heartbeat_interval(),
            event::MACHINE_ALIVE,
            self.current_socket.subscribe(),
            shutdown_rx.resubscribe(),
            move || {
                json!({
                    "machineId": machine_id,
                    "time": EpochMillis::now().as_millis(),
                })
            },
        ));

        let mut backoff = Backoff::from_config(self.config.reconnect_backoff);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return,
                result = self.connect_and_serve() => {
                    if let Err(err) = result {
                        tracing::warn!(%err, "machine connector disconnected, reconnecting");
                    }
                    let delay = backoff.next_delay();
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => return,
                        () = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }

    async fn connect_and_serve(&self) -> Result<(), TransportError> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
        let url = format!("{}?clientType=machine-scoped", ws_url(&self.config.server_url));
        let socket = Socket::connect(&url, inbound_tx).await?;

        let auth = AuthPayload::Machine {
            token: self.config.bearer_token.clone(),
            machine_id: self.config.machine_id.to_string(),
        };
        socket.send(&Envelope::new("auth", auth.to_value())).await?;

        self.rpc
            .on_connect(Arc::new(SocketRpcTransport::new(Arc::clone(&socket))))
            .await;
        let _ = self.current_socket.send(Some(Arc::clone(&socket)));

        // Announce we're running. Best-effort — a failure here must not
        // tear down the connection that just succeeded.
        let pid = std::process::id();
        if let Err(err) = self
            .update_daemon_state(move |current| beacon_core::DaemonState {
                status: beacon_core::DaemonStatus::Running,
                pid,
                http_port: current.http_port,
                started_at: current.started_at,
                shutdown_requested_at: None,
                shutdown_source: None,
            })
            .await
        {
            tracing::warn!(%err, "failed to announce running daemon state, ignoring");
        }

        while let Some(envelope) = inbound_rx.recv().await {
            self.dispatch(&socket, envelope).await;
        }

        self.rpc.on_disconnect();
        let _ = self.current_socket.send(None);
        Ok(())
    }

    async fn dispatch(&self, socket: &Arc<Socket>, envelope: Envelope) {
        match envelope.event.as_str() {
            event::UPDATE => self.dispatch_update(&envelope.data).await,
            event::RPC_REQUEST => self.dispatch_rpc_request(socket, envelope).await,
            event::ERROR => tracing::warn!(data = %envelope.data, "peer reported error"),
            other => tracing::debug!(event = other, "unhandled event on machine connector"),
        }
    }

    async fn dispatch_update(&self, data: &Value) {
        let Some("update-machine") = data.get("t").and_then(Value::as_str) else {
            tracing::debug!(?data, "ignoring non-machine update broadcast");
            return;
        };
        let slot = data.get("slot").and_then(Value::as_str).unwrap_or("metadata");
        let version = data.get("version").and_then(Value::as_u64).unwrap_or(0);
        let value = data.get("value").cloned().unwrap_or(Value::Null);
        match slot {
            "metadata" => {
                self.metadata.apply_broadcast(version, value).await;
            },
            "daemonState" => {
                self.daemon_state.apply_broadcast(version, value).await;
            },
            other => tracing::warn!(slot = other, "unknown machine slot in broadcast"),
        }
    }

    async fn dispatch_rpc_request(&self, socket: &Arc<Socket>, envelope: Envelope) {
        let Some(ack_id) = envelope.ack_id else {
            tracing::warn!("rpc-request without ack_id, dropping");
            return;
        };
        let method = envelope
            .data
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = envelope
            .data
            .get("params")
            .cloned()
            .unwrap_or(Value::Null)
            .to_string();

        let outcome = self.rpc.handle_request(&method, &params).await;
        let reply_data = match outcome {
            RpcOutcome::Result(value) => json!({ "result": value }),
            RpcOutcome::Error(message) => json!({ "error": message }),
        };
        let reply = Envelope::with_ack("rpc-response", reply_data, ack_id);
        if let Err(err) = socket.send(&reply).await {
            tracing::debug!(%err, method, "failed to send rpc-response");
        }
    }
}
