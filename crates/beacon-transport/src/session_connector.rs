//! Session Connector: one session-scoped `WebSocket` connection, its
//! versioned metadata/agent-state slots, its RPC registry, its terminal
//! multiplexer, and the inbound user-message queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use beacon_core::{
    AgentState, Backoff, DaemonConfig, EpochMillis, SessionId, SessionMetadata, SessionSummary,
    TerminalId,
};
use beacon_rpc::{RpcOutcome, RpcRegistry};
use beacon_state::VersionedSlot;
use beacon_terminal::{TerminalEvent, TerminalRegistry};
use uuid::Uuid;

use crate::adapters::{SocketRpcTransport, SocketUpdateTransport};
use crate::connection::Socket;
use crate::error::TransportError;
use crate::heartbeat::run_alive_ticker;
use crate::protocol::{event, AuthPayload, Envelope};
use crate::ws_url;

/// Inbound messages (user-facing or generic) are buffered FIFO until a
/// consumer registers, up to this many entries, so a disconnected-consumer
/// session cannot grow without limit.
pub const MESSAGE_QUEUE_CAPACITY: usize = 1024;

struct MessageQueue {
    buffered: VecDeque<Value>,
    consumer: Option<mpsc::Sender<Value>>,
}

/// A `new-message` payload is user-facing iff its `role` is `"user"` — the
/// shape [`SessionConnector::send_user_text`] sends outbound. Anything else
/// (agent output, `codex` payloads, session events) is a non-user payload
/// and is routed to the generic `message` consumer instead.
fn is_user_facing_message(payload: &Value) -> bool {
    payload.get("role").and_then(Value::as_str) == Some("user")
}

/// Owns one session-scoped connection for the lifetime of the session.
pub struct SessionConnector {
    config: DaemonConfig,
    session_id: SessionId,
    rpc: Arc<RpcRegistry>,
    metadata: Arc<VersionedSlot<SessionMetadata>>,
    agent_state: Arc<VersionedSlot<AgentState>>,
    terminals: Arc<TerminalRegistry>,
    terminal_events: Mutex<Option<mpsc::Receiver<(TerminalId, TerminalEvent)>>>,
    current_socket: watch::Sender<Option<Arc<Socket>>>,
    messages: Mutex<MessageQueue>,
    generic_messages: Mutex<MessageQueue>,
    thinking: AtomicBool,
    mode: StdMutex<Option<String>>,
}

impl SessionConnector {
    /// Construct a connector seeded with the session record returned by
    /// the HTTP bootstrap call. `working_path` roots pseudo-terminals
    /// opened on this session, when the session's workspace is known.
    #[must_use]
    pub fn new(
        config: DaemonConfig,
        session_id: SessionId,
        metadata: SessionMetadata,
        metadata_version: u64,
        agent_state: AgentState,
        agent_state_version: u64,
        working_path: Option<std::path::PathBuf>,
    ) -> Arc<Self> {
        let (current_socket, _) = watch::channel(None);
        let (terminal_events_tx, terminal_events_rx) = mpsc::channel(1024);
        Arc::new(Self {
            rpc: Arc::new(RpcRegistry::new(session_id.as_str())),
            metadata: Arc::new(VersionedSlot::new(metadata, metadata_version)),
            agent_state: Arc::new(VersionedSlot::new(agent_state, agent_state_version)),
            terminals: TerminalRegistry::new(working_path, terminal_events_tx),
            terminal_events: Mutex::new(Some(terminal_events_rx)),
            session_id,
            config,
            current_socket,
            messages: Mutex::new(MessageQueue {
                buffered: VecDeque::new(),
                consumer: None,
            }),
            generic_messages: Mutex::new(MessageQueue {
                buffered: VecDeque::new(),
                consumer: None,
            }),
            thinking: AtomicBool::new(false),
            mode: StdMutex::new(None),
        })
    }

    /// The RPC registry handlers are installed on.
    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcRegistry> {
        &self.rpc
    }

    /// The versioned session-metadata slot.
    #[must_use]
    pub fn metadata(&self) -> &Arc<VersionedSlot<SessionMetadata>> {
        &self.metadata
    }

    /// The versioned agent-state slot.
    #[must_use]
    pub fn agent_state(&self) -> &Arc<VersionedSlot<AgentState>> {
        &self.agent_state
    }

    /// This session's terminal multiplexer.
    #[must_use]
    pub fn terminals(&self) -> &Arc<TerminalRegistry> {
        &self.terminals
    }

    /// Register the single consumer of inbound user-facing messages
    /// (`role: "user"`), flushing anything already buffered to it in
    /// arrival order before returning. A second call replaces the previous
    /// consumer (buffered messages are not re-delivered to it).
    pub async fn on_message(&self, consumer: mpsc::Sender<Value>) {
        Self::register_consumer(&self.messages, consumer).await;
    }

    /// Register the consumer of non-user `new-message` payloads (agent
    /// output, `codex` payloads, session events) — the generic `message`
    /// event agent adapters listen on. Same drain/replace semantics as
    /// [`Self::on_message`].
    pub async fn on_generic_message(&self, consumer: mpsc::Sender<Value>) {
        Self::register_consumer(&self.generic_messages, consumer).await;
    }

    async fn register_consumer(queue: &Mutex<MessageQueue>, consumer: mpsc::Sender<Value>) {
        let mut queue = queue.lock().await;
        while let Some(message) = queue.buffered.pop_front() {
            if consumer.send(message).await.is_err() {
                break;
            }
        }
        queue.consumer = Some(consumer);
    }

    /// Route an inbound `new-message` payload to the user-facing consumer
    /// if it parses as one (`role: "user"`), otherwise to the generic
    /// `message` consumer.
    async fn push_message(&self, message: Value) {
        if is_user_facing_message(&message) {
            Self::push_to(&self.messages, message, &self.session_id, "user message").await;
        } else {
            Self::push_to(&self.generic_messages, message, &self.session_id, "generic message").await;
        }
    }

    async fn push_to(queue: &Mutex<MessageQueue>, message: Value, session_id: &SessionId, kind: &str) {
        let mut queue = queue.lock().await;
        if let Some(consumer) = queue.consumer.clone() {
            if consumer.send(message).await.is_ok() {
                return;
            }
            queue.consumer = None;
        }
        if queue.buffered.len() >= MESSAGE_QUEUE_CAPACITY {
            queue.buffered.pop_front();
            tracing::warn!(%session_id, kind, "inbound message queue full, dropping oldest");
        }
        queue.buffered.push_back(message);
    }

    /// Propose a new session metadata value, computed from the current one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if no connection is live
    /// after a 15s wait, or wraps a [`beacon_state::StateError`].
    pub async fn update_metadata<F>(&self, mutator: F) -> Result<(), TransportError>
    where
        F: Fn(&SessionMetadata) -> SessionMetadata,
    {
        let socket = self.wait_for_socket().await?;
        let transport = SocketUpdateTransport::new(socket, "metadata");
        self.metadata
            .update("update-metadata", mutator, &transport, self.config.reconnect_backoff)
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    /// Propose a new agent-state value, computed from the current one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_metadata`].
    pub async fn update_agent_state<F>(&self, mutator: F) -> Result<(), TransportError>
    where
        F: Fn(&AgentState) -> AgentState,
    {
        let socket = self.wait_for_socket().await?;
        let transport = SocketUpdateTransport::new(socket, "agentState");
        self.agent_state
            .update("update-state", mutator, &transport, self.config.reconnect_backoff)
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    /// Tell the server this session has ended. Best-effort: silently
    /// skipped if not currently connected.
    pub async fn end_session(&self, reason: &str) {
        if let Some(socket) = self.current_socket.subscribe().borrow().clone() {
            let envelope = Envelope::new(event::SESSION_END, json!({ "reason": reason }));
            if let Err(err) = socket.send(&envelope).await {
                tracing::debug!(%err, "failed to send session-end");
            }
        }
        self.terminals.close_all().await;
    }

    async fn wait_for_socket(&self) -> Result<Arc<Socket>, TransportError> {
        self.wait_for_socket_within(Duration::from_secs(15)).await
    }

    async fn wait_for_socket_within(&self, timeout: Duration) -> Result<Arc<Socket>, TransportError> {
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
        tokio::time::timeout(timeout, wait).await.ok().flatten().ok_or(TransportError::NotConnected)
    }

    /// Update the best-effort "thinking" flag carried on `session-alive`
    /// ticks.
    pub fn set_thinking(&self, thinking: bool) {
        self.thinking.store(thinking, Ordering::Relaxed);
    }

    /// Update the best-effort "mode" string carried on `session-alive`
    /// ticks.
    pub fn set_mode(&self, mode: Option<String>) {
        if let Ok(mut guard) = self.mode.lock() {
            *guard = mode;
        }
    }

    /// Current permission mode, as last set by [`Self::set_mode`].
    #[must_use]
    pub fn mode(&self) -> Option<String> {
        self.mode.lock().ok().and_then(|guard| guard.clone())
    }

    /// Record a new summary for this session, opportunistically mirrored
    /// into `SessionMetadata.summary`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_metadata`].
    pub async fn record_summary(&self, text: String) -> Result<(), TransportError> {
        let updated_at = EpochMillis::now();
        self.update_metadata(move |current| {
            let mut next = current.clone();
            next.summary = Some(SessionSummary {
                text: text.clone(),
                updated_at,
            });
            next
        })
        .await
    }

    /// Send an arbitrary message payload on this session's `message`
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if no connection is live
    /// after a 15s wait.
    pub async fn send_message(&self, content: Value) -> Result<(), TransportError> {
        let socket = self.wait_for_socket().await?;
        let envelope = Envelope::new(
            event::MESSAGE,
            json!({ "sid": self.session_id.as_str(), "message": content }),
        );
        socket.send(&envelope).await
    }

    /// Send a plain user-authored text message.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_message`].
    pub async fn send_user_text(&self, text: &str) -> Result<(), TransportError> {
        self.send_message(json!({ "role": "user", "content": text })).await
    }

    /// Send an agent `output` message.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_message`].
    pub async fn send_agent_output(&self, content: Value) -> Result<(), TransportError> {
        self.send_message(json!({ "role": "agent", "type": "output", "content": content }))
            .await
    }

    /// Send a `codex`-flavored agent payload.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_message`].
    pub async fn send_codex_message(&self, payload: Value) -> Result<(), TransportError> {
        self.send_message(json!({ "role": "agent", "type": "codex", "payload": payload }))
            .await
    }

    /// Send a session lifecycle/event message — `ready`, `switch`,
    /// `permission-mode-changed`, or any other event name the agent
    /// adapter wants to surface.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_message`].
    pub async fn send_session_event(&self, kind: &str, value: Value) -> Result<(), TransportError> {
        self.send_message(json!({ "role": "event", "event": kind, "value": value })).await
    }

    /// Best-effort drain before a hand-off or shutdown: wait for any
    /// in-flight metadata/agent-state updates to settle, then (re)confirm
    /// the connection is actually live by round-tripping a `ping`. Every
    /// step is bounded by what remains of `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckTimeout`] if `timeout` elapses before
    /// the drain and ping round-trip complete.
    pub async fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let remaining = || deadline.saturating_duration_since(Instant::now());

        tokio::time::timeout(remaining(), async {
            self.metadata.flush().await;
            self.agent_state.flush().await;
        })
        .await
        .map_err(|_| TransportError::AckTimeout)?;

        let socket = self.wait_for_socket_within(remaining()).await?;
        let ack_id = Uuid::new_v4().to_string();
        socket.send_with_ack(Envelope::with_ack(event::PING, json!({}), ack_id), remaining()).await?;
        Ok(())
    }

    /// Run the connect/reconnect loop until `shutdown_rx` fires.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let alive_payload_source = Arc::clone(&self);
        tokio::spawn(run_alive_ticker(
            self.config.heartbeat_interval(),
            event::SESSION_ALIVE,
            self.current_socket.subscribe(),
            shutdown_rx.resubscribe(),
            move || {
                json!({
                    "sid": alive_payload_source.session_id.as_str(),
                    "time": EpochMillis::now().as_millis(),
                    "thinking": alive_payload_source.thinking.load(Ordering::Relaxed),
                    "mode": alive_payload_source.mode.lock().ok().and_then(|guard| guard.clone()),
                })
            },
        ));

        if let Some(terminal_events) = self.terminal_events.lock().await.take() {
            tokio::spawn(Self::forward_terminal_events(
                Arc::clone(&self),
                terminal_events,
                shutdown_rx.resubscribe(),
            ));
        }

        let mut backoff = Backoff::from_config(self.config.reconnect_backoff);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.end_session("shutdown").await;
                    return;
                },
                result = self.connect_and_serve() => {
                    if let Err(err) = result {
                        tracing::warn!(%err, session_id = %self.session_id, "session connector disconnected, reconnecting");
                    }
                    self.terminals.close_all().await;
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

    async fn forward_terminal_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<(TerminalId, TerminalEvent)>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return,
                next = events.recv() => {
                    let Some((terminal_id, event)) = next else { return };
                    let Some(socket) = self.current_socket.subscribe().borrow().clone() else {
                        tracing::debug!(%terminal_id, "dropping terminal event, not connected");
                        continue;
                    };
                    let envelope = terminal_event_envelope(&terminal_id, event);
                    if let Err(err) = socket.send(&envelope).await {
                        tracing::debug!(%err, %terminal_id, "failed to forward terminal event");
                    }
                },
            }
        }
    }

    async fn connect_and_serve(&self) -> Result<(), TransportError> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
        let url = format!("{}?clientType=session-scoped", ws_url(&self.config.server_url));
        let socket = Socket::connect(&url, inbound_tx).await?;

        let auth = AuthPayload::Session {
            token: self.config.bearer_token.clone(),
            session_id: self.session_id.to_string(),
        };
        socket.send(&Envelope::new("auth", auth.to_value())).await?;

        self.rpc
            .on_connect(Arc::new(SocketRpcTransport::new(Arc::clone(&socket))))
            .await;
        let _ = self.current_socket.send(Some(Arc::clone(&socket)));

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
            event::TERMINAL_OPEN => self.dispatch_terminal_open(&envelope.data).await,
            event::TERMINAL_WRITE => self.dispatch_terminal_write(&envelope.data).await,
            event::TERMINAL_RESIZE => self.dispatch_terminal_resize(&envelope.data).await,
            event::TERMINAL_CLOSE => self.dispatch_terminal_close(&envelope.data).await,
            event::ERROR => tracing::warn!(data = %envelope.data, "peer reported error"),
            other => tracing::debug!(event = other, "unhandled event on session connector"),
        }
    }

    async fn dispatch_update(&self, data: &Value) {
        match data.get("t").and_then(Value::as_str) {
            Some("new-message") => {
                self.push_message(data.get("message").cloned().unwrap_or(Value::Null)).await;
            },
            Some("update-session") => {
                let slot = data.get("slot").and_then(Value::as_str).unwrap_or("metadata");
                let version = data.get("version").and_then(Value::as_u64).unwrap_or(0);
                let value = data.get("value").cloned().unwrap_or(Value::Null);
                match slot {
                    "metadata" => {
                        self.metadata.apply_broadcast(version, value).await;
                    },
                    "agentState" => {
                        self.agent_state.apply_broadcast(version, value).await;
                    },
                    other => tracing::warn!(slot = other, "unknown session slot in broadcast"),
                }
            },
            other => tracing::debug!(?other, "ignoring unrecognized update discriminant"),
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

    async fn dispatch_terminal_open(&self, data: &Value) {
        let Some(id) = terminal_id(data) else { return };
        let cols = data.get("cols").and_then(Value::as_u64).unwrap_or(80) as u16;
        let rows = data.get("rows").and_then(Value::as_u64).unwrap_or(24) as u16;
        if let Err(err) = self.terminals.open(id.clone(), cols, rows).await {
            tracing::warn!(%err, %id, "failed to open terminal");
        }
    }

    async fn dispatch_terminal_write(&self, data: &Value) {
        let Some(id) = terminal_id(data) else { return };
        let Some(text) = data.get("data").and_then(Value::as_str) else { return };
        if let Err(err) = self.terminals.write(&id, text.as_bytes().to_vec()).await {
            tracing::warn!(%err, %id, "failed to write to terminal");
        }
    }

    async fn dispatch_terminal_resize(&self, data: &Value) {
        let Some(id) = terminal_id(data) else { return };
        let cols = data.get("cols").and_then(Value::as_u64).unwrap_or(80) as u16;
        let rows = data.get("rows").and_then(Value::as_u64).unwrap_or(24) as u16;
        if let Err(err) = self.terminals.resize(&id, cols, rows).await {
            tracing::warn!(%err, %id, "failed to resize terminal");
        }
    }

    async fn dispatch_terminal_close(&self, data: &Value) {
        let Some(id) = terminal_id(data) else { return };
        self.terminals.close(&id).await;
    }
}

fn terminal_id(data: &Value) -> Option<TerminalId> {
    data.get("terminalId")
        .and_then(Value::as_str)
        .map(TerminalId::new)
}

fn terminal_event_envelope(terminal_id: &TerminalId, terminal_event: TerminalEvent) -> Envelope {
    match terminal_event {
        TerminalEvent::Ready => Envelope::new(event::TERMINAL_READY, json!({ "terminalId": terminal_id.as_str() })),
        TerminalEvent::Output(bytes) => Envelope::new(
            event::TERMINAL_OUTPUT,
            json!({ "terminalId": terminal_id.as_str(), "data": String::from_utf8_lossy(&bytes) }),
        ),
        TerminalEvent::Exit { exit_code } => Envelope::new(
            event::TERMINAL_EXIT,
            json!({ "terminalId": terminal_id.as_str(), "exitCode": exit_code }),
        ),
        TerminalEvent::Error(message) => Envelope::new(
            event::TERMINAL_ERROR,
            json!({ "terminalId": terminal_id.as_str(), "error": message }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::config::BackoffConfig;
    use beacon_core::{AgentState, DaemonConfig, MachineId, SessionMetadata};

    fn connector() -> Arc<SessionConnector> {
        let config = DaemonConfig {
            server_url: "https://example.com".into(),
            bearer_token: "token".into(),
            machine_id: MachineId::new("m1"),
            working_directory: std::path::PathBuf::new(),
            blobs_root: std::path::PathBuf::new(),
            heartbeat_ms: 20_000,
            reconnect_backoff: BackoffConfig::default(),
        };
        let metadata = SessionMetadata {
            working_path: "/tmp".into(),
            host: "host".into(),
            agent: "claude".into(),
            tools: vec![],
            slash_commands: vec![],
            summary: None,
            ended: false,
        };
        SessionConnector::new(
            config,
            SessionId::new("s1"),
            metadata,
            1,
            AgentState::default(),
            1,
            None,
        )
    }

    #[test]
    fn user_role_is_user_facing() {
        assert!(is_user_facing_message(&json!({ "role": "user", "content": "hi" })));
    }

    #[test]
    fn agent_and_event_payloads_are_not_user_facing() {
        assert!(!is_user_facing_message(&json!({ "role": "agent", "type": "output", "content": {} })));
        assert!(!is_user_facing_message(&json!({ "role": "event", "event": "ready" })));
        assert!(!is_user_facing_message(&Value::Null));
    }

    #[tokio::test]
    async fn user_message_routes_to_on_message_consumer() {
        let connector = connector();
        let (tx, mut rx) = mpsc::channel(4);
        connector.on_message(tx).await;
        connector.push_message(json!({ "role": "user", "content": "hello" })).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received["content"], "hello");
    }

    #[tokio::test]
    async fn non_user_message_routes_to_generic_consumer() {
        let connector = connector();
        let (user_tx, mut user_rx) = mpsc::channel(4);
        let (generic_tx, mut generic_rx) = mpsc::channel(4);
        connector.on_message(user_tx).await;
        connector.on_generic_message(generic_tx).await;

        connector
            .push_message(json!({ "role": "agent", "type": "output", "content": "thinking" }))
            .await;

        let received = generic_rx.recv().await.unwrap();
        assert_eq!(received["type"], "output");
        assert!(user_rx.try_recv().is_err(), "non-user payload must not reach the user consumer");
    }

    #[tokio::test]
    async fn messages_buffer_until_a_consumer_registers() {
        let connector = connector();
        connector.push_message(json!({ "role": "user", "content": "buffered" })).await;

        let (tx, mut rx) = mpsc::channel(4);
        connector.on_message(tx).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received["content"], "buffered");
    }
}
