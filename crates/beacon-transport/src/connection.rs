//! `WebSocket` connection management, generalized from
//! `discord_proxy::connection` to the hand-rolled envelope in [`crate::protocol`].

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::protocol::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live `WebSocket` connection, split into a writer guarded by a mutex
/// (multiple tasks may send concurrently) and an ack-routing table shared
/// with the reader task spawned by [`Socket::connect`].
pub struct Socket {
    writer: Mutex<SplitSink<WsStream, Message>>,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl Socket {
    /// Connect to `url` and spawn a reader task that routes ack replies
    /// back to [`Socket::send_with_ack`] callers and forwards every other
    /// envelope onto `inbound`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] on connection or TLS failure.
    pub async fn connect(
        url: &str,
        inbound: mpsc::Sender<Envelope>,
    ) -> Result<std::sync::Arc<Self>, TransportError> {
        let (ws, _response) = connect_async(url).await?;
        let (writer, reader) = ws.split();

        let socket = std::sync::Arc::new(Self {
            writer: Mutex::new(writer),
            pending_acks: Mutex::new(HashMap::new()),
        });

        tokio::spawn(Self::run_reader(std::sync::Arc::clone(&socket), reader, inbound));

        Ok(socket)
    }

    async fn run_reader(
        socket: std::sync::Arc<Self>,
        mut reader: SplitStream<WsStream>,
        inbound: mpsc::Sender<Envelope>,
    ) {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
                        tracing::warn!("discarding malformed envelope: {text}");
                        continue;
                    };
                    socket.dispatch(envelope, &inbound).await;
                },
                Some(Ok(
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_),
                )) => {},
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope, inbound: &mpsc::Sender<Envelope>) {
        if let Some(ack_id) = envelope.ack_id.clone() {
            let waiter = self.pending_acks.lock().await.remove(&ack_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(envelope);
                return;
            }
        }
        let _ = inbound.send(envelope).await;
    }

    /// Send `envelope`, ignoring no reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the underlying send fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = serde_json::to_string(envelope)?;
        self.writer.lock().await.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send `envelope` (which must carry an `ack_id`) and await the
    /// matching reply, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckTimeout`] if no reply arrives in time.
    pub async fn send_with_ack(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        let ack_id = envelope
            .ack_id
            .clone()
            .ok_or_else(|| TransportError::Protocol("send_with_ack requires an ack_id".to_string()))?;
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().await.insert(ack_id.clone(), tx);

        if let Err(err) = self.send(&envelope).await {
            self.pending_acks.lock().await.remove(&ack_id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => {
                self.pending_acks.lock().await.remove(&ack_id);
                Err(TransportError::AckTimeout)
            },
        }
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the send fails.
    pub async fn close(&self, code: u16) -> Result<(), TransportError> {
        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: code.into(),
            reason: "closing".into(),
        };
        self.writer.lock().await.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips() {
        let env = Envelope::with_ack("update-metadata", json!({"a": 1}), "id-1");
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.event, "update-metadata");
        assert_eq!(back.ack_id.as_deref(), Some("id-1"));
    }
}
