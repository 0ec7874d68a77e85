/// Failure modes from the WebSocket connectors and HTTP bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// HTTP error during bootstrap.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `WebSocket` connection closed with a code.
    #[error("connection closed with code {0}")]
    Closed(u16),

    /// No live connection when a send was attempted.
    #[error("not connected")]
    NotConnected,

    /// A request awaiting an ack did not receive one before its deadline.
    #[error("timed out waiting for ack")]
    AckTimeout,

    /// The peer replied with an envelope this side could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
