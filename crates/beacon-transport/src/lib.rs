//! Machine and Session Connectors: the persistent `WebSocket` clients that
//! carry RPC, versioned-state updates, and domain events (messages,
//! terminals) between this process and the coordination service, plus the
//! HTTP bootstrap calls that obtain the initial `Machine`/`Session` records.
//!
//! Socket.io has no maintained async Rust client, so [`protocol`] models
//! the wire format as a flat JSON envelope over a plain `tokio-tungstenite`
//! `WebSocket` rather than pulling in a socket.io-speaking dependency –
//! the same shape-over-raw-`WebSocket` approach the pack's Discord proxy
//! uses for the Gateway's own JSON envelope.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod bootstrap;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod machine_connector;
pub mod protocol;
pub mod session_connector;

pub use bootstrap::BootstrapClient;
pub use error::TransportError;
pub use machine_connector::MachineConnector;
pub use session_connector::SessionConnector;

/// Rewrite an `http(s)://` server base URL into the `ws(s)://.../cli`
/// `WebSocket` endpoint used for the daemon's single `cli` namespace.
#[must_use]
pub fn ws_url(server_url: &str) -> String {
    let rest = server_url
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| server_url.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
        .unwrap_or_else(|| server_url.to_string());
    format!("{}/cli", rest.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_https_to_wss() {
        assert_eq!(ws_url("https://api.example.com"), "wss://api.example.com/cli");
    }

    #[test]
    fn rewrites_http_to_ws() {
        assert_eq!(ws_url("http://localhost:3000"), "ws://localhost:3000/cli");
    }

    #[test]
    fn trims_trailing_slash_before_appending() {
        assert_eq!(ws_url("https://api.example.com/"), "wss://api.example.com/cli");
    }
}
