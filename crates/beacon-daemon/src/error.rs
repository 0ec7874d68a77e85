//! Top-level error unifying every crate's own error type at the wiring
//! layer.
//!
//! Nothing below this crate ever returns [`BeaconError`] — each `beacon-*`
//! crate keeps propagating its own error type internally. This enum only
//! exists because the daemon binary's boot sequence (HTTP bootstrap, sandbox
//! construction, connector startup) touches all of them in sequence and
//! needs one `?`-able return type to do it with.

/// Failure modes surfaced while booting or steering the daemon.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    /// The HTTP bootstrap or a `WebSocket` connector failed.
    #[error(transparent)]
    Transport(#[from] beacon_transport::TransportError),
    /// The configured working directory or blobs root is not usable as a
    /// sandbox root.
    #[error(transparent)]
    Sandbox(#[from] beacon_sandbox::SandboxError),
    /// A session has no known id to operate on.
    #[error("unknown session {0}")]
    UnknownSession(beacon_core::SessionId),
}
