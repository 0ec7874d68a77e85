//! Shared data model for the beacon agent-control daemon.
//!
//! This crate owns the types every other `beacon-*` crate agrees on: opaque
//! ids, the `Machine`/`Session` records, the wire shape of a versioned slot,
//! and the daemon's runtime configuration. It has no knowledge of
//! transports, sandboxing, or RPC dispatch — those live in the crates that
//! depend on this one.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod ids;
pub mod machine;
pub mod session;
pub mod time;
pub mod versioned;

pub use backoff::Backoff;
pub use config::DaemonConfig;
pub use ids::{MachineId, RequestId, SessionId, TerminalId, UploadId};
pub use machine::{DaemonState, DaemonStatus, Machine, MachineMetadata};
pub use session::{
    AgentState, CompletedRequest, Decision, PermissionRequestRecord, Session, SessionMetadata,
    SessionSummary,
};
pub use time::EpochMillis;
pub use versioned::Versioned;
