//! Wires the machine/session connectors, the scoped RPC fabric, and the
//! sandboxed handlers into one running agent-control daemon process.
//!
//! [`Daemon`] is the top-level owner: it bootstraps the machine record over
//! HTTP, keeps the machine connector running for the life of the process,
//! and tracks every session spawned from `spawn-happy-session` until
//! `stop-session` or process shutdown tears it down.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod daemon;
pub mod error;
pub mod machine_rpc;
pub mod permission_gateway;
pub mod sandboxed_handlers;
pub mod sessions;

pub use daemon::Daemon;
pub use error::BeaconError;
