//! Per-session permission coordinator: pending-request bookkeeping plus the
//! pure auto-approval policy that can resolve a request without asking the
//! user.
//!
//! This crate deliberately owns only the in-memory half of the state
//! machine. The authoritative mirror lives in `agentState.requests` /
//! `agentState.completedRequests` on the session record (`beacon-core`),
//! kept in sync through the versioned-update protocol (`beacon-state`) by
//! whichever connector drives a given session — see [`coordinator`] for the
//! exact hand-off.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auto_approve;
pub mod coordinator;
pub mod error;

pub use auto_approve::{resolve_auto_approval, AutoApprovalOverrides};
pub use coordinator::{Added, PermissionCoordinator, PermissionOutcome};
pub use error::ApprovalError;
