//! Sandboxed filesystem/command handlers installed on every connector.
//!
//! Every handler here validates its inputs against `beacon_sandbox` before
//! touching the filesystem or spawning a subprocess, and returns a
//! discriminated `{success: true, ...}` / `{success: false, error, ...}`
//! envelope (see [`response`]) rather than propagating raw errors across
//! the wire.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bash;
pub mod error;
pub mod fs;
mod process;
pub mod response;
pub mod skills;
pub mod slash_commands;
pub mod subprocess;
pub mod uploads;

pub use error::HandlerError;
