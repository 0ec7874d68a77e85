//! Opaque identifier newtypes shared across the daemon.
//!
//! Every id on the wire is "just a string" as far as the coordination
//! service is concerned; wrapping each kind in its own type keeps a
//! [`SessionId`] from being accidentally passed where a [`MachineId`] is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string as this id type.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// Identifies a machine (a workstation or remote host running the daemon).
    MachineId
);
opaque_id!(
    /// Identifies an agent session hosted by a machine.
    SessionId
);
opaque_id!(
    /// Identifies a pending permission request within a session.
    RequestId
);
opaque_id!(
    /// Identifies a pseudo-terminal within a session.
    TerminalId
);
opaque_id!(
    /// Identifies a staged (possibly multipart) upload.
    UploadId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_string() {
        let id = MachineId::new("mach-123");
        assert_eq!(id.to_string(), "mach-123");
        assert_eq!(id.as_str(), "mach-123");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::new("sess-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess-abc\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn distinct_id_types_do_not_compare() {
        let machine = MachineId::new("x");
        let session = SessionId::new("x");
        // Different types entirely — this just documents that the wrapped
        // value can coincide without the types being interchangeable.
        assert_eq!(machine.as_str(), session.as_str());
    }
}
