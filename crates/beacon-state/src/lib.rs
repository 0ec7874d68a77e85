//! Optimistic-concurrency versioned-update protocol.
//!
//! Each independently-updatable state slot (session metadata, session
//! agent-state, machine metadata, machine daemon-state) is mirrored locally
//! as a `(value, version)` pair. The server owns `version`; this crate
//! implements the compare-and-swap `update()` loop and the broadcast
//! adoption rule that keep the local mirror from ever preceding the server.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use beacon_core::Backoff;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

mod error;

pub use error::StateError;

/// An outbound update request, already serialized to wire shape.
#[derive(Debug, Clone)]
pub struct SlotUpdateRequest {
    /// Fully-qualified method name, e.g. `update-session-metadata`.
    pub method: String,
    /// The version the client believes is current.
    pub expected_version: u64,
    /// The proposed new value.
    pub value: Value,
}

/// The server's response to an update request.
#[derive(Debug, Clone)]
pub enum AckOutcome {
    /// The update was accepted.
    Success {
        /// The version after the update.
        version: u64,
        /// The authoritative value after the update.
        value: Value,
    },
    /// `expectedVersion` was stale; the server returns its current state.
    VersionMismatch {
        /// The server's current version.
        version: u64,
        /// The server's current value.
        value: Value,
    },
    /// The update was rejected outright (non-retriable).
    Error,
}

/// A boxed future, used so [`UpdateTransport`] stays object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends a slot update to the server and awaits its ack. Implemented by
/// `beacon-transport` over the live WebSocket connection.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Send `request` and await the server's ack, or a transport-level
    /// failure (treated as retriable).
    async fn send_update(&self, request: SlotUpdateRequest) -> Result<AckOutcome, String>;
}

/// In-memory mirror of one versioned server-owned slot.
pub struct VersionedSlot<T> {
    inner: RwLock<(T, u64)>,
    update_lock: Mutex<()>,
}

impl<T> VersionedSlot<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Seed the slot with an initial value and version (as returned by the
    /// HTTP bootstrap call).
    #[must_use]
    pub fn new(value: T, version: u64) -> Self {
        Self {
            inner: RwLock::new((value, version)),
            update_lock: Mutex::new(()),
        }
    }

    /// Clone out the current value and version.
    pub async fn current(&self) -> (T, u64) {
        let guard = self.inner.read().await;
        (guard.0.clone(), guard.1)
    }

    /// Wait for any in-flight [`Self::update`] call on this slot to finish.
    /// Because `update` serializes through `update_lock` for its whole
    /// retry loop, acquiring and immediately releasing it is enough to
    /// know no update for this slot is still pending.
    pub async fn flush(&self) {
        let _guard = self.update_lock.lock().await;
    }

    /// Apply an inbound broadcast for this slot: `{version, value}`.
    ///
    /// Per the protocol, a broadcast is only interesting if it carries a
    /// strictly newer version than the local copy. When it does, the new
    /// version is *always* adopted, even if `value` fails to deserialize
    /// into `T` — this guarantees the next outbound mutator sees the
    /// authoritative version instead of retrying against a stale one.
    ///
    /// Returns `true` if the broadcast was newer (and thus applied at all).
    pub async fn apply_broadcast(&self, incoming_version: u64, incoming_value: Value) -> bool {
        let mut guard = self.inner.write().await;
        if incoming_version <= guard.1 {
            return false;
        }
        if let Ok(typed) = serde_json::from_value::<T>(incoming_value) {
            guard.0 = typed;
        }
        guard.1 = incoming_version;
        true
    }

    /// Propose `mutator(current_value)` as the slot's new value, retrying
    /// with exponential backoff on transport failures and version
    /// mismatches, and stopping immediately on a non-retriable error.
    ///
    /// Concurrent calls to `update` on the same slot execute in strict FIFO
    /// order; calls on different slots never serialize against each other.
    pub async fn update<F>(
        &self,
        method: impl Into<String>,
        mutator: F,
        transport: &dyn UpdateTransport,
        backoff_config: beacon_core::config::BackoffConfig,
    ) -> Result<(), StateError>
    where
        F: Fn(&T) -> T,
    {
        let method = method.into();
        let _serialization_guard = self.update_lock.lock().await;
        let mut backoff = Backoff::from_config(backoff_config);

        loop {
            let (current_value, current_version) = {
                let guard = self.inner.read().await;
                (guard.0.clone(), guard.1)
            };
            let new_value = mutator(&current_value);
            let request = SlotUpdateRequest {
                method: method.clone(),
                expected_version: current_version,
                value: serde_json::to_value(&new_value).map_err(StateError::Serialize)?,
            };

            match transport.send_update(request).await {
                Ok(AckOutcome::Success { version, value }) => {
                    self.adopt(version, value).await;
                    return Ok(());
                },
                Ok(AckOutcome::VersionMismatch { version, value }) => {
                    self.adopt(version, value).await;
                    sleep(backoff.next_delay()).await;
                },
                Ok(AckOutcome::Error) => return Err(StateError::NonRetriable),
                Err(message) => {
                    tracing::warn!(error = %message, method = %method, "versioned update transport failure, retrying");
                    sleep(backoff.next_delay()).await;
                },
            }
        }
    }

    async fn adopt(&self, version: u64, value: Value) {
        let mut guard = self.inner.write().await;
        if let Ok(typed) = serde_json::from_value::<T>(value) {
            guard.0 = typed;
        }
        guard.1 = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u64,
    }

    struct ScriptedTransport {
        responses: StdMutex<Vec<Result<AckOutcome, String>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpdateTransport for ScriptedTransport {
        async fn send_update(&self, _request: SlotUpdateRequest) -> Result<AckOutcome, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn zero_backoff() -> beacon_core::config::BackoffConfig {
        beacon_core::config::BackoffConfig {
            base_ms: 0,
            max_ms: 0,
        }
    }

    #[tokio::test]
    async fn successful_update_adopts_value_and_version() {
        let slot = VersionedSlot::new(Counter { count: 0 }, 1);
        let transport = ScriptedTransport {
            responses: StdMutex::new(vec![Ok(AckOutcome::Success {
                version: 2,
                value: serde_json::to_value(Counter { count: 1 }).unwrap(),
            })]),
            calls: AtomicUsize::new(0),
        };

        slot.update(
            "update-session-metadata",
            |c| Counter { count: c.count + 1 },
            &transport,
            zero_backoff(),
        )
        .await
        .unwrap();

        let (value, version) = slot.current().await;
        assert_eq!(value, Counter { count: 1 });
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn version_mismatch_adopts_then_retries() {
        let slot = VersionedSlot::new(Counter { count: 0 }, 1);
        let transport = ScriptedTransport {
            responses: StdMutex::new(vec![
                Ok(AckOutcome::VersionMismatch {
                    version: 5,
                    value: serde_json::to_value(Counter { count: 10 }).unwrap(),
                }),
                Ok(AckOutcome::Success {
                    version: 6,
                    value: serde_json::to_value(Counter { count: 11 }).unwrap(),
                }),
            ]),
            calls: AtomicUsize::new(0),
        };

        slot.update(
            "update-session-metadata",
            |c| Counter { count: c.count + 1 },
            &transport,
            zero_backoff(),
        )
        .await
        .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        let (value, version) = slot.current().await;
        assert_eq!(value, Counter { count: 11 });
        assert_eq!(version, 6);
    }

    #[tokio::test]
    async fn non_retriable_error_stops_immediately() {
        let slot = VersionedSlot::new(Counter { count: 0 }, 1);
        let transport = ScriptedTransport {
            responses: StdMutex::new(vec![Ok(AckOutcome::Error)]),
            calls: AtomicUsize::new(0),
        };

        let result = slot
            .update(
                "update-session-metadata",
                |c| Counter { count: c.count + 1 },
                &transport,
                zero_backoff(),
            )
            .await;

        assert!(matches!(result, Err(StateError::NonRetriable)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let (_, version) = slot.current().await;
        assert_eq!(version, 1, "version must not move on a non-retriable error");
    }

    #[tokio::test]
    async fn broadcast_ignores_stale_version() {
        let slot = VersionedSlot::new(Counter { count: 5 }, 10);
        let applied = slot
            .apply_broadcast(9, serde_json::to_value(Counter { count: 99 }).unwrap())
            .await;
        assert!(!applied);
        let (value, version) = slot.current().await;
        assert_eq!(value, Counter { count: 5 });
        assert_eq!(version, 10);
    }

    #[tokio::test]
    async fn broadcast_adopts_version_even_if_value_fails_to_parse() {
        let slot = VersionedSlot::new(Counter { count: 5 }, 10);
        let applied = slot
            .apply_broadcast(11, serde_json::json!("not a counter"))
            .await;
        assert!(applied);
        let (value, version) = slot.current().await;
        assert_eq!(value, Counter { count: 5 }, "value unchanged on parse failure");
        assert_eq!(version, 11, "version always adopted");
    }

    #[tokio::test]
    async fn broadcast_adopts_both_on_newer_valid_value() {
        let slot = VersionedSlot::new(Counter { count: 5 }, 10);
        let applied = slot
            .apply_broadcast(11, serde_json::to_value(Counter { count: 42 }).unwrap())
            .await;
        assert!(applied);
        let (value, version) = slot.current().await;
        assert_eq!(value, Counter { count: 42 });
        assert_eq!(version, 11);
    }
}
