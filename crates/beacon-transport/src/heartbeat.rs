//! Best-effort liveness ticker, generalized from
//! `discord_proxy::heartbeat::run_heartbeat` to this daemon's `machine-alive`
//! / `session-alive` cadence.
//!
//! Unlike the Discord Gateway, the coordination service does not ack
//! heartbeats or treat a missed one as zombie evidence — ticks are
//! best-effort and silently skip when disconnected, so this keeps the
//! jittered-first-tick-then-fixed-interval shape and drops ack-tracked
//! zombie detection, which has no counterpart here.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::connection::Socket;
use crate::protocol::Envelope;

/// Run the alive ticker until `shutdown_rx` fires. Each tick sends `event`
/// with a fresh payload from `payload` (called once per tick, so callers
/// can carry live state such as a thinking flag) through whatever socket
/// `current_socket` currently names; when it names none (the connector is
/// between connections) the tick is silently skipped rather than queued or
/// retried.
pub async fn run_alive_ticker<F>(
    interval: Duration,
    event: &'static str,
    current_socket: watch::Receiver<Option<Arc<Socket>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut payload: F,
) where
    F: FnMut() -> Value,
{
    let jitter_factor = f64::from(fastrand::u32(0..1000)) / 1000.0;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let first_delay_ms = (interval.as_millis() as f64 * jitter_factor) as u64;

    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => return,
        () = tokio::time::sleep(Duration::from_millis(first_delay_ms)) => {},
    }

    loop {
        let socket = current_socket.borrow().clone();
        match socket {
            Some(socket) => {
                if let Err(err) = socket.send(&Envelope::new(event, payload())).await {
                    tracing::debug!(%err, event, "alive tick failed");
                }
            },
            None => tracing::trace!(event, "alive tick skipped, not connected"),
        }

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            () = tokio::time::sleep(interval) => {},
        }
    }
}
