//! Per-session pending permission requests, keyed by request id.
//!
//! The coordinator owns only the in-memory half of the picture (the
//! `resolve`/`reject` channel for whoever is awaiting a decision). Mirroring
//! into `agentState.requests`/`completedRequests` is the caller's job (via
//! `beacon-state`'s versioned-update protocol) — every operation here
//! returns the record the caller should mirror, so the two copies never
//! drift out of the one-way `pending ⊆ requests` relationship.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use beacon_core::{CompletedRequest, Decision, EpochMillis, PermissionRequestRecord, RequestId};

use crate::error::ApprovalError;

/// What a resolved permission request looked like to the waiter.
#[derive(Debug, Clone)]
pub struct PermissionOutcome {
    /// The terminal decision.
    pub decision: Decision,
    /// Why, if supplied.
    pub reason: Option<String>,
    /// Permission mode in effect at resolution time.
    pub mode: Option<String>,
    /// Tool names the user chose to always allow, if applicable.
    pub allow_tools: Option<Vec<String>>,
    /// Free-form answers supplied alongside the decision.
    pub answers: Option<Value>,
}

struct PendingEntry {
    tool_name: String,
    input: Value,
    created_at: EpochMillis,
    responder: oneshot::Sender<Result<PermissionOutcome, String>>,
}

/// One newly-added pending request, paired with the mirror record the
/// caller should write into `agentState.requests`.
pub struct Added {
    /// Receiver the caller awaits for the eventual decision.
    pub receiver: oneshot::Receiver<Result<PermissionOutcome, String>>,
    /// Record to mirror into `agentState.requests`.
    pub mirror: PermissionRequestRecord,
}

/// Per-session store of pending permission requests.
#[derive(Default)]
pub struct PermissionCoordinator {
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PermissionCoordinator {
    /// Construct an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request. Returns the receiver the caller
    /// should await, plus the record to mirror into `agentState.requests`.
    pub async fn add(&self, id: RequestId, tool_name: impl Into<String>, input: Value) -> Added {
        let tool_name = tool_name.into();
        let created_at = EpochMillis::now();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(
            id,
            PendingEntry {
                tool_name: tool_name.clone(),
                input: input.clone(),
                created_at,
                responder: tx,
            },
        );

        Added {
            receiver: rx,
            mirror: PermissionRequestRecord {
                tool_name,
                input,
                created_at,
            },
        }
    }

    /// Resolve `id` with `outcome`, waking its waiter and returning the
    /// `completedRequests` record the caller should mirror. Removes the
    /// request from the pending set unconditionally; the caller decides
    /// whether to also remove it from `agentState.requests`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownRequestId`] if `id` has no pending
    /// entry — reported for diagnostics without changing any state, which
    /// this does by construction (nothing is removed or sent).
    pub async fn finalize(
        &self,
        id: &RequestId,
        status: impl Into<String>,
        outcome: PermissionOutcome,
    ) -> Result<CompletedRequest, ApprovalError> {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.remove(id) else {
            return Err(ApprovalError::UnknownRequestId(id.to_string()));
        };
        drop(pending);

        let completed = CompletedRequest {
            tool: entry.tool_name,
            arguments: entry.input,
            created_at: entry.created_at,
            completed_at: EpochMillis::now(),
            status: status.into(),
            reason: outcome.reason.clone(),
            mode: outcome.mode.clone(),
            decision: outcome.decision,
            allow_tools: outcome.allow_tools.clone(),
            answers: outcome.answers.clone(),
        };

        let _ = entry.responder.send(Ok(outcome));
        Ok(completed)
    }

    /// Bulk-finalize every currently pending request with `status:
    /// "canceled"`, rejecting each waiter's receiver with `reject_message`
    /// and recording `decision` on every resulting `completedRequests`
    /// entry. Returns the `(id, completedRequest)` pairs the caller should
    /// mirror.
    pub async fn cancel(
        &self,
        completed_reason: &str,
        reject_message: &str,
        decision: Decision,
    ) -> Vec<(RequestId, CompletedRequest)> {
        let mut pending = self.pending.lock().await;
        let drained: Vec<(RequestId, PendingEntry)> = pending.drain().collect();
        drop(pending);

        drained
            .into_iter()
            .map(|(id, entry)| {
                let completed = CompletedRequest {
                    tool: entry.tool_name,
                    arguments: entry.input,
                    created_at: entry.created_at,
                    completed_at: EpochMillis::now(),
                    status: "canceled".to_string(),
                    reason: Some(completed_reason.to_string()),
                    mode: None,
                    decision,
                    allow_tools: None,
                    answers: None,
                };
                let _ = entry.responder.send(Err(reject_message.to_string()));
                (id, completed)
            })
            .collect()
    }

    /// Number of requests currently pending. Test/diagnostic helper.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(decision: Decision) -> PermissionOutcome {
        PermissionOutcome {
            decision,
            reason: None,
            mode: None,
            allow_tools: None,
            answers: None,
        }
    }

    #[tokio::test]
    async fn add_then_finalize_wakes_the_waiter() {
        let coordinator = PermissionCoordinator::new();
        let added = coordinator
            .add(RequestId::new("r1"), "bash", Value::Null)
            .await;

        coordinator
            .finalize(&RequestId::new("r1"), "completed", outcome(Decision::Approved))
            .await
            .unwrap();

        let result = added.receiver.await.unwrap();
        assert!(matches!(result, Ok(o) if o.decision == Decision::Approved));
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn finalize_unknown_id_changes_no_state() {
        let coordinator = PermissionCoordinator::new();
        coordinator
            .add(RequestId::new("r1"), "bash", Value::Null)
            .await;

        let err = coordinator
            .finalize(&RequestId::new("missing"), "completed", outcome(Decision::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::UnknownRequestId(_)));
        assert_eq!(coordinator.pending_count().await, 1, "r1 still pending");
    }

    #[tokio::test]
    async fn cancel_rejects_all_and_clears_pending() {
        let coordinator = PermissionCoordinator::new();
        let r1 = coordinator
            .add(RequestId::new("r1"), "bash", Value::Null)
            .await;
        let r2 = coordinator
            .add(RequestId::new("r2"), "write_file", Value::Null)
            .await;

        let completed = coordinator
            .cancel("session ended", "canceled", Decision::Abort)
            .await;

        assert_eq!(completed.len(), 2);
        assert_eq!(coordinator.pending_count().await, 0);
        for (_, record) in &completed {
            assert_eq!(record.status, "canceled");
            assert_eq!(record.reason.as_deref(), Some("session ended"));
            assert_eq!(record.decision, Decision::Abort);
        }

        assert_eq!(r1.receiver.await.unwrap().unwrap_err(), "canceled");
        assert_eq!(r2.receiver.await.unwrap().unwrap_err(), "canceled");
    }
}
