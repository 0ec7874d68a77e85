//! Bridges [`beacon_approval::PermissionCoordinator`] to a session's
//! versioned `agentState` mirror and installs the `permission` RPC handler
//! that resolves pending requests from the peer.
//!
//! `beacon-approval` deliberately stops at the in-memory pending-request
//! bookkeeping; this module is the "caller" its docs describe, since only
//! the daemon binary's wiring layer can see both a coordinator and a
//! [`SessionConnector`].

use std::sync::Arc;

use serde_json::{json, Value};

use beacon_approval::{resolve_auto_approval, AutoApprovalOverrides, PermissionCoordinator, PermissionOutcome};
use beacon_core::{CompletedRequest, Decision, EpochMillis, RequestId};
use beacon_rpc::RpcRegistry;
use beacon_transport::SessionConnector;

/// Combines a session's pending-request coordinator with the connector used
/// to mirror requests into `agentState` and deliver `permission` responses.
pub struct PermissionGateway {
    coordinator: Arc<PermissionCoordinator>,
    session: Arc<SessionConnector>,
    overrides: AutoApprovalOverrides,
}

impl PermissionGateway {
    /// Construct a gateway for one session.
    #[must_use]
    pub fn new(session: Arc<SessionConnector>, overrides: AutoApprovalOverrides) -> Arc<Self> {
        Arc::new(Self {
            coordinator: Arc::new(PermissionCoordinator::new()),
            session,
            overrides,
        })
    }

    /// Ask for permission to run `tool_name` with `input`. Resolves
    /// immediately, without touching the coordinator, if the session's
    /// current permission mode auto-approves the call; otherwise registers
    /// a pending request, mirrors it into `agentState.requests`, and waits
    /// for the `permission` RPC (or [`Self::cancel_all`]) to resolve it.
    pub async fn request(&self, tool_name: &str, tool_call_id: &str, input: Value) -> PermissionOutcome {
        let mode = self.session.mode();
        if let Some(decision) = mode
            .as_deref()
            .and_then(|m| resolve_auto_approval(m, tool_name, tool_call_id, Some(&self.overrides)))
        {
            let completed = CompletedRequest {
                tool: tool_name.to_string(),
                arguments: input,
                created_at: EpochMillis::now(),
                completed_at: EpochMillis::now(),
                status: "completed".to_string(),
                reason: Some("auto-approved".to_string()),
                mode: mode.clone(),
                decision,
                allow_tools: None,
                answers: None,
            };
            self.mirror_completed(&RequestId::new(tool_call_id), completed).await;
            return PermissionOutcome {
                decision,
                reason: Some("auto-approved".to_string()),
                mode,
                allow_tools: None,
                answers: None,
            };
        }

        let id = RequestId::new(tool_call_id);
        let added = self.coordinator.add(id.clone(), tool_name, input).await;
        if let Err(err) = self
            .session
            .update_agent_state(move |current| {
                let mut next = current.clone();
                next.add_request(id.clone(), added.mirror.clone());
                next
            })
            .await
        {
            tracing::warn!(%err, tool_name, "failed to mirror pending permission request");
        }

        added.receiver.await.unwrap_or(Err("gateway dropped".to_string())).unwrap_or_else(|reason| {
            PermissionOutcome {
                decision: Decision::Abort,
                reason: Some(reason),
                mode: None,
                allow_tools: None,
                answers: None,
            }
        })
    }

    /// Cancel every pending request on this session (e.g. on session end),
    /// mirroring each into `agentState.completedRequests`.
    pub async fn cancel_all(&self, completed_reason: &str, reject_message: &str) {
        let completed = self
            .coordinator
            .cancel(completed_reason, reject_message, Decision::Abort)
            .await;
        for (id, record) in completed {
            self.mirror_completed(&id, record).await;
        }
    }

    async fn mirror_completed(&self, id: &RequestId, completed: CompletedRequest) {
        let id = id.clone();
        if let Err(err) = self
            .session
            .update_agent_state(move |current| {
                let mut next = current.clone();
                next.complete_request(&id, completed.clone());
                next
            })
            .await
        {
            tracing::warn!(%err, "failed to mirror completed permission request");
        }
    }
}

/// Params accepted by the `permission` RPC: the peer's response to a
/// pending permission request.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionResponseArgs {
    id: String,
    approved: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    decision: Option<Decision>,
}

/// Register the `permission` RPC handler on `rpc`, resolving responses
/// through `gateway`.
pub async fn install_permission_handler(rpc: &RpcRegistry, gateway: Arc<PermissionGateway>) {
    rpc.register(
        "permission",
        Box::new(move |params: Value| {
            let gateway = Arc::clone(&gateway);
            Box::pin(async move {
                let args: PermissionResponseArgs =
                    serde_json::from_value(params).map_err(|e| e.to_string())?;
                let decision = args
                    .decision
                    .unwrap_or(if args.approved { Decision::Approved } else { Decision::Denied });
                let outcome = PermissionOutcome {
                    decision,
                    reason: args.reason,
                    mode: args.mode,
                    allow_tools: None,
                    answers: None,
                };
                let id = RequestId::new(args.id.clone());
                match gateway.coordinator.finalize(&id, "completed", outcome).await {
                    Ok(completed) => gateway.mirror_completed(&id, completed).await,
                    Err(err) => tracing::warn!(id = %args.id, %err, "permission response for unknown request id"),
                }
                Ok(json!({}))
            })
        }),
    )
    .await;
}
