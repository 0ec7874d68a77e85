//! The `Session` record: one agent conversation hosted by a machine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RequestId, SessionId};
use crate::time::EpochMillis;

/// Metadata describing a session's workspace and capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Absolute working directory the session is sandboxed to.
    pub working_path: String,
    /// Hostname of the machine hosting the session.
    pub host: String,
    /// Which agent flavor is driving this session (`"claude"`, `"codex"`, `"gemini"`, ...).
    pub agent: String,
    /// Tool names the agent has available.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Slash commands available in this session.
    #[serde(default)]
    pub slash_commands: Vec<String>,
    /// Opportunistic summary of the conversation so far, updated whenever
    /// the agent emits a `summary` message.
    #[serde(default)]
    pub summary: Option<SessionSummary>,
    /// `true` once the session has been told to end.
    #[serde(default)]
    pub ended: bool,
}

/// A short summary mirrored into session metadata as a side effect of the
/// agent emitting a `summary` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Summary text.
    pub text: String,
    /// When the summary was last updated.
    pub updated_at: EpochMillis,
}

/// Final outcome recorded for a permission request once it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Approved for this one tool call.
    Approved,
    /// Approved for the remainder of the session.
    ApprovedForSession,
    /// Denied.
    Denied,
    /// Aborted (e.g. the session ended while the request was pending).
    Abort,
}

/// A permission request still awaiting a decision, as mirrored into
/// `agentState.requests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestRecord {
    /// Name of the tool the agent wants to invoke.
    pub tool_name: String,
    /// Tool input/arguments.
    pub input: Value,
    /// When the request was created.
    pub created_at: EpochMillis,
}

/// A permission request that has reached a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRequest {
    /// Name of the tool.
    pub tool: String,
    /// Tool input/arguments.
    pub arguments: Value,
    /// When the request was created.
    pub created_at: EpochMillis,
    /// When the request reached its terminal outcome.
    pub completed_at: EpochMillis,
    /// Status string (e.g. `"completed"`, `"canceled"`).
    pub status: String,
    /// Why the request reached this status, if known.
    #[serde(default)]
    pub reason: Option<String>,
    /// Permission mode in effect when the request was resolved.
    #[serde(default)]
    pub mode: Option<String>,
    /// The terminal decision.
    pub decision: Decision,
    /// Tool names the user chose to always allow, if applicable.
    #[serde(default)]
    pub allow_tools: Option<Vec<String>>,
    /// Free-form answers supplied alongside the decision (elicitation-style).
    #[serde(default)]
    pub answers: Option<Value>,
}

/// Mirror of a session's agent-driven state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Whether the human user currently has control of the session (versus
    /// the agent acting autonomously).
    #[serde(default)]
    pub controlled_by_user: bool,
    /// Pending permission requests, keyed by request id.
    #[serde(default)]
    pub requests: HashMap<RequestId, PermissionRequestRecord>,
    /// Permission requests that have reached a terminal outcome, keyed by
    /// request id. Disjoint from `requests`; the transition is one-way.
    #[serde(default)]
    pub completed_requests: HashMap<RequestId, CompletedRequest>,
}

/// A session known to the coordination service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque session id.
    pub id: SessionId,
    /// Server-assigned monotonic sequence number.
    pub seq: u64,
    /// When the session record was first created.
    pub created_at: EpochMillis,
    /// When the session record was last updated.
    pub updated_at: EpochMillis,
    /// Liveness flag derived from heartbeats.
    pub active: bool,
    /// When the session was last observed active.
    #[serde(default)]
    pub active_at: Option<EpochMillis>,
    /// Session workspace/capability metadata.
    pub metadata: SessionMetadata,
    /// Version of `metadata`.
    pub metadata_version: u64,
    /// Agent-driven state mirror.
    pub agent_state: AgentState,
    /// Version of `agent_state`.
    pub agent_state_version: u64,
    /// Whether the agent is currently "thinking" (best-effort, unversioned).
    #[serde(default)]
    pub thinking: Option<bool>,
    /// Current permission mode (`"yolo"`, `"safe-yolo"`, `"read-only"`, `"default"`).
    #[serde(default)]
    pub permission_mode: Option<String>,
    /// Current model selection mode, if the agent exposes one.
    #[serde(default)]
    pub model_mode: Option<String>,
}

impl AgentState {
    /// Insert a new pending permission request.
    pub fn add_request(&mut self, id: RequestId, record: PermissionRequestRecord) {
        self.requests.insert(id, record);
    }

    /// Move a pending request into `completed_requests`. No-op if the id was
    /// not pending.
    pub fn complete_request(&mut self, id: &RequestId, completed: CompletedRequest) {
        if self.requests.remove(id).is_some() {
            self.completed_requests.insert(id.clone(), completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_request_is_one_way() {
        let mut state = AgentState::default();
        let id = RequestId::new("r1");
        state.add_request(
            id.clone(),
            PermissionRequestRecord {
                tool_name: "bash".into(),
                input: Value::Null,
                created_at: EpochMillis::from_millis(1),
            },
        );
        assert!(state.requests.contains_key(&id));
        assert!(!state.completed_requests.contains_key(&id));

        state.complete_request(
            &id,
            CompletedRequest {
                tool: "bash".into(),
                arguments: Value::Null,
                created_at: EpochMillis::from_millis(1),
                completed_at: EpochMillis::from_millis(2),
                status: "completed".into(),
                reason: None,
                mode: None,
                decision: Decision::Approved,
                allow_tools: None,
                answers: None,
            },
        );
        assert!(!state.requests.contains_key(&id));
        assert!(state.completed_requests.contains_key(&id));
    }

    #[test]
    fn completing_unknown_request_is_a_no_op() {
        let mut state = AgentState::default();
        let id = RequestId::new("missing");
        state.complete_request(
            &id,
            CompletedRequest {
                tool: "bash".into(),
                arguments: Value::Null,
                created_at: EpochMillis::from_millis(1),
                completed_at: EpochMillis::from_millis(2),
                status: "canceled".into(),
                reason: None,
                mode: None,
                decision: Decision::Abort,
                allow_tools: None,
                answers: None,
            },
        );
        assert!(state.completed_requests.is_empty());
    }
}
