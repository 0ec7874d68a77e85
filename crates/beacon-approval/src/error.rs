/// Failure modes from the permission coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// A `permission` RPC response named an id with no matching pending
    /// request. Diagnostic only — the caller should report it, not fail.
    #[error("no pending request for id {0}")]
    UnknownRequestId(String),
}
