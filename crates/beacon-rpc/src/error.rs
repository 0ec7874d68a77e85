/// Failure modes surfaced by the RPC fabric itself (as opposed to handler
/// errors, which are carried as plain strings per the wire protocol).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No handler is registered for the requested method.
    #[error("Method not found")]
    MethodNotFound,
}
