/// Failure modes from the versioned-update protocol.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The server rejected the update outright; retrying would not help.
    #[error("update was rejected by the server")]
    NonRetriable,
    /// The proposed value could not be serialized to JSON.
    #[error("failed to serialize proposed value: {0}")]
    Serialize(#[source] serde_json::Error),
}
