/// All errors that can be returned by a SignflowStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict — another writer replaced the
    /// record after it was read. The expected version was not found.
    #[error(
        "concurrent conflict on {namespace}/{key}: expected version {expected_version}"
    )]
    ConcurrentConflict {
        namespace: String,
        key: String,
        expected_version: i64,
    },

    /// No record with the given (namespace, key).
    #[error("record not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },

    /// A record with this (namespace, key) already exists.
    #[error("record already exists: {namespace}/{key}")]
    AlreadyExists { namespace: String, key: String },

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend-specific storage error (connection, I/O, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
