use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{LogRecord, VersionedRecord};

/// The storage trait for signflow persistence backends.
///
/// A `SignflowStorage` implementation is a namespaced key-value store with
/// per-record versions plus a set of append-only logs. Approval flows, OTP
/// records, identity-broker sessions and signing jobs live in the key-value
/// part; the audit trail lives in a log.
///
/// ## OCC Conflict Detection
///
/// `compare_and_set` is the only conditional write. It succeeds iff the
/// stored version equals `expected_version`, otherwise it returns
/// `Err(StorageError::ConcurrentConflict { .. })` and leaves the record
/// untouched. Read-modify-write callers loop on that error.
///
/// ## Append-only logs
///
/// Log entries are never edited or removed. `read_log` returns entries in
/// sequence order.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// across async task boundaries behind an `Arc`.
#[async_trait]
pub trait SignflowStorage: Send + Sync + 'static {
    // ── Key-value reads ───────────────────────────────────────────────────────

    /// Read a record. Returns `Ok(None)` if the key does not exist.
    async fn get(&self, namespace: &str, key: &str)
        -> Result<Option<VersionedRecord>, StorageError>;

    /// List the keys of a namespace in lexicographic order.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    // ── Key-value writes ──────────────────────────────────────────────────────

    /// Create a record at version 1.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if the key is present.
    async fn insert(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64, StorageError>;

    /// Unconditionally write a record, creating it if needed.
    ///
    /// Returns the new version.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64, StorageError>;

    /// Replace a record only if its version is still `expected_version` (OCC).
    ///
    /// Returns the new version on success, `NotFound` if the key is absent and
    /// `ConcurrentConflict` if another writer got there first.
    async fn compare_and_set(
        &self,
        namespace: &str,
        key: &str,
        expected_version: i64,
        value: serde_json::Value,
    ) -> Result<i64, StorageError>;

    /// Remove a record. Returns whether a record was present.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;

    // ── Append-only logs ──────────────────────────────────────────────────────

    /// Append a value to a log, returning its sequence number.
    async fn append(&self, log: &str, value: serde_json::Value) -> Result<u64, StorageError>;

    /// Read every entry of a log in sequence order.
    async fn read_log(&self, log: &str) -> Result<Vec<LogRecord>, StorageError>;
}
