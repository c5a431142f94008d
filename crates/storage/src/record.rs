use serde::{Deserialize, Serialize};

/// A keyed value as stored in the backend, with its OCC version.
///
/// Versions start at 1 on insert and increase by exactly one on every
/// successful write. Deleting and re-inserting a key restarts at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub version: i64,
}

/// One entry of an append-only log.
///
/// `sequence` is assigned by the backend, starts at 1 per log and is gapless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log: String,
    pub sequence: u64,
    pub value: serde_json::Value,
}
