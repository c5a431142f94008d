//! In-memory `SignflowStorage` backend.
//!
//! Used by tests, the CLI and single-process deployments. All state sits
//! behind one mutex, so every operation is atomic with respect to the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{LogRecord, VersionedRecord};
use crate::traits::SignflowStorage;

#[derive(Default)]
struct Inner {
    /// namespace -> key -> (version, value)
    records: HashMap<String, BTreeMap<String, (i64, serde_json::Value)>>,
    logs: HashMap<String, Vec<serde_json::Value>>,
}

/// Cheaply cloneable in-memory storage; clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".to_string()))
    }
}

fn not_found(namespace: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        namespace: namespace.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl SignflowStorage for InMemoryStorage {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|(version, value)| VersionedRecord {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: value.clone(),
                version: *version,
            }))
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64, StorageError> {
        let mut inner = self.lock()?;
        let ns = inner.records.entry(namespace.to_string()).or_default();
        if ns.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        ns.insert(key.to_string(), (1, value));
        Ok(1)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64, StorageError> {
        let mut inner = self.lock()?;
        let ns = inner.records.entry(namespace.to_string()).or_default();
        let version = ns.get(key).map(|(v, _)| v + 1).unwrap_or(1);
        ns.insert(key.to_string(), (version, value));
        Ok(version)
    }

    async fn compare_and_set(
        &self,
        namespace: &str,
        key: &str,
        expected_version: i64,
        value: serde_json::Value,
    ) -> Result<i64, StorageError> {
        let mut inner = self.lock()?;
        let slot = inner
            .records
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(key))
            .ok_or_else(|| not_found(namespace, key))?;
        if slot.0 != expected_version {
            return Err(StorageError::ConcurrentConflict {
                namespace: namespace.to_string(),
                key: key.to_string(),
                expected_version,
            });
        }
        slot.0 += 1;
        slot.1 = value;
        Ok(slot.0)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        Ok(inner
            .records
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key))
            .is_some())
    }

    async fn append(&self, log: &str, value: serde_json::Value) -> Result<u64, StorageError> {
        let mut inner = self.lock()?;
        let entries = inner.logs.entry(log.to_string()).or_default();
        entries.push(value);
        Ok(entries.len() as u64)
    }

    async fn read_log(&self, log: &str) -> Result<Vec<LogRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .logs
            .get(log)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, value)| LogRecord {
                        log: log.to_string(),
                        sequence: i as u64 + 1,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
