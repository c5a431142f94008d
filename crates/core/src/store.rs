//! Typed read-modify-write on top of `SignflowStorage`.
//!
//! [`RecordStore::update`] reads a record, hands it to a closure, and writes
//! the result back with `compare_and_set` against the version it read. When
//! another writer got there first the whole cycle is retried on fresh data, so
//! concurrent approvals or OTP attempts on one key never lose an update.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use signflow_storage::{SignflowStorage, StorageError};
use tracing::{debug, warn};

/// What an update closure wants done with the record it was shown.
pub enum Update<T, R> {
    /// Persist `T` and return `R`.
    Write(T, R),
    /// Leave the record untouched and return `R`.
    Keep(R),
}

pub struct RecordStore<S> {
    storage: Arc<S>,
    max_retries: u32,
}

impl<S> Clone for RecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: SignflowStorage> RecordStore<S> {
    pub fn new(storage: Arc<S>, max_retries: u32) -> Self {
        Self {
            storage,
            max_retries,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Read and decode a record together with its version.
    pub async fn load<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<(T, i64)>, StorageError> {
        match self.storage.get(namespace, key).await? {
            Some(rec) => Ok(Some((serde_json::from_value(rec.value)?, rec.version))),
            None => Ok(None),
        }
    }

    /// Create a record; fails with `AlreadyExists` if the key is taken.
    pub async fn create<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<i64, StorageError> {
        self.storage
            .insert(namespace, key, serde_json::to_value(value)?)
            .await
    }

    /// Unconditionally replace a record.
    pub async fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<i64, StorageError> {
        self.storage
            .set(namespace, key, serde_json::to_value(value)?)
            .await
    }

    /// Atomic read-modify-write of one key.
    ///
    /// `apply` sees `None` when the key is absent; a `Write` then creates it.
    /// `apply` may run more than once and must not have side effects outside
    /// its return value. After `max_retries` lost races the last conflict is
    /// returned.
    pub async fn update<T, R, E, F>(&self, namespace: &str, key: &str, mut apply: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StorageError>,
        F: FnMut(Option<T>) -> Result<Update<T, R>, E>,
    {
        let mut conflicts = 0u32;
        loop {
            let (current, version) = match self.load::<T>(namespace, key).await? {
                Some((value, version)) => (Some(value), Some(version)),
                None => (None, None),
            };

            let (next, out) = match apply(current)? {
                Update::Keep(out) => return Ok(out),
                Update::Write(next, out) => (next, out),
            };

            let value = serde_json::to_value(&next).map_err(StorageError::from)?;
            let written = match version {
                Some(v) => self.storage.compare_and_set(namespace, key, v, value).await,
                None => self.storage.insert(namespace, key, value).await,
            };

            match written {
                Ok(_) => return Ok(out),
                Err(
                    err @ (StorageError::ConcurrentConflict { .. }
                    | StorageError::AlreadyExists { .. }
                    | StorageError::NotFound { .. }),
                ) => {
                    conflicts += 1;
                    if conflicts > self.max_retries {
                        warn!(namespace, key, conflicts, "giving up after repeated write conflicts");
                        return Err(err.into());
                    }
                    debug!(namespace, key, conflicts, "write conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use signflow_storage::InMemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    fn store() -> RecordStore<InMemoryStorage> {
        RecordStore::new(Arc::new(InMemoryStorage::new()), 32)
    }

    #[tokio::test]
    async fn update_creates_missing_record() {
        let s = store();
        let n: u32 = s
            .update("counters", "c1", |cur: Option<Counter>| {
                let next = Counter {
                    n: cur.map_or(0, |c| c.n) + 1,
                };
                Ok::<_, StorageError>(Update::Write(next.clone(), next.n))
            })
            .await
            .unwrap();
        assert_eq!(n, 1);
        let (c, v) = s.load::<Counter>("counters", "c1").await.unwrap().unwrap();
        assert_eq!((c.n, v), (1, 1));
    }

    #[tokio::test]
    async fn keep_does_not_write() {
        let s = store();
        s.create("counters", "c1", &Counter { n: 5 }).await.unwrap();
        let seen: u32 = s
            .update("counters", "c1", |cur: Option<Counter>| {
                Ok::<_, StorageError>(Update::Keep(cur.map_or(0, |c| c.n)))
            })
            .await
            .unwrap();
        assert_eq!(seen, 5);
        let (_, v) = s.load::<Counter>("counters", "c1").await.unwrap().unwrap();
        assert_eq!(v, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_are_serialized() {
        let s = Arc::new(store());
        s.create("counters", "c1", &Counter { n: 0 }).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.update("counters", "c1", |cur: Option<Counter>| {
                    let n = cur.map_or(0, |c| c.n) + 1;
                    Ok::<_, StorageError>(Update::Write(Counter { n }, ()))
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let (c, _) = s.load::<Counter>("counters", "c1").await.unwrap().unwrap();
        assert_eq!(c.n, 16);
    }
}
