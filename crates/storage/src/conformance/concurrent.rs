use std::future::Future;
use std::sync::Arc;

use serde_json::json;

use super::{TestResult, NS};
use crate::{SignflowStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_cas_exactly_one_wins",
        concurrent_cas_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_insert_exactly_one_wins",
        concurrent_insert_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_retry_loops_lose_no_updates",
        concurrent_retry_loops_lose_no_updates(factory).await,
    ));

    results
}

// ── Concurrent CAS: exactly one wins ────────────────────────────────────────

/// N tasks each attempt to replace the same record from version 1. Exactly
/// one succeeds; the rest must get ConcurrentConflict.
async fn concurrent_cas_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    storage
        .insert(NS, "flow-1", json!({"status": "pending"}))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            match s
                .compare_and_set(NS, "flow-1", 1, json!({"status": "in-review", "by": i}))
                .await
            {
                Ok(_) => Ok(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

async fn concurrent_insert_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            match s.insert(NS, "req-1", json!(i)).await {
                Ok(_) => Ok(true),
                Err(StorageError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Retry loops: no lost updates ────────────────────────────────────────────

/// N tasks each increment a counter with a read / CAS / retry loop. The final
/// value must be exactly N: the OCC check is what prevents lost updates.
async fn concurrent_retry_loops_lose_no_updates<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    storage
        .insert(NS, "counter", json!(0))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let rec = s
                    .get(NS, "counter")
                    .await?
                    .ok_or_else(|| StorageError::NotFound {
                        namespace: NS.to_string(),
                        key: "counter".to_string(),
                    })?;
                let next = rec.value.as_i64().unwrap_or(0) + 1;
                match s.compare_and_set(NS, "counter", rec.version, json!(next)).await {
                    Ok(_) => return Ok::<(), StorageError>(()),
                    Err(StorageError::ConcurrentConflict { .. }) => {
                        tokio::task::yield_now().await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e: StorageError| format!("task {i} failed: {e}"))?;
    }

    let rec = storage
        .get(NS, "counter")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("counter missing")?;
    if rec.value != json!(N) {
        return Err(format!("expected counter {N}, got {}", rec.value));
    }
    Ok(())
}
