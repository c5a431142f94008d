use std::future::Future;

use serde_json::json;

use super::{TestResult, NS};
use crate::{SignflowStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Correct version succeeds
    results.push(TestResult::from_result(
        "version",
        "cas_with_correct_version_succeeds",
        cas_with_correct_version_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "cas_increments_sequentially",
        cas_increments_sequentially(factory).await,
    ));

    // Wrong version fails
    results.push(TestResult::from_result(
        "version",
        "cas_with_stale_version_returns_conflict",
        cas_with_stale_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_has_correct_fields",
        conflict_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_does_not_change_record",
        conflict_does_not_change_record(factory).await,
    ));

    // Missing key
    results.push(TestResult::from_result(
        "version",
        "cas_on_missing_key_returns_not_found",
        cas_on_missing_key_returns_not_found(factory).await,
    ));

    // Race conditions (sequential simulation)
    results.push(TestResult::from_result(
        "version",
        "two_readers_race_one_wins",
        two_readers_race_one_wins(factory).await,
    ));

    results
}

/// Insert at v1, CAS(1) must succeed and return 2.
async fn cas_with_correct_version_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "flow-1", json!({"approvals": 0}))
        .await
        .map_err(|e| e.to_string())?;
    let v = s
        .compare_and_set(NS, "flow-1", 1, json!({"approvals": 1}))
        .await
        .map_err(|e| e.to_string())?;
    if v != 2 {
        return Err(format!("expected version 2, got {v}"));
    }
    Ok(())
}

/// Three successive CAS writes must yield versions 2, 3, 4.
async fn cas_increments_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "flow-1", json!(0))
        .await
        .map_err(|e| e.to_string())?;
    for i in 1..=3i64 {
        let v = s
            .compare_and_set(NS, "flow-1", i, json!(i))
            .await
            .map_err(|e| e.to_string())?;
        if v != i + 1 {
            return Err(format!("step {i}: expected version {}, got {v}", i + 1));
        }
    }
    Ok(())
}

async fn cas_with_stale_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "flow-1", json!(0))
        .await
        .map_err(|e| e.to_string())?;
    s.set(NS, "flow-1", json!(1))
        .await
        .map_err(|e| e.to_string())?;
    match s.compare_and_set(NS, "flow-1", 1, json!(2)).await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "otp-1", json!(0))
        .await
        .map_err(|e| e.to_string())?;
    match s.compare_and_set(NS, "otp-1", 7, json!(1)).await {
        Err(StorageError::ConcurrentConflict {
            namespace,
            key,
            expected_version,
        }) => {
            if namespace != NS || key != "otp-1" || expected_version != 7 {
                return Err(format!(
                    "wrong conflict fields: {namespace}/{key} v{expected_version}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn conflict_does_not_change_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "flow-1", json!("original"))
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.compare_and_set(NS, "flow-1", 5, json!("clobbered")).await;
    let rec = s
        .get(NS, "flow-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing")?;
    if rec.value != json!("original") || rec.version != 1 {
        return Err(format!("record changed by a failed CAS: {rec:?}"));
    }
    Ok(())
}

async fn cas_on_missing_key_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.compare_and_set(NS, "nope", 1, json!(1)).await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

/// Two readers observe v1; the first CAS wins, the second must conflict.
/// This is the lost-update scenario on an approval counter.
async fn two_readers_race_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "step-1", json!({"current_approvals": 0}))
        .await
        .map_err(|e| e.to_string())?;

    let a = s
        .get(NS, "step-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("missing")?;
    let b = s
        .get(NS, "step-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("missing")?;

    s.compare_and_set(NS, "step-1", a.version, json!({"current_approvals": 1}))
        .await
        .map_err(|e| format!("first writer: {e}"))?;
    match s
        .compare_and_set(NS, "step-1", b.version, json!({"current_approvals": 1}))
        .await
    {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("second writer: expected conflict, got {other:?}")),
    }
}
