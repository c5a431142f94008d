use std::future::Future;

use serde_json::json;

use super::TestResult;
use crate::SignflowStorage;

pub(super) async fn run_log_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "log",
            "empty_log_reads_empty",
            empty_log_reads_empty(factory).await,
        ),
        TestResult::from_result(
            "log",
            "append_preserves_order_and_sequence",
            append_preserves_order_and_sequence(factory).await,
        ),
        TestResult::from_result(
            "log",
            "logs_are_isolated",
            logs_are_isolated(factory).await,
        ),
    ]
}

async fn empty_log_reads_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let entries = s.read_log("audit").await.map_err(|e| e.to_string())?;
    if !entries.is_empty() {
        return Err(format!("expected empty log, got {} entries", entries.len()));
    }
    Ok(())
}

async fn append_preserves_order_and_sequence<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for i in 1..=3u64 {
        let seq = s
            .append("audit", json!({"n": i}))
            .await
            .map_err(|e| e.to_string())?;
        if seq != i {
            return Err(format!("append {i} returned sequence {seq}"));
        }
    }
    let entries = s.read_log("audit").await.map_err(|e| e.to_string())?;
    let seqs: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    if seqs != [1, 2, 3] {
        return Err(format!("unexpected sequences: {seqs:?}"));
    }
    if entries[2].value != json!({"n": 3}) {
        return Err(format!("unexpected last value: {}", entries[2].value));
    }
    Ok(())
}

async fn logs_are_isolated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.append("audit", json!(1)).await.map_err(|e| e.to_string())?;
    s.append("other", json!(2)).await.map_err(|e| e.to_string())?;
    let audit = s.read_log("audit").await.map_err(|e| e.to_string())?;
    if audit.len() != 1 {
        return Err(format!("expected 1 audit entry, got {}", audit.len()));
    }
    Ok(())
}
