use std::future::Future;

use serde_json::json;

use super::{TestResult, NS};
use crate::{SignflowStorage, StorageError};

pub(super) async fn run_kv_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "kv",
            "get_missing_returns_none",
            get_missing_returns_none(factory).await,
        ),
        TestResult::from_result(
            "kv",
            "insert_starts_at_version_1",
            insert_starts_at_version_1(factory).await,
        ),
        TestResult::from_result(
            "kv",
            "duplicate_insert_returns_already_exists",
            duplicate_insert_returns_already_exists(factory).await,
        ),
        TestResult::from_result(
            "kv",
            "set_creates_then_increments",
            set_creates_then_increments(factory).await,
        ),
        TestResult::from_result(
            "kv",
            "delete_removes_record",
            delete_removes_record(factory).await,
        ),
        TestResult::from_result(
            "kv",
            "keys_sorted_and_namespaced",
            keys_sorted_and_namespaced(factory).await,
        ),
    ]
}

async fn get_missing_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = s.get(NS, "absent").await.map_err(|e| e.to_string())?;
    if rec.is_some() {
        return Err("expected None for a missing key".to_string());
    }
    Ok(())
}

async fn insert_starts_at_version_1<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let v = s
        .insert(NS, "k1", json!({"state": "pending"}))
        .await
        .map_err(|e| e.to_string())?;
    if v != 1 {
        return Err(format!("insert returned version {v}, expected 1"));
    }
    let rec = s
        .get(NS, "k1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing after insert")?;
    if rec.version != 1 || rec.value != json!({"state": "pending"}) {
        return Err(format!("unexpected record after insert: {rec:?}"));
    }
    Ok(())
}

async fn duplicate_insert_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "k1", json!(1)).await.map_err(|e| e.to_string())?;
    match s.insert(NS, "k1", json!(2)).await {
        Err(StorageError::AlreadyExists { namespace, key }) => {
            if namespace != NS || key != "k1" {
                return Err(format!("wrong error fields: {namespace}/{key}"));
            }
        }
        other => return Err(format!("expected AlreadyExists, got {other:?}")),
    }
    let rec = s
        .get(NS, "k1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record missing")?;
    if rec.value != json!(1) {
        return Err("duplicate insert overwrote the original value".to_string());
    }
    Ok(())
}

async fn set_creates_then_increments<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let v1 = s.set(NS, "k1", json!("a")).await.map_err(|e| e.to_string())?;
    let v2 = s.set(NS, "k1", json!("b")).await.map_err(|e| e.to_string())?;
    if (v1, v2) != (1, 2) {
        return Err(format!("expected versions (1, 2), got ({v1}, {v2})"));
    }
    Ok(())
}

async fn delete_removes_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert(NS, "k1", json!(1)).await.map_err(|e| e.to_string())?;
    if !s.delete(NS, "k1").await.map_err(|e| e.to_string())? {
        return Err("delete of existing key returned false".to_string());
    }
    if s.delete(NS, "k1").await.map_err(|e| e.to_string())? {
        return Err("second delete returned true".to_string());
    }
    if s.get(NS, "k1").await.map_err(|e| e.to_string())?.is_some() {
        return Err("record still readable after delete".to_string());
    }
    Ok(())
}

async fn keys_sorted_and_namespaced<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SignflowStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for key in ["b", "a", "c"] {
        s.insert(NS, key, json!(key)).await.map_err(|e| e.to_string())?;
    }
    s.insert("other", "z", json!(0))
        .await
        .map_err(|e| e.to_string())?;
    let keys = s.keys(NS).await.map_err(|e| e.to_string())?;
    if keys != ["a", "b", "c"] {
        return Err(format!("unexpected keys: {keys:?}"));
    }
    Ok(())
}
