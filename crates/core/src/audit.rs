//! Append-only audit trail.
//!
//! Every state-changing call in the flow repository and the signature
//! orchestrator writes one [`AuditLogEntry`] per transition. Entries go to the
//! storage log named [`AUDIT_LOG`] and are never edited or removed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use signflow_storage::{SignflowStorage, StorageError};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

pub const AUDIT_LOG: &str = "audit";

/// The user (or system) on whose behalf a transition happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub user_name: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("system", "System")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEntityType {
    ApprovalFlow,
    SignatureRequest,
    OtpVerification,
    ClaveSession,
    ViafirmaJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    FlowCreated,
    SignatureRecorded,
    SignatureRejected,
    StepApproved,
    StepAdvanced,
    FlowApproved,
    FlowRejected,
    FlowCancelled,
    RequestCreated,
    RequestStatusChanged,
    ClaveInitiated,
    ViafirmaInitiated,
    OtpGenerated,
    OtpVerified,
    OtpFailed,
    SignatureCompleted,
    ProviderCallback,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub user_id: String,
    pub user_name: String,
    pub details: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Build an entry. Pure apart from the generated id.
pub fn create_audit_log(
    entity_type: AuditEntityType,
    entity_id: &str,
    action: AuditAction,
    actor: &Actor,
    details: serde_json::Value,
    timestamp: OffsetDateTime,
) -> AuditLogEntry {
    AuditLogEntry {
        id: Uuid::new_v4().to_string(),
        entity_type,
        entity_id: entity_id.to_string(),
        action,
        user_id: actor.user_id.clone(),
        user_name: actor.user_name.clone(),
        details,
        timestamp,
    }
}

/// Writes entries to the audit log of a storage backend.
pub struct AuditLogger<S> {
    storage: Arc<S>,
}

impl<S> Clone for AuditLogger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: SignflowStorage> AuditLogger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Append an entry, returning its sequence number in the log.
    pub async fn record(&self, entry: &AuditLogEntry) -> Result<u64, StorageError> {
        let seq = self
            .storage
            .append(AUDIT_LOG, serde_json::to_value(entry)?)
            .await?;
        debug!(
            seq,
            entity_type = ?entry.entity_type,
            entity_id = %entry.entity_id,
            action = ?entry.action,
            user_id = %entry.user_id,
            "audit entry recorded"
        );
        Ok(seq)
    }

    pub async fn record_all(&self, entries: &[AuditLogEntry]) -> Result<(), StorageError> {
        for entry in entries {
            self.record(entry).await?;
        }
        Ok(())
    }

    /// Every entry in log order.
    pub async fn entries(&self) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.storage
            .read_log(AUDIT_LOG)
            .await?
            .into_iter()
            .map(|rec| serde_json::from_value(rec.value).map_err(StorageError::from))
            .collect()
    }

    /// Entries about one entity, in log order.
    pub async fn entries_for(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, StorageError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .collect())
    }
}
