//! Persisted flows with per-flow serialization of concurrent decisions.
//!
//! Each decision runs the pure engine inside [`RecordStore::update`], so two
//! approvals racing on the same flow are applied one after the other instead
//! of overwriting each other's `current_approvals`. Every persisted change is
//! followed by its audit entries.

use std::sync::Arc;

use serde_json::json;
use signflow_storage::SignflowStorage;
use tracing::info;

use super::engine::{EngineMode, FlowEngine};
use super::step::{SignatureEvidence, SignerStatus};
use super::validate::validate;
use super::{ApprovalFlow, FlowError, FlowStatus, NewFlow, StepStatus};
use crate::audit::{create_audit_log, Actor, AuditAction, AuditEntityType, AuditLogEntry, AuditLogger};
use crate::clock::{Clock, SystemClock};
use crate::config::FlowSettings;
use crate::notify::{notification_for, FlowNotification};
use crate::store::{RecordStore, Update};

/// Storage namespace for flows, keyed by flow id.
pub const FLOWS: &str = "approval_flows";

/// Result of a repository call.
#[derive(Debug, Clone)]
pub struct FlowUpdate {
    pub flow: ApprovalFlow,
    /// False when the call was an idempotent no-op.
    pub changed: bool,
    pub notification: Option<FlowNotification>,
}

pub struct FlowRepository<S, C = SystemClock> {
    store: RecordStore<S>,
    audit: AuditLogger<S>,
    engine: FlowEngine<C>,
}

impl<S: SignflowStorage, C: Clock> FlowRepository<S, C> {
    pub fn new(storage: Arc<S>, engine: FlowEngine<C>, max_conflict_retries: u32) -> Self {
        Self {
            store: RecordStore::new(storage.clone(), max_conflict_retries),
            audit: AuditLogger::new(storage),
            engine,
        }
    }

    pub fn from_settings(storage: Arc<S>, clock: C, settings: &FlowSettings) -> Self {
        let mode = if settings.strict {
            EngineMode::Strict
        } else {
            EngineMode::Lenient
        };
        Self::new(
            storage,
            FlowEngine::with_clock(clock).with_mode(mode),
            settings.max_conflict_retries,
        )
    }

    pub fn engine(&self) -> &FlowEngine<C> {
        &self.engine
    }

    pub fn audit(&self) -> &AuditLogger<S> {
        &self.audit
    }

    /// Build, validate and persist a new flow.
    pub async fn create(&self, new: NewFlow) -> Result<FlowUpdate, FlowError> {
        let flow = self.engine.create_flow(new);
        let report = validate(&flow);
        if !report.valid {
            return Err(FlowError::Invalid(report.errors));
        }
        self.store.create(FLOWS, &flow.id, &flow).await?;

        let entry = create_audit_log(
            AuditEntityType::ApprovalFlow,
            &flow.id,
            AuditAction::FlowCreated,
            &flow.initiator,
            json!({
                "document_id": flow.document_id,
                "flow_type": flow.flow_type,
                "steps": flow.steps.len(),
            }),
            flow.created_at,
        );
        self.audit.record(&entry).await?;
        info!(flow_id = %flow.id, document_id = %flow.document_id, "approval flow created");

        Ok(FlowUpdate {
            notification: notification_for(None, &flow),
            flow,
            changed: true,
        })
    }

    pub async fn load(&self, flow_id: &str) -> Result<ApprovalFlow, FlowError> {
        self.store
            .load::<ApprovalFlow>(FLOWS, flow_id)
            .await?
            .map(|(flow, _)| flow)
            .ok_or_else(|| FlowError::FlowNotFound {
                flow_id: flow_id.to_string(),
            })
    }

    pub async fn list(&self) -> Result<Vec<ApprovalFlow>, FlowError> {
        let mut flows = Vec::new();
        for key in self.store.storage().keys(FLOWS).await? {
            if let Some((flow, _)) = self.store.load::<ApprovalFlow>(FLOWS, &key).await? {
                flows.push(flow);
            }
        }
        Ok(flows)
    }

    pub async fn approve(
        &self,
        flow_id: &str,
        step_id: &str,
        approver: &Actor,
        comments: Option<&str>,
        evidence: Option<SignatureEvidence>,
    ) -> Result<FlowUpdate, FlowError> {
        self.mutate(flow_id, approver, |flow| {
            self.engine
                .approve(flow, step_id, approver, comments, evidence.clone())
        })
        .await
    }

    pub async fn reject(
        &self,
        flow_id: &str,
        step_id: &str,
        approver: &Actor,
        reason: &str,
    ) -> Result<FlowUpdate, FlowError> {
        self.mutate(flow_id, approver, |flow| {
            self.engine.reject(flow, step_id, approver, reason)
        })
        .await
    }

    pub async fn cancel(
        &self,
        flow_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<FlowUpdate, FlowError> {
        self.mutate(flow_id, actor, |flow| Ok(self.engine.cancel(flow, actor, reason)))
            .await
    }

    async fn mutate<F>(&self, flow_id: &str, actor: &Actor, mut apply: F) -> Result<FlowUpdate, FlowError>
    where
        F: FnMut(&ApprovalFlow) -> Result<ApprovalFlow, FlowError>,
    {
        let (before, after) = self
            .store
            .update::<ApprovalFlow, _, FlowError, _>(FLOWS, flow_id, |current| {
                let flow = current.ok_or_else(|| FlowError::FlowNotFound {
                    flow_id: flow_id.to_string(),
                })?;
                let next = apply(&flow)?;
                if next == flow {
                    Ok(Update::Keep((flow, None)))
                } else {
                    Ok(Update::Write(next.clone(), (flow, Some(next))))
                }
            })
            .await?;

        let Some(after) = after else {
            return Ok(FlowUpdate {
                flow: before,
                changed: false,
                notification: None,
            });
        };

        self.audit
            .record_all(&audit_entries(&before, &after, actor))
            .await?;
        info!(
            flow_id = %after.id,
            status = ?after.status,
            current_step = after.current_step_number,
            "approval flow updated"
        );

        Ok(FlowUpdate {
            notification: notification_for(Some(&before), &after),
            flow: after,
            changed: true,
        })
    }
}

/// One audit entry per observable change between two versions of a flow.
pub fn audit_entries(before: &ApprovalFlow, after: &ApprovalFlow, actor: &Actor) -> Vec<AuditLogEntry> {
    let at = after.updated_at;
    let entry = |action, details| {
        create_audit_log(
            AuditEntityType::ApprovalFlow,
            &after.id,
            action,
            actor,
            details,
            at,
        )
    };
    let mut entries = Vec::new();

    for (old, new) in before.steps.iter().zip(after.steps.iter()) {
        for (old_sig, new_sig) in old.signatures.iter().zip(new.signatures.iter()) {
            if old_sig.status == new_sig.status {
                continue;
            }
            match new_sig.status {
                SignerStatus::Signed => entries.push(entry(
                    AuditAction::SignatureRecorded,
                    json!({
                        "step_id": new.id,
                        "step_number": new.step_number,
                        "signer_id": new_sig.signer_id,
                        "current_approvals": new.current_approvals,
                        "required_approvals": new.required_approvals,
                    }),
                )),
                SignerStatus::Rejected => entries.push(entry(
                    AuditAction::SignatureRejected,
                    json!({
                        "step_id": new.id,
                        "step_number": new.step_number,
                        "signer_id": new_sig.signer_id,
                        "reason": new_sig.rejection_reason,
                    }),
                )),
                SignerStatus::Pending => {}
            }
        }
        if old.status != new.status && new.status == StepStatus::Approved {
            entries.push(entry(
                AuditAction::StepApproved,
                json!({ "step_id": new.id, "step_number": new.step_number }),
            ));
        }
    }

    if before.current_step_number != after.current_step_number {
        entries.push(entry(
            AuditAction::StepAdvanced,
            json!({
                "from": before.current_step_number,
                "to": after.current_step_number,
            }),
        ));
    }

    if before.status != after.status {
        let action = match after.status {
            FlowStatus::Approved => Some(AuditAction::FlowApproved),
            FlowStatus::Rejected => Some(AuditAction::FlowRejected),
            FlowStatus::Cancelled => Some(AuditAction::FlowCancelled),
            FlowStatus::Pending | FlowStatus::InReview => None,
        };
        if let Some(action) = action {
            entries.push(entry(
                action,
                json!({
                    "from": before.status,
                    "to": after.status,
                    "reason": after.cancellation.as_ref().map(|c| c.reason.clone()),
                }),
            ));
        }
    }

    entries
}
