//! Notification payloads for flow transitions.
//!
//! This crate does not deliver anything; it only derives who should hear
//! about a transition so a mail or push collaborator can compose the message.

use serde::{Deserialize, Serialize};

use crate::flow::{active_approvers, ApprovalFlow, FlowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    FlowCreated,
    /// A sequential flow moved on and new approvers are up.
    ApprovalRequested,
    FlowCompleted,
    FlowRejected,
    FlowCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNotification {
    pub kind: NotificationKind,
    pub flow_id: String,
    pub document_id: String,
    pub project_id: String,
    pub initiator_id: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The notification implied by going from `before` to `after`, if any.
/// `before = None` means `after` was just created.
pub fn notification_for(before: Option<&ApprovalFlow>, after: &ApprovalFlow) -> Option<FlowNotification> {
    let (kind, recipients, reason) = match before {
        None => (NotificationKind::FlowCreated, active_approvers(after), None),
        Some(prev) if prev.status != after.status => match after.status {
            FlowStatus::Approved => (
                NotificationKind::FlowCompleted,
                with_initiator(after, all_signers(after)),
                None,
            ),
            FlowStatus::Rejected => (
                NotificationKind::FlowRejected,
                with_initiator(after, Vec::new()),
                rejection_reason(after),
            ),
            FlowStatus::Cancelled => (
                NotificationKind::FlowCancelled,
                all_signers(after),
                after.cancellation.as_ref().map(|c| c.reason.clone()),
            ),
            FlowStatus::Pending | FlowStatus::InReview => {
                return approval_requested(prev, after);
            }
        },
        Some(prev) => return approval_requested(prev, after),
    };

    Some(FlowNotification {
        kind,
        flow_id: after.id.clone(),
        document_id: after.document_id.clone(),
        project_id: after.project_id.clone(),
        initiator_id: after.initiator.user_id.clone(),
        recipients,
        reason,
    })
}

fn approval_requested(prev: &ApprovalFlow, after: &ApprovalFlow) -> Option<FlowNotification> {
    if prev.current_step_number == after.current_step_number {
        return None;
    }
    Some(FlowNotification {
        kind: NotificationKind::ApprovalRequested,
        flow_id: after.id.clone(),
        document_id: after.document_id.clone(),
        project_id: after.project_id.clone(),
        initiator_id: after.initiator.user_id.clone(),
        recipients: active_approvers(after),
        reason: None,
    })
}

fn all_signers(flow: &ApprovalFlow) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for approver in flow.steps.iter().flat_map(|s| s.approvers.iter()) {
        if !out.contains(approver) {
            out.push(approver.clone());
        }
    }
    out
}

fn with_initiator(flow: &ApprovalFlow, mut recipients: Vec<String>) -> Vec<String> {
    if !recipients.contains(&flow.initiator.user_id) {
        recipients.insert(0, flow.initiator.user_id.clone());
    }
    recipients
}

fn rejection_reason(flow: &ApprovalFlow) -> Option<String> {
    flow.steps
        .iter()
        .flat_map(|s| s.signatures.iter())
        .find_map(|sig| sig.rejection_reason.clone())
}
