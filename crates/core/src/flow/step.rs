//! Per-step N-of-M approval aggregation.
//!
//! A step is created with exactly one [`SignatureData`] per approver. Records
//! are never added or removed afterwards, and a record that has left
//! `pending` is never touched again.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::StepStatus;
use crate::signature::SignatureMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerStatus {
    Pending,
    Signed,
    Rejected,
}

/// What an approver attaches to an approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEvidence {
    /// Opaque signature payload (drawn signature, detached signature, ...).
    pub payload: String,
    #[serde(default)]
    pub qualified: Option<SignatureMetadata>,
}

/// One approver's signature record within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureData {
    pub signer_id: String,
    #[serde(default)]
    pub signer_name: Option<String>,
    pub status: SignerStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub signed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub rejected_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub qualified_signature: Option<SignatureMetadata>,
}

impl SignatureData {
    fn pending(signer_id: &str) -> Self {
        Self {
            signer_id: signer_id.to_string(),
            signer_name: None,
            status: SignerStatus::Pending,
            signed_at: None,
            rejected_at: None,
            comments: None,
            rejection_reason: None,
            signature: None,
            qualified_signature: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SignerStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: String,
    pub step_number: u32,
    pub approvers: Vec<String>,
    pub required_approvals: u32,
    pub current_approvals: u32,
    pub status: StepStatus,
    pub signatures: Vec<SignatureData>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Build a step with one pending signature per approver.
///
/// Duplicate approver ids are collapsed (first occurrence wins). The
/// requested approval count is clamped into `1..=approvers.len()`; a step
/// without approvers keeps `required_approvals = 0` and fails validation.
pub fn create_step(step_number: u32, approvers: &[String], required_approvals: u32) -> ApprovalStep {
    let mut unique: Vec<String> = Vec::with_capacity(approvers.len());
    for approver in approvers {
        if !unique.contains(approver) {
            unique.push(approver.clone());
        }
    }
    let count = unique.len() as u32;

    ApprovalStep {
        id: Uuid::new_v4().to_string(),
        step_number,
        signatures: unique.iter().map(|a| SignatureData::pending(a)).collect(),
        approvers: unique,
        required_approvals: required_approvals.max(1).min(count),
        current_approvals: 0,
        status: StepStatus::Pending,
        completed_at: None,
    }
}

impl ApprovalStep {
    pub fn signature(&self, signer_id: &str) -> Option<&SignatureData> {
        self.signatures.iter().find(|s| s.signer_id == signer_id)
    }

    pub fn pending_signers(&self) -> impl Iterator<Item = &str> {
        self.signatures
            .iter()
            .filter(|s| s.is_pending())
            .map(|s| s.signer_id.as_str())
    }

    pub fn signed_count(&self) -> usize {
        self.signatures
            .iter()
            .filter(|s| s.status == SignerStatus::Signed)
            .count()
    }

    /// Mark `signer_id` signed and fold the approval into the step status.
    ///
    /// Returns `false` (and changes nothing) when the signer has no pending
    /// record here.
    pub(crate) fn record_approval(
        &mut self,
        signer_id: &str,
        signer_name: &str,
        comments: Option<&str>,
        evidence: Option<SignatureEvidence>,
        now: OffsetDateTime,
    ) -> bool {
        let Some(sig) = self
            .signatures
            .iter_mut()
            .find(|s| s.signer_id == signer_id && s.is_pending())
        else {
            return false;
        };

        sig.status = SignerStatus::Signed;
        sig.signed_at = Some(now);
        sig.signer_name = Some(signer_name.to_string());
        sig.comments = comments.map(str::to_owned);
        if let Some(evidence) = evidence {
            sig.signature = Some(evidence.payload);
            sig.qualified_signature = evidence.qualified;
        }

        self.current_approvals += 1;
        if self.status != StepStatus::Approved && self.current_approvals >= self.required_approvals {
            self.status = StepStatus::Approved;
            self.completed_at = Some(now);
        }
        true
    }

    /// Mark `signer_id` rejected; one rejection closes the whole step.
    pub(crate) fn record_rejection(
        &mut self,
        signer_id: &str,
        signer_name: &str,
        reason: &str,
        now: OffsetDateTime,
    ) -> bool {
        let Some(sig) = self
            .signatures
            .iter_mut()
            .find(|s| s.signer_id == signer_id && s.is_pending())
        else {
            return false;
        };

        sig.status = SignerStatus::Rejected;
        sig.rejected_at = Some(now);
        sig.signer_name = Some(signer_name.to_string());
        sig.rejection_reason = Some(reason.to_string());

        self.status = StepStatus::Rejected;
        self.completed_at = Some(now);
        true
    }
}
