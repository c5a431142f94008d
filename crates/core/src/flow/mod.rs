//! Multi-party document approval flows.
//!
//! A flow owns an ordered list of steps; each step owns one signature record
//! per approver. Flows are never edited in place: every mutation in
//! [`engine`] takes a flow by reference and returns the next version, with
//! the aggregate status recomputed from the steps.
//!
//! Persistence and per-flow serialization of concurrent approvals live in
//! [`repository`].

pub mod engine;
mod error;
pub mod repository;
pub mod step;
pub mod validate;


pub use engine::{
    active_approvers, aggregate_status, can_approve, progress, EngineMode, FlowEngine, Progress,
};
pub use error::FlowError;
pub use repository::{FlowRepository, FlowUpdate};
pub use step::{create_step, ApprovalStep, SignatureData, SignatureEvidence, SignerStatus};
pub use validate::{validate, ValidationReport};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowType {
    /// Steps are signed one after another; only the current step is open.
    Sequential,
    /// All steps are open at once; each needs its own N-of-M approvals.
    Parallel,
    /// Like parallel, but every approver of every step must sign.
    Unanimous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Cancelled,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowStatus::Approved | FlowStatus::Rejected | FlowStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Approved | StepStatus::Rejected | StepStatus::Cancelled
        )
    }
}

/// Who cancelled a flow, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub user_id: String,
    pub user_name: String,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub cancelled_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: String,
    pub document_id: String,
    pub project_id: String,
    pub flow_type: FlowType,
    /// Derived from `steps` after every mutation; only `cancel` sets it directly.
    pub status: FlowStatus,
    pub current_step_number: u32,
    pub steps: Vec<ApprovalStep>,
    pub initiator: Actor,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub cancellation: Option<Cancellation>,
}

impl ApprovalFlow {
    pub fn step(&self, step_id: &str) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_by_number(&self, step_number: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.step_by_number(self.current_step_number)
    }
}

/// Blueprint for one step of a new flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_number: u32,
    pub approvers: Vec<String>,
    pub required_approvals: u32,
}

/// Everything needed to initiate a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlow {
    pub document_id: String,
    pub project_id: String,
    pub flow_type: FlowType,
    pub steps: Vec<StepSpec>,
    pub initiator: Actor,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
}
