//! Flow state machine: approve / reject / cancel and status aggregation.
//!
//! Every mutation clones the flow, applies the change to the clone and
//! recomputes the aggregate status, so callers can diff the before and after
//! versions. Unknown steps, unknown approvers and replayed decisions are
//! no-ops in [`EngineMode::Lenient`] (the default) and errors in
//! [`EngineMode::Strict`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use super::step::{create_step, SignatureEvidence};
use super::{
    ApprovalFlow, ApprovalStep, Cancellation, FlowError, FlowStatus, FlowType, NewFlow, StepStatus,
};
use crate::audit::Actor;
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Invalid references and replays return the flow unchanged.
    #[default]
    Lenient,
    /// Invalid references and replays return a [`FlowError`].
    Strict,
}

pub struct FlowEngine<C = SystemClock> {
    clock: C,
    mode: EngineMode,
}

impl FlowEngine<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FlowEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FlowEngine<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            mode: EngineMode::Lenient,
        }
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Build a flow and all of its steps in one go.
    ///
    /// Steps are ordered by step number and the first one becomes current.
    /// Unanimous flows require every approver of a step to sign.
    pub fn create_flow(&self, new: NewFlow) -> ApprovalFlow {
        let now = self.clock.now();
        let mut specs = new.steps;
        specs.sort_by_key(|s| s.step_number);

        let steps: Vec<ApprovalStep> = specs
            .iter()
            .map(|spec| {
                let required = match new.flow_type {
                    FlowType::Unanimous => spec.approvers.len() as u32,
                    FlowType::Sequential | FlowType::Parallel => spec.required_approvals,
                };
                create_step(spec.step_number, &spec.approvers, required)
            })
            .collect();

        let mut flow = ApprovalFlow {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: new.document_id,
            project_id: new.project_id,
            flow_type: new.flow_type,
            status: FlowStatus::Pending,
            current_step_number: steps.first().map_or(1, |s| s.step_number),
            steps,
            initiator: new.initiator,
            due_date: new.due_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancellation: None,
        };
        flow.status = aggregate_status(&flow);
        flow
    }

    /// Record `approver`'s signature on a step.
    ///
    /// When the step reaches its required approvals it becomes `approved`;
    /// in a sequential flow the current step then moves forward. A signer
    /// still pending on an approved step can sign it late.
    pub fn approve(
        &self,
        flow: &ApprovalFlow,
        step_id: &str,
        approver: &Actor,
        comments: Option<&str>,
        evidence: Option<SignatureEvidence>,
    ) -> Result<ApprovalFlow, FlowError> {
        let idx = match self.locate(flow, step_id, &approver.user_id) {
            Ok(idx) => idx,
            Err(err) => return self.ignore_or(flow, err),
        };

        let now = self.clock.now();
        let mut next = flow.clone();
        let step = &mut next.steps[idx];
        let was_approved = step.status == StepStatus::Approved;
        step.record_approval(&approver.user_id, &approver.user_name, comments, evidence, now);

        let approved_number =
            (!was_approved && step.status == StepStatus::Approved).then_some(step.step_number);
        if let Some(number) = approved_number {
            if next.flow_type == FlowType::Sequential && number == next.current_step_number {
                advance(&mut next);
            }
        }

        finish(&mut next, now);
        Ok(next)
    }

    /// Record `approver`'s rejection. A single rejection closes the step and
    /// therefore the flow, even when the step had already met its threshold.
    pub fn reject(
        &self,
        flow: &ApprovalFlow,
        step_id: &str,
        approver: &Actor,
        reason: &str,
    ) -> Result<ApprovalFlow, FlowError> {
        let idx = match self.locate(flow, step_id, &approver.user_id) {
            Ok(idx) => idx,
            Err(err) => return self.ignore_or(flow, err),
        };

        let now = self.clock.now();
        let mut next = flow.clone();
        next.steps[idx].record_rejection(&approver.user_id, &approver.user_name, reason, now);
        finish(&mut next, now);
        Ok(next)
    }

    /// Cancel the flow regardless of its state. Steps and signatures are left
    /// as they are.
    pub fn cancel(&self, flow: &ApprovalFlow, actor: &Actor, reason: &str) -> ApprovalFlow {
        let now = self.clock.now();
        let mut next = flow.clone();
        next.status = FlowStatus::Cancelled;
        next.cancellation = Some(Cancellation {
            user_id: actor.user_id.clone(),
            user_name: actor.user_name.clone(),
            reason: reason.to_string(),
            cancelled_at: now,
        });
        next.updated_at = now;
        next
    }

    /// Find the step index for a decision by `approver_id`, checking that the
    /// approver still has a pending record in an open flow. The step itself
    /// may already be approved.
    fn locate(&self, flow: &ApprovalFlow, step_id: &str, approver_id: &str) -> Result<usize, FlowError> {
        let status = aggregate_status(flow);
        if status.is_terminal() {
            return Err(FlowError::FlowClosed {
                flow_id: flow.id.clone(),
                status,
            });
        }
        let idx = flow
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| FlowError::StepNotFound {
                flow_id: flow.id.clone(),
                step_id: step_id.to_string(),
            })?;
        let step = &flow.steps[idx];
        let sig = step
            .signature(approver_id)
            .ok_or_else(|| FlowError::ApproverNotFound {
                step_id: step_id.to_string(),
                approver_id: approver_id.to_string(),
            })?;
        if !sig.is_pending() {
            return Err(FlowError::NoPendingSignature {
                step_id: step_id.to_string(),
                approver_id: approver_id.to_string(),
            });
        }
        Ok(idx)
    }

    fn ignore_or(&self, flow: &ApprovalFlow, err: FlowError) -> Result<ApprovalFlow, FlowError> {
        match self.mode {
            EngineMode::Strict => Err(err),
            EngineMode::Lenient => {
                debug!(flow_id = %flow.id, reason = %err, "decision ignored");
                Ok(flow.clone())
            }
        }
    }
}

/// Move a sequential flow past the current step, skipping steps that are
/// already approved. Stays put when there is no later step.
fn advance(flow: &mut ApprovalFlow) {
    loop {
        let current = flow.current_step_number;
        let Some(next) = flow
            .steps
            .iter()
            .filter(|s| s.step_number > current)
            .min_by_key(|s| s.step_number)
        else {
            return;
        };
        flow.current_step_number = next.step_number;
        if next.status != StepStatus::Approved {
            return;
        }
    }
}

fn finish(flow: &mut ApprovalFlow, now: OffsetDateTime) {
    let status = aggregate_status(flow);
    if matches!(status, FlowStatus::Approved | FlowStatus::Rejected) && flow.completed_at.is_none()
    {
        flow.completed_at = Some(now);
    }
    flow.status = status;
    flow.updated_at = now;
}

/// The flow status implied by its steps.
///
/// `cancelled` if the flow was cancelled or any step is; else `rejected` if
/// any step is; else `approved` if every step is; else `in-review` once the
/// active step carries a signature (any step, for parallel and unanimous
/// flows); else `pending`.
pub fn aggregate_status(flow: &ApprovalFlow) -> FlowStatus {
    if flow.cancellation.is_some() || flow.status == FlowStatus::Cancelled {
        return FlowStatus::Cancelled;
    }
    let steps = &flow.steps;
    if steps.iter().any(|s| s.status == StepStatus::Cancelled) {
        return FlowStatus::Cancelled;
    }
    if steps.iter().any(|s| s.status == StepStatus::Rejected) {
        return FlowStatus::Rejected;
    }
    if !steps.is_empty() && steps.iter().all(|s| s.status == StepStatus::Approved) {
        return FlowStatus::Approved;
    }
    let in_review = match flow.flow_type {
        FlowType::Sequential => flow.current_step().is_some_and(|s| s.signed_count() > 0),
        FlowType::Parallel | FlowType::Unanimous => steps.iter().any(|s| s.signed_count() > 0),
    };
    if in_review {
        FlowStatus::InReview
    } else {
        FlowStatus::Pending
    }
}

/// Users who may sign right now.
///
/// Sequential: the pending signers of the current step, while the flow is
/// open and that step is not yet approved. Parallel and unanimous: the
/// pending signers of every step that is not terminal.
pub fn active_approvers(flow: &ApprovalFlow) -> Vec<String> {
    match flow.flow_type {
        FlowType::Sequential => {
            if !matches!(flow.status, FlowStatus::Pending | FlowStatus::InReview) {
                return Vec::new();
            }
            match flow.current_step() {
                Some(step) if !step.status.is_terminal() => {
                    step.pending_signers().map(str::to_owned).collect()
                }
                _ => Vec::new(),
            }
        }
        FlowType::Parallel | FlowType::Unanimous => {
            let mut out: Vec<String> = Vec::new();
            for step in flow.steps.iter().filter(|s| !s.status.is_terminal()) {
                for signer in step.pending_signers() {
                    if !out.iter().any(|o| o == signer) {
                        out.push(signer.to_string());
                    }
                }
            }
            out
        }
    }
}

pub fn can_approve(flow: &ApprovalFlow, user_id: &str) -> bool {
    active_approvers(flow).iter().any(|a| a == user_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: usize,
    pub completed_steps: usize,
    /// Rounded percentage of approved steps; 0 for a flow without steps.
    pub percentage: u32,
    pub total_signatures: usize,
    pub completed_signatures: usize,
}

pub fn progress(flow: &ApprovalFlow) -> Progress {
    let total_steps = flow.steps.len();
    let completed_steps = flow
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Approved)
        .count();
    let percentage = if total_steps == 0 {
        0
    } else {
        (completed_steps as f64 / total_steps as f64 * 100.0).round() as u32
    };
    Progress {
        total_steps,
        completed_steps,
        percentage,
        total_signatures: flow.steps.iter().map(|s| s.signatures.len()).sum(),
        completed_signatures: flow.steps.iter().map(|s| s.signed_count()).sum(),
    }
}
