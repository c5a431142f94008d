use signflow_storage::StorageError;

use super::FlowStatus;

/// Errors from flow mutations in strict mode and from the flow repository.
///
/// Lenient-mode engine calls never produce the lookup variants; they return
/// the flow unchanged instead.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow not found: {flow_id}")]
    FlowNotFound { flow_id: String },

    #[error("step {step_id} not found in flow {flow_id}")]
    StepNotFound { flow_id: String, step_id: String },

    #[error("{approver_id} is not an approver of step {step_id}")]
    ApproverNotFound { step_id: String, approver_id: String },

    #[error("{approver_id} has already signed or rejected step {step_id}")]
    NoPendingSignature { step_id: String, approver_id: String },

    #[error("flow {flow_id} is {status:?} and accepts no further decisions")]
    FlowClosed { flow_id: String, status: FlowStatus },

    #[error("invalid flow: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
