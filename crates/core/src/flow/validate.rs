use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ApprovalFlow;

/// Outcome of structural validation. Never an error: callers decide what an
/// invalid flow means for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub fn validate(flow: &ApprovalFlow) -> ValidationReport {
    let mut errors = Vec::new();

    if flow.document_id.trim().is_empty() {
        errors.push("document id is required".to_string());
    }
    if flow.project_id.trim().is_empty() {
        errors.push("project id is required".to_string());
    }
    if flow.steps.is_empty() {
        errors.push("flow must have at least one step".to_string());
    }

    let mut seen = BTreeSet::new();
    for step in &flow.steps {
        let n = step.step_number;
        if !seen.insert(n) {
            errors.push(format!("step {n}: duplicate step number"));
        }
        let count = step.approvers.len() as u32;
        if count == 0 {
            errors.push(format!("step {n}: at least one approver is required"));
        }
        if step.required_approvals < 1 || step.required_approvals > count {
            errors.push(format!(
                "step {n}: required approvals ({}) must be between 1 and the number of approvers ({count})",
                step.required_approvals
            ));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
