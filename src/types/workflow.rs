//! Workflow execution data model (§3: Workflow; §4.9 policy/lifecycle).

use super::{Value, WorkflowId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Succeeded | WorkflowState::Failed | WorkflowState::Cancelled)
    }
}

/// Workflow kind, resolved by the policy rule table from `(consensus, score_bucket, vector)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Quarantine,
    Forward,
    DispatchResponse,
    Drop,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowKind::Quarantine => "quarantine",
            WorkflowKind::Forward => "forward",
            WorkflowKind::DispatchResponse => "dispatch_response",
            WorkflowKind::Drop => "drop",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub kind: WorkflowKind,
    pub inputs: Value,
    pub state: WorkflowState,
    pub started_ts: i64,
    pub ended_ts: Option<i64>,
}
