use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::WorkflowStatus;
use crate::error::FailureKind;

/// Why a workflow ended in `Failed`.
///
/// The `Display` text becomes the record's status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The agent process could not be started.
    Spawn(String),
    /// No query prompt was seen within the handshake window.
    HandshakeTimeout(Duration),
    /// The agent exited non-zero, printed an error marker, or never reported completion.
    AgentReported(String),
    /// The run exceeded its wall-clock budget.
    ExecutionTimeout(Duration),
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureReason::Spawn(_) => FailureKind::SpawnError,
            FailureReason::HandshakeTimeout(_) => FailureKind::HandshakeTimeout,
            FailureReason::AgentReported(_) => FailureKind::AgentReportedFailure,
            FailureReason::ExecutionTimeout(_) => FailureKind::ExecutionTimeout,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Spawn(msg) => write!(f, "Failed to start agent: {msg}"),
            FailureReason::HandshakeTimeout(budget) => write!(
                f,
                "Agent did not prompt for a query within {}",
                format_budget(*budget)
            ),
            FailureReason::AgentReported(msg) => write!(f, "{msg}"),
            FailureReason::ExecutionTimeout(budget) => {
                write!(f, "Workflow timed out after {}", format_budget(*budget))
            }
        }
    }
}

/// Whole seconds print as `300s`; anything finer prints in milliseconds.
fn format_budget(budget: Duration) -> String {
    if budget.subsec_nanos() == 0 && budget.as_secs() > 0 {
        format!("{}s", budget.as_secs())
    } else {
        format!("{}ms", budget.as_millis())
    }
}

/// One submitted query and everything known about its execution.
///
/// Records are only mutated through [`StateMachine::apply`](super::StateMachine::apply)
/// and log appends, both inside the registry lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub query: String,
    pub model: String,
    pub status: WorkflowStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub logs: String,
    pub failure: Option<FailureReason>,
    /// OS process id, set when the workflow starts running.
    pub pid: Option<u32>,
}

/// Generate an opaque workflow identifier.
pub fn new_workflow_id() -> String {
    format!("workflow_{}", Uuid::new_v4().simple())
}

impl WorkflowRecord {
    pub fn new(id: String, query: String, model: String) -> Self {
        Self {
            id,
            query,
            model,
            status: WorkflowStatus::Pending,
            message: WorkflowStatus::Pending.default_message().to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            logs: String::new(),
            failure: None,
            pid: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and completion, once both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
