use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::workflow::{FailureReason, WorkflowRecord};

/// The five states of a workflow.
///
/// Each workflow flows through: PENDING → RUNNING → {COMPLETED | FAILED | CANCELLED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Message shown to callers when no more specific text applies.
    pub fn default_message(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "Workflow queued for execution",
            WorkflowStatus::Running => "AI agent is executing your task...",
            WorkflowStatus::Completed => "Workflow successfully executed",
            WorkflowStatus::Failed => "Workflow execution failed",
            WorkflowStatus::Cancelled => "Workflow cancelled by user",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Something that happened to a workflow and may move it to another state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Process spawned and its query prompt was matched.
    Started { pid: Option<u32> },
    /// The classifier reported success and the process exited with code zero.
    Succeeded,
    Failed(FailureReason),
    CancelRequested,
}

/// The result of applying an event to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record moved between states.
    Moved {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    /// The record is already terminal; the event was dropped.
    Ignored { current: WorkflowStatus },
    /// The event is not valid in the current state (e.g. completing a pending workflow).
    Rejected { current: WorkflowStatus },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Moved { .. })
    }
}

/// Drives a `WorkflowRecord` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `record`, updating status, message and timestamps.
    ///
    /// - `Started` moves `Pending` to `Running` and stamps `started_at`.
    /// - `Succeeded` moves `Running` to `Completed`.
    /// - `Failed` and `CancelRequested` end any non-terminal workflow.
    /// - Terminal states are final: every event on them is `Ignored`.
    pub fn apply(record: &mut WorkflowRecord, event: Event) -> Transition {
        let from = record.status;
        if from.is_terminal() {
            return Transition::Ignored { current: from };
        }

        let to = match (&event, from) {
            (Event::Started { .. }, WorkflowStatus::Pending) => WorkflowStatus::Running,
            (Event::Succeeded, WorkflowStatus::Running) => WorkflowStatus::Completed,
            (Event::Failed(_), _) => WorkflowStatus::Failed,
            (Event::CancelRequested, _) => WorkflowStatus::Cancelled,
            _ => return Transition::Rejected { current: from },
        };

        let now = Utc::now();
        match event {
            Event::Started { pid } => {
                record.started_at = Some(now);
                record.pid = pid;
                record.message = to.default_message().to_string();
            }
            Event::Failed(reason) => {
                record.message = reason.to_string();
                record.failure = Some(reason);
            }
            Event::Succeeded | Event::CancelRequested => {
                record.message = to.default_message().to_string();
            }
        }
        if to.is_terminal() {
            record.completed_at = Some(now);
        }
        record.status = to;

        Transition::Moved { from, to }
    }
}
