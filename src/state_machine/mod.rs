mod state;
mod workflow;

pub use state::{Event, StateMachine, Transition, WorkflowStatus};
pub use workflow::{FailureReason, WorkflowRecord, new_workflow_id};
