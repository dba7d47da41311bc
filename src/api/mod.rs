pub mod client;
pub mod error;
pub mod server;
pub mod types;

pub use client::OasisClient;
pub use error::ClientError;
pub use types::{ActiveWorkflowsResponse, WorkflowStatusResponse};
