//! Runs the external agent as supervised, addressable workflows.

mod classifier;
mod driver;
mod launcher;
mod lifecycle;
mod registry;

pub use launcher::AgentLauncher;
pub use lifecycle::{Supervisor, SupervisorSettings};
pub use registry::spawn_retention_sweeper;
