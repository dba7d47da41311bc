use thiserror::Error;

#[derive(Debug, Error)]
pub enum OasisError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow {0} is still active")]
    WorkflowActive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Reasons the launcher could not start the agent process.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("agent executable not found: {program}")]
    NotFound { program: String },

    #[error("permission denied launching {program}")]
    PermissionDenied { program: String },

    #[error("failed to launch {program}: {source}")]
    Os {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound {
                program: program.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied {
                program: program.to_string(),
            },
            _ => SpawnError::Os {
                program: program.to_string(),
                source: err,
            },
        }
    }
}

/// Classifies a workflow failure for API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent process could not be started.
    SpawnError,
    /// The agent never showed its query prompt.
    HandshakeTimeout,
    /// Non-zero exit, an error marker, or output that ended without a completion marker.
    AgentReportedFailure,
    /// The wall-clock budget ran out while the agent was running.
    ExecutionTimeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::SpawnError => write!(f, "spawn_error"),
            FailureKind::HandshakeTimeout => write!(f, "handshake_timeout"),
            FailureKind::AgentReportedFailure => write!(f, "agent_reported_failure"),
            FailureKind::ExecutionTimeout => write!(f, "execution_timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_maps_io_kinds() {
        let err = SpawnError::from_io(
            "agent",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert_eq!(err.to_string(), "agent executable not found: agent");

        let err = SpawnError::from_io(
            "agent",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, SpawnError::PermissionDenied { .. }));

        let err = SpawnError::from_io("agent", std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "failed to launch agent: boom");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::HandshakeTimeout).unwrap();
        assert_eq!(json, r#""handshake_timeout""#);
        assert_eq!(
            FailureKind::AgentReportedFailure.to_string(),
            "agent_reported_failure"
        );
    }

    #[test]
    fn oasis_error_display() {
        let err = OasisError::WorkflowNotFound("workflow_abc".into());
        assert_eq!(err.to_string(), "Workflow not found: workflow_abc");
    }
}
