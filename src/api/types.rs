//! Corpos JSON trocados entre o servidor HTTP e seus clientes.
//!
//! Todas as structs derivam `Serialize` e `Deserialize`, pois o mesmo tipo é
//! produzido pelo servidor e lido pelo cliente da CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::state_machine::{WorkflowRecord, WorkflowStatus};

/// Queries maiores que isso são truncadas na listagem de ativos.
const SUMMARY_QUERY_CHARS: usize = 100;

/// Corpo de `POST /api/v1/workflow/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    /// Descrição da tarefa em linguagem natural.
    pub query: String,
    /// Modelo ou alias; o padrão configurado é usado se ausente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkflowRecord> for CreateWorkflowResponse {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.id.clone(),
            status: record.status,
            message: record.message.clone(),
            created_at: record.created_at,
        }
    }
}

/// Corpo de `GET /api/v1/workflow/{id}/status`.
///
/// Os campos opcionais são omitidos do JSON enquanto não existirem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub message: String,
    pub query: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Segundos entre `started_at` e `completed_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl From<WorkflowRecord> for WorkflowStatusResponse {
    fn from(record: WorkflowRecord) -> Self {
        let duration = record.duration_secs();
        let failure = record.failure.as_ref().map(|reason| reason.kind());
        Self {
            workflow_id: record.id,
            status: record.status,
            message: record.message,
            query: record.query,
            model: record.model,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration,
            failure,
            logs: (!record.logs.is_empty()).then_some(record.logs),
        }
    }
}

/// Corpo de `DELETE /api/v1/workflow/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelWorkflowResponse {
    pub success: bool,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub message: String,
}

impl From<&WorkflowRecord> for CancelWorkflowResponse {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            success: true,
            workflow_id: record.id.clone(),
            status: record.status,
            message: record.message.clone(),
        }
    }
}

/// Uma entrada de `GET /api/v1/workflow/active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflowSummary {
    pub workflow_id: String,
    pub query: String,
    pub model: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkflowRecord> for ActiveWorkflowSummary {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            workflow_id: record.id.clone(),
            query: truncate_query(&record.query),
            model: record.model.clone(),
            status: record.status,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflowsResponse {
    pub active_workflows: Vec<ActiveWorkflowSummary>,
}

/// Corpo de toda resposta de erro: `{"status": "error", "message": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
}

fn truncate_query(query: &str) -> String {
    match query.char_indices().nth(SUMMARY_QUERY_CHARS) {
        Some((cut, _)) => format!("{}...", &query[..cut]),
        None => query.to_string(),
    }
}
