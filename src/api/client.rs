use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::ClientError;
use super::types::{
    ActiveWorkflowsResponse, CancelWorkflowResponse, CreateWorkflowRequest,
    CreateWorkflowResponse, ErrorBody, HealthResponse, WorkflowStatusResponse,
};

/// HTTP client for a running Oasis server.
pub struct OasisClient {
    client: Client,
    base_url: String,
}

impl OasisClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Cancel waits for the agent to be reaped before answering.
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.client.get(self.url("/health")).send().await?;
        decode(response, "").await
    }

    pub async fn execute(
        &self,
        query: &str,
        model: Option<&str>,
    ) -> Result<CreateWorkflowResponse, ClientError> {
        let request = CreateWorkflowRequest {
            query: query.to_string(),
            model: model.map(str::to_string),
        };
        let response = self
            .client
            .post(self.url("/api/v1/workflow/execute"))
            .json(&request)
            .send()
            .await?;
        decode(response, "").await
    }

    pub async fn status(&self, id: &str) -> Result<WorkflowStatusResponse, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/workflow/{id}/status")))
            .send()
            .await?;
        decode(response, id).await
    }

    pub async fn cancel(&self, id: &str) -> Result<CancelWorkflowResponse, ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/v1/workflow/{id}")))
            .send()
            .await?;
        decode(response, id).await
    }

    pub async fn active(&self) -> Result<ActiveWorkflowsResponse, ClientError> {
        let response = self
            .client
            .get(self.url("/api/v1/workflow/active"))
            .send()
            .await?;
        decode(response, "").await
    }
}

/// Turn a response into `T`, or into the error described by its body.
async fn decode<T: DeserializeOwned>(response: Response, id: &str) -> Result<T, ClientError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND && !id.is_empty() {
        return Err(ClientError::NotFound(id.to_string()));
    }

    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body = response.json::<T>().await?;
    Ok(body)
}
