//! REST implementation of [`Backend`] on top of reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{
    AbortResponse, CreateRunRequest, RunExecutionIn, RunnerStatus, TestCollections,
    TestRunExecution,
};
use super::Backend;
use crate::common::config::BackendConfig;
use crate::common::{Error, Result};
use crate::selection::TestSelection;

const API_PREFIX: &str = "/api/v1";

/// Backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            config.http_base(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::BackendUnavailable {
                    url: self.base_url.clone(),
                    message: e.to_string(),
                }
            } else {
                Error::api(operation, None, e.to_string())
            }
        })?;
        tracing::debug!(operation, status = %response.status(), "Backend responded");
        Ok(response)
    }

    async fn expect_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.send(operation, request).await?;
        let response = check_status(operation, response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::api(operation, None, format!("cannot read response: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| Error::api(operation, None, format!("unexpected response: {e}")))
    }
}

/// Turn a non-success response into an API error carrying the backend's detail
async fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::api(operation, Some(status.as_u16()), detail_message(&body, status)))
}

/// FastAPI style `{"detail": ...}` bodies carry the useful message
fn detail_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn url(&self) -> &str {
        &self.base_url
    }

    async fn catalog(&self) -> Result<TestCollections> {
        let request = self.client.get(self.endpoint("/test_collections"));
        self.expect_json("fetch test collections", request).await
    }

    async fn create_run(
        &self,
        title: &str,
        project_id: i64,
        selection: &TestSelection,
    ) -> Result<TestRunExecution> {
        let body = CreateRunRequest {
            test_run_execution_in: RunExecutionIn {
                title: title.to_string(),
                project_id,
            },
            selected_tests: selection.selected_tests_payload(),
            config: selection.config_payload(),
        };
        tracing::debug!(
            cases = selection.cases.len(),
            "Submitting test run '{}'",
            title
        );
        let request = self
            .client
            .post(self.endpoint("/test_run_executions"))
            .json(&body);
        self.expect_json("create test run", request).await
    }

    async fn start_run(&self, run_id: i64) -> Result<TestRunExecution> {
        let request = self
            .client
            .post(self.endpoint(&format!("/test_run_executions/{run_id}/start")));
        self.expect_json("start test run", request).await
    }

    async fn abort(&self) -> Result<AbortResponse> {
        const OPERATION: &str = "abort testing";
        let request = self
            .client
            .post(self.endpoint("/test_run_executions/abort-testing"));
        let response = self.send(OPERATION, request).await?;
        match response.status() {
            status if status.is_success() => Ok(AbortResponse::Accepted),
            StatusCode::NOT_FOUND => Ok(AbortResponse::NotFound),
            StatusCode::CONFLICT | StatusCode::GONE => Ok(AbortResponse::AlreadyTerminal),
            _ => check_status(OPERATION, response)
                .await
                .map(|_| AbortResponse::Accepted),
        }
    }

    async fn runner_status(&self) -> Result<RunnerStatus> {
        let request = self
            .client
            .get(self.endpoint("/test_run_executions/status"));
        self.expect_json("get test runner status", request).await
    }

    async fn list_runs(
        &self,
        skip: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<TestRunExecution>> {
        let mut query = Vec::new();
        if let Some(skip) = skip {
            query.push(("skip", skip));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit));
        }
        let request = self
            .client
            .get(self.endpoint("/test_run_executions"))
            .query(&query);
        self.expect_json("list test runs", request).await
    }

    async fn get_run(&self, run_id: i64) -> Result<TestRunExecution> {
        let request = self
            .client
            .get(self.endpoint(&format!("/test_run_executions/{run_id}")));
        self.expect_json("get test run", request).await
    }

    async fn run_log(&self, run_id: i64) -> Result<String> {
        const OPERATION: &str = "fetch test run log";
        let request = self
            .client
            .get(self.endpoint(&format!("/test_run_executions/{run_id}/log")))
            .query(&[("json_entries", "false"), ("download", "false")]);
        let response = self.send(OPERATION, request).await?;
        let response = check_status(OPERATION, response).await?;
        response
            .text()
            .await
            .map_err(|e| Error::api(OPERATION, None, format!("cannot read response: {e}")))
    }
}
