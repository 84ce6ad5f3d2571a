//! Test harness backend client
//!
//! Commands talk to the backend through the [`Backend`] trait so that flows
//! can be exercised against an in-process fake.

pub mod http;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::Result;
use crate::selection::TestSelection;
use crate::stream::RunLayout;
pub use http::HttpBackend;
use types::{AbortResponse, RunnerStatus, TestCollections, TestRunExecution};

/// A created and started test run
#[derive(Debug, Clone, PartialEq)]
pub struct RunHandle {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Suite/case/step names by execution index
    pub layout: RunLayout,
}

impl RunHandle {
    pub fn from_execution(run: &TestRunExecution) -> Self {
        Self {
            id: run.id,
            title: run.title.clone(),
            created_at: run.created_at.unwrap_or_else(Utc::now),
            layout: RunLayout::from_execution(run),
        }
    }
}

/// Operations the CLI needs from the backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base URL, used in error messages
    fn url(&self) -> &str;

    async fn catalog(&self) -> Result<TestCollections>;

    async fn create_run(
        &self,
        title: &str,
        project_id: i64,
        selection: &TestSelection,
    ) -> Result<TestRunExecution>;

    async fn start_run(&self, run_id: i64) -> Result<TestRunExecution>;

    /// Abort whatever run the backend is executing
    async fn abort(&self) -> Result<AbortResponse>;

    async fn runner_status(&self) -> Result<RunnerStatus>;

    async fn list_runs(&self, skip: Option<u32>, limit: Option<u32>)
        -> Result<Vec<TestRunExecution>>;

    async fn get_run(&self, run_id: i64) -> Result<TestRunExecution>;

    async fn run_log(&self, run_id: i64) -> Result<String>;
}

/// Create a run for `selection`
///
/// The run is not started yet, so the caller can attach to its event stream
/// before the first event is sent. Failures are reported as submission
/// errors. Nothing is retried.
pub async fn create(
    backend: &dyn Backend,
    title: &str,
    project_id: i64,
    selection: &TestSelection,
) -> Result<RunHandle> {
    let created = backend
        .create_run(title, project_id, selection)
        .await
        .map_err(|e| e.into_submission())?;
    tracing::info!(run_id = created.id, title = %created.title, "Created test run");

    let mut handle = RunHandle::from_execution(&created);
    if handle.title.is_empty() {
        handle.title = title.to_string();
    }
    Ok(handle)
}

/// Start a created run
pub async fn start(backend: &dyn Backend, handle: &mut RunHandle) -> Result<()> {
    let started = backend
        .start_run(handle.id)
        .await
        .map_err(|e| e.into_submission())?;
    tracing::info!(run_id = started.id, "Started test run");

    let layout = RunLayout::from_execution(&started);
    if !layout.is_empty() {
        handle.layout = layout;
    }
    Ok(())
}
