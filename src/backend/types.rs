//! Backend REST wire types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /api/v1/test_collections`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestCollections {
    pub test_collections: BTreeMap<String, TestCollection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestCollection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub test_suites: BTreeMap<String, TestSuite>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestSuite {
    #[serde(default)]
    pub metadata: Option<TestMetadata>,
    #[serde(default)]
    pub test_cases: BTreeMap<String, TestCaseEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestCaseEntry {
    #[serde(default)]
    pub metadata: TestMetadata,
    /// Parameter names the case accepts as overrides
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Capability ids that must all be enabled for the case to apply
    #[serde(default)]
    pub pics: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestMetadata {
    #[serde(default)]
    pub public_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Body of `POST /api/v1/test_run_executions`
#[derive(Debug, Clone, Serialize)]
pub struct CreateRunRequest {
    pub test_run_execution_in: RunExecutionIn,
    pub selected_tests: Value,
    pub config: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunExecutionIn {
    pub title: String,
    pub project_id: i64,
}

/// Run states reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Pending,
    Executing,
    PendingActuation,
    Passed,
    Failed,
    Error,
    NotApplicable,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Error | Self::NotApplicable | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::PendingActuation => "pending_actuation",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::NotApplicable => "not_applicable",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

/// A test run as returned by create/start/get
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRunExecution {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: Option<TestState>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_suite_executions: Vec<SuiteExecution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteExecution {
    #[serde(default)]
    pub test_suite_metadata: TestMetadata,
    #[serde(default)]
    pub test_case_executions: Vec<CaseExecution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseExecution {
    #[serde(default)]
    pub test_case_metadata: TestMetadata,
    #[serde(default)]
    pub test_step_executions: Vec<StepExecution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    #[serde(default)]
    pub title: String,
}

/// Runner state from `GET /api/v1/test_run_executions/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Loading,
    Ready,
    Running,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerStatus {
    pub state: RunnerState,
    #[serde(default)]
    pub test_run_execution_id: Option<i64>,
}

impl RunnerStatus {
    /// Id of the run the backend is executing, if any
    pub fn active_run(&self) -> Option<i64> {
        match self.state {
            RunnerState::Idle => None,
            _ => self.test_run_execution_id,
        }
    }
}

/// Outcome of an abort request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortResponse {
    Accepted,
    /// The backend had nothing left to abort
    AlreadyTerminal,
    NotFound,
}
