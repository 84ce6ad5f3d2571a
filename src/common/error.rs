//! Error types for the test-harness CLI
//!
//! Error messages are written for the person at the terminal: each one names
//! what went wrong and, where possible, what to do next. Input problems are
//! collected into lists so that a single invocation reports all of them.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A malformed input file entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// File the problem was found in
    pub path: String,
    /// 1-based line number, when the format has lines
    pub line: Option<usize>,
    pub message: String,
}

impl ParseIssue {
    pub fn new(path: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path, line, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

/// A problem with the merged test selection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Invalid test id '{id}'. Expected format: TC-XXX-1.1 or TC_XXX_1_1")]
    InvalidTestId { id: String },

    #[error("Test case '{id}' is not in the backend catalog")]
    UnknownTestCase { id: String },

    #[error("Unknown capability '{id}' in {origin}")]
    UnknownCapability { id: String, origin: String },

    #[error("Capability '{id}' is declared more than once in {origin}")]
    DuplicateCapability { id: String, origin: String },

    #[error(
        "Capability '{id}' conflicts: {first_source} sets {first_value}, {second_source} sets {second_value}"
    )]
    CapabilityConflict {
        id: String,
        first_source: String,
        first_value: bool,
        second_source: String,
        second_value: bool,
    },

    #[error("Property '{path}' in {origin} does not match any test case parameter or run setting")]
    UnknownProperty { path: String, origin: String },

    #[error("Property '{path}' is set twice in {origin} (lines {first_line} and {second_line})")]
    DuplicateProperty {
        path: String,
        origin: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("Test case '{case}' has no parameter '{parameter}' (set in {origin})")]
    UnknownParameter {
        case: String,
        parameter: String,
        origin: String,
    },

    #[error(
        "Conflicting values for {target}: {first_source} sets '{first_value}', {second_source} sets '{second_value}'"
    )]
    ParameterConflict {
        target: String,
        first_source: String,
        first_value: String,
        second_source: String,
        second_value: String,
    },

    #[error("Invalid value for '{path}' in {origin}: {reason}")]
    InvalidValue {
        path: String,
        origin: String,
        reason: String,
    },

    #[error("Override without selection: '{case}' is configured in {origin} but not selected for this run")]
    OverrideWithoutSelection { case: String, origin: String },

    #[error("Circular reference: {}", .cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },

    #[error("'{from}' references '{to}', which has no value")]
    DanglingReference { from: String, to: String },

    #[error("No test cases selected. Use --tests-list, --selected-tests or a capability file that enables applicable tests")]
    EmptySelection,
}

fn bullet_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Main error type for the test-harness CLI
#[derive(Error, Debug)]
pub enum Error {
    // === Input Errors ===
    #[error("Failed to parse input files:\n{}", bullet_list(.0))]
    Parse(Vec<ParseIssue>),

    #[error("Invalid test selection ({} problem(s)):\n{}", .0.len(), bullet_list(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Invalid arguments: {0}")]
    Usage(String),

    // === Backend Errors ===
    #[error("Failed to {operation}{}: {message}", status_suffix(.status))]
    Submission {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Failed to {operation}{}: {message}", status_suffix(.status))]
    Api {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Backend unreachable at {url}: {message}. Check that the test harness is running")]
    BackendUnavailable { url: String, message: String },

    // === Run / Stream Errors ===
    #[error("Test run {run_id} failed: {reason}")]
    RunFailed { run_id: i64, reason: String },

    #[error("Lost connection to the event stream of test run {0}")]
    ConnectionLost(i64),

    #[error("Event stream error: {0}")]
    Stream(String),

    // === Abort Errors ===
    #[error("Test run {0} was aborted by the user")]
    Aborted(i64),

    #[error("Abort request for test run {run_id} was rejected: {reason}")]
    AbortRejected { run_id: i64, reason: String },

    #[error(
        "Abort of test run {run_id} is inconclusive after {secs} seconds. The run may still be stopping - use 'th-cli test-runner-status' to check"
    )]
    AbortInconclusive { run_id: i64, secs: u64 },

    #[error("Command timed out after {0} seconds. Partial results were reported above")]
    Timeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an API error for a failed backend call
    pub fn api(operation: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Reclassify a backend failure that happened while submitting a run
    pub fn into_submission(self) -> Self {
        match self {
            Self::Api {
                operation,
                status,
                message,
            } => Self::Submission {
                operation,
                status,
                message,
            },
            Self::BackendUnavailable { url, message } => Self::Submission {
                operation: "submit test run".to_string(),
                status: None,
                message: format!("backend unreachable at {url}: {message}"),
            },
            other => other,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse(_) | Self::Validation(_) | Self::Usage(_) => 2,
            Self::Config(_) | Self::ConfigParse(_) => 2,
            Self::Submission { .. } | Self::Api { .. } | Self::BackendUnavailable { .. } => 3,
            Self::AbortRejected { .. } => 3,
            Self::RunFailed { .. } | Self::ConnectionLost(_) | Self::Stream(_) => 4,
            Self::Aborted(_) => 5,
            Self::AbortInconclusive { .. } => 6,
            Self::Timeout(_) => 7,
            Self::Io(_) | Self::FileRead { .. } | Self::Json(_) | Self::Internal(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_issue() {
        let err = Error::Validation(vec![
            ValidationIssue::EmptySelection,
            ValidationIssue::UnknownTestCase {
                id: "TC-XYZ-1.1".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 problem(s)"));
        assert!(text.contains("No test cases selected"));
        assert!(text.contains("TC-XYZ-1.1"));
    }

    #[test]
    fn test_cycle_message_names_path() {
        let issue = ValidationIssue::CircularReference {
            cycle: vec!["A.x".into(), "B.y".into(), "A.x".into()],
        };
        assert_eq!(issue.to_string(), "Circular reference: A.x -> B.y -> A.x");
    }

    #[test]
    fn test_into_submission_keeps_status() {
        let err = Error::api("create test run", Some(422), "bad body").into_submission();
        match &err {
            Error::Submission { status, .. } => assert_eq!(*status, Some(422)),
            other => panic!("Expected Submission, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        assert_eq!(Error::Validation(vec![]).exit_code(), 2);
        assert_eq!(Error::ConnectionLost(1).exit_code(), 4);
        assert_eq!(Error::Aborted(1).exit_code(), 5);
        assert_eq!(
            Error::AbortInconclusive { run_id: 1, secs: 5 }.exit_code(),
            6
        );
        assert_eq!(Error::Timeout(3).exit_code(), 7);
    }

    #[test]
    fn test_parse_issue_display() {
        let issue = ParseIssue::new("a.properties", Some(3), "expected key=value");
        assert_eq!(issue.to_string(), "a.properties:3: expected key=value");
        let issue = ParseIssue::new("pics.xml", None, "unexpected end of file");
        assert_eq!(issue.to_string(), "pics.xml: unexpected end of file");
    }
}
