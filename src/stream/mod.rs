//! Live event stream of a test run
//!
//! A background task owns the connection to the backend's event feed and
//! forwards decoded [`RunEvent`]s through a bounded channel. The consumer
//! pulls events one at a time with [`EventStream::next`].

pub mod client;
pub mod frame;
pub mod websocket;

use std::fmt;

use serde::Serialize;

pub use client::{Connector, EventStream, FrameSource};
pub use frame::{decode, DecodedFrame, RunLayout};
pub use websocket::WebSocketConnector;

/// Reason attached to the abort emitted when reconnection gives up
pub const CONNECTION_LOST_REASON: &str = "connection lost";

/// Result of one test step or test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Error,
    Skipped,
    NotApplicable,
    Cancelled,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "ok" => Some(Self::Passed),
            "failed" | "fail" => Some(Self::Failed),
            "error" => Some(Self::Error),
            "skipped" | "skip" => Some(Self::Skipped),
            "not_applicable" => Some(Self::NotApplicable),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::NotApplicable => "not_applicable",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }

    pub fn is_skip(self) -> bool {
        matches!(self, Self::Skipped | Self::NotApplicable | Self::Cancelled)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a test run, in the order the backend sent it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started,
    StepResult {
        case_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        outcome: Outcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    LogLine {
        text: String,
    },
    RunCompleted {
        summary: String,
    },
    RunAborted {
        reason: String,
    },
    /// The connection dropped; a reconnect is being attempted
    ConnectionLost,
    /// A new connection is up; `gap` is set when events may have been missed
    Reconnected {
        gap: bool,
    },
    /// A frame that could not be decoded
    MalformedFrame {
        raw: String,
        error: String,
    },
}

impl RunEvent {
    /// `RunCompleted` and `RunAborted` end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunAborted { .. })
    }

    pub fn log(text: impl Into<String>) -> Self {
        Self::LogLine { text: text.into() }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::RunAborted {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_categories() {
        assert!(Outcome::Error.is_failure());
        assert!(Outcome::NotApplicable.is_skip());
        assert!(!Outcome::Passed.is_failure() && !Outcome::Passed.is_skip());
        assert_eq!(Outcome::parse("Canceled"), Some(Outcome::Cancelled));
        assert_eq!(Outcome::parse("pending"), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = RunEvent::StepResult {
            case_id: "TC-ACE-1.1".to_string(),
            step_id: None,
            outcome: Outcome::Passed,
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "step_result", "case_id": "TC-ACE-1.1", "outcome": "passed"})
        );
        assert!(RunEvent::aborted("x").is_terminal());
        assert!(!RunEvent::ConnectionLost.is_terminal());
    }
}
