//! Run state machine
//!
//! ```text
//! Pending --Started--> Running --abort request--> Aborting
//!    |                    |                          |
//!    |                    +--RunCompleted--> Completed <--+
//!    +-- any --RunAborted--> Failed
//! ```
//!
//! `StepResult` and `LogLine` received while still pending imply the run
//! started. Once Completed or Failed, further events are ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::common::{Error, Result};
use crate::stream::{RunEvent, CONNECTION_LOST_REASON};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Running,
    Aborting,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Aborting => "aborting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress of one run as seen through its events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub run_id: i64,
    pub phase: RunPhase,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Why the run failed or was aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub abort_requested: bool,
    pub malformed_frames: u32,
    pub connection_losses: u32,
    /// Events may have been missed during a reconnect
    pub gap: bool,
}

impl RunState {
    pub fn new(run_id: i64) -> Self {
        Self {
            run_id,
            phase: RunPhase::Pending,
            passed: 0,
            failed: 0,
            skipped: 0,
            last_event_at: None,
            summary: None,
            reason: None,
            abort_requested: false,
            malformed_frames: 0,
            connection_losses: 0,
            gap: false,
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }

    /// Map a final state to the command result
    ///
    /// Non-terminal states are only seen when the command stopped watching
    /// early, which callers report separately.
    pub fn result(&self) -> Result<()> {
        match self.phase {
            RunPhase::Completed => Ok(()),
            RunPhase::Failed if self.abort_requested => Err(Error::Aborted(self.run_id)),
            RunPhase::Failed => {
                let reason = self.reason.clone().unwrap_or_else(|| "aborted".to_string());
                if reason == CONNECTION_LOST_REASON {
                    Err(Error::ConnectionLost(self.run_id))
                } else {
                    Err(Error::RunFailed {
                        run_id: self.run_id,
                        reason,
                    })
                }
            }
            phase => Err(Error::Stream(format!(
                "event stream of test run {} ended while the run was {}",
                self.run_id, phase
            ))),
        }
    }
}

/// Owns a [`RunState`] and applies events to it
///
/// Observers get read-only snapshots through [`Monitor::subscribe`].
pub struct Monitor {
    state: RunState,
    publisher: watch::Sender<RunState>,
}

impl Monitor {
    pub fn new(run_id: i64) -> Self {
        let state = RunState::new(run_id);
        let (publisher, _) = watch::channel(state.clone());
        Self { state, publisher }
    }

    /// Monitor for a run that is already executing
    pub fn attached(run_id: i64) -> Self {
        let mut monitor = Self::new(run_id);
        monitor.state.phase = RunPhase::Running;
        monitor.publish();
        monitor
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.publisher.subscribe()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.phase.is_terminal()
    }

    /// Fold one event into the state; returns false if it was ignored
    pub fn apply(&mut self, event: &RunEvent) -> bool {
        let state = &mut self.state;
        if state.phase.is_terminal() {
            tracing::debug!(
                run_id = state.run_id,
                phase = %state.phase,
                "Ignoring event after the run ended: {:?}",
                event
            );
            return false;
        }
        state.last_event_at = Some(Utc::now());

        match event {
            RunEvent::Started => {
                if state.phase == RunPhase::Pending {
                    state.phase = RunPhase::Running;
                }
            }
            RunEvent::StepResult { outcome, .. } => {
                if state.phase == RunPhase::Pending {
                    state.phase = RunPhase::Running;
                }
                if outcome.is_failure() {
                    state.failed += 1;
                } else if outcome.is_skip() {
                    state.skipped += 1;
                } else {
                    state.passed += 1;
                }
            }
            RunEvent::LogLine { .. } => {
                if state.phase == RunPhase::Pending {
                    state.phase = RunPhase::Running;
                }
            }
            RunEvent::RunCompleted { summary } => {
                state.phase = RunPhase::Completed;
                state.summary = Some(summary.clone());
            }
            RunEvent::RunAborted { reason } => {
                state.phase = RunPhase::Failed;
                state.reason = Some(reason.clone());
            }
            RunEvent::ConnectionLost => state.connection_losses += 1,
            RunEvent::Reconnected { gap } => state.gap |= *gap,
            RunEvent::MalformedFrame { .. } => state.malformed_frames += 1,
        }
        self.publish();
        true
    }

    /// Move to Aborting; false when the run already ended
    pub fn request_abort(&mut self) -> bool {
        if self.state.phase.is_terminal() {
            return false;
        }
        self.state.phase = RunPhase::Aborting;
        self.state.abort_requested = true;
        self.publish();
        true
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}
