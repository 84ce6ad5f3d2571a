//! Abort coordination
//!
//! An abort is safe to request at any time. If the run already ended nothing
//! is sent. Otherwise the backend is asked to stop, the monitor moves to
//! Aborting and the event stream is followed until the run reaches a
//! terminal state or the wait times out.

use std::time::Duration;

use super::render::Renderer;
use super::state::{Monitor, RunState};
use super::follow;
use crate::backend::types::AbortResponse;
use crate::backend::Backend;
use crate::common::{Error, Result};
use crate::stream::EventStream;

/// How an abort ended
#[derive(Debug, Clone, PartialEq)]
pub enum AbortOutcome {
    /// The run had already ended; no request was sent
    AlreadyEnded(RunState),
    /// The run reached a terminal state after the request
    Finished(RunState),
    /// No terminal state was seen in time
    Inconclusive(RunState),
}

impl AbortOutcome {
    pub fn state(&self) -> &RunState {
        match self {
            Self::AlreadyEnded(state) | Self::Finished(state) | Self::Inconclusive(state) => state,
        }
    }
}

pub struct AbortOrchestrator<'a> {
    backend: &'a dyn Backend,
    wait: Duration,
}

impl<'a> AbortOrchestrator<'a> {
    pub fn new(backend: &'a dyn Backend, wait: Duration) -> Self {
        Self { backend, wait }
    }

    pub async fn abort(
        &self,
        monitor: &mut Monitor,
        stream: &mut EventStream,
        renderer: &mut dyn Renderer,
    ) -> Result<AbortOutcome> {
        let run_id = monitor.state().run_id;
        if monitor.is_terminal() {
            tracing::info!(run_id, phase = %monitor.state().phase, "Run already ended, not aborting");
            return Ok(AbortOutcome::AlreadyEnded(monitor.state().clone()));
        }

        match self.backend.abort().await {
            Ok(AbortResponse::Accepted) => {
                tracing::info!(run_id, "Abort requested");
            }
            Ok(AbortResponse::AlreadyTerminal) | Ok(AbortResponse::NotFound) => {
                tracing::info!(run_id, "Backend has nothing left to abort, waiting for final state");
            }
            Err(e) => {
                return Err(Error::AbortRejected {
                    run_id,
                    reason: e.to_string(),
                })
            }
        }
        monitor.request_abort();

        match tokio::time::timeout(self.wait, follow(stream, monitor, renderer)).await {
            Ok(result) => {
                result?;
                if monitor.is_terminal() {
                    Ok(AbortOutcome::Finished(monitor.state().clone()))
                } else {
                    tracing::warn!(run_id, "Event stream ended before the run did");
                    Ok(AbortOutcome::Inconclusive(monitor.state().clone()))
                }
            }
            Err(_) => {
                tracing::warn!(run_id, wait = ?self.wait, "No final state after abort");
                stream.cancel();
                Ok(AbortOutcome::Inconclusive(monitor.state().clone()))
            }
        }
    }
}
