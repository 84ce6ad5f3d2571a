//! Run monitoring
//!
//! The [`Monitor`] folds stream events into a [`RunState`], renderers turn
//! them into output and the [`AbortOrchestrator`] stops a run cleanly.

pub mod abort;
pub mod render;
pub mod state;

use std::io;

pub use abort::{AbortOrchestrator, AbortOutcome};
pub use render::{JsonRenderer, Renderer, TerminalRenderer};
pub use state::{Monitor, RunPhase, RunState};

use crate::common::logging::RUN_LOG_TARGET;
use crate::stream::{EventStream, RunEvent};

/// Apply one event and render it if the monitor accepted it
///
/// Log lines always go to the run log, whether or not they are rendered.
pub fn handle_event(
    monitor: &mut Monitor,
    renderer: &mut dyn Renderer,
    event: &RunEvent,
) -> io::Result<()> {
    if let RunEvent::LogLine { text } = event {
        tracing::debug!(target: RUN_LOG_TARGET, run_id = monitor.state().run_id, "{}", text);
    }
    if monitor.apply(event) {
        renderer.event(event, monitor.state())?;
    }
    Ok(())
}

/// Follow the stream until the run ends or the stream closes
pub async fn follow(
    stream: &mut EventStream,
    monitor: &mut Monitor,
    renderer: &mut dyn Renderer,
) -> io::Result<()> {
    while !monitor.is_terminal() {
        let Some(event) = stream.next().await else {
            break;
        };
        handle_event(monitor, renderer, &event)?;
    }
    Ok(())
}
