//! Progress output for a monitored run
//!
//! Renderers only project events and state into text; they never change the
//! state themselves.

use std::io::{self, Write};

use colored::{Color, Colorize};
use serde_json::{json, Value};

use super::state::{RunPhase, RunState};
use crate::stream::{Outcome, RunEvent};

/// Turns run events into output
pub trait Renderer: Send {
    /// Called after `event` was applied; `state` is the updated state
    fn event(&mut self, event: &RunEvent, state: &RunState) -> io::Result<()>;

    /// Called once when monitoring stops
    fn finish(&mut self, state: &RunState) -> io::Result<()>;
}

/// Human readable output, optionally coloured
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
    color: bool,
    show_logs: bool,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout(color: bool, show_logs: bool) -> Self {
        Self::new(io::stdout(), color, show_logs)
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W, color: bool, show_logs: bool) -> Self {
        Self {
            out,
            color,
            show_logs,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.color(color).bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }
}

fn outcome_color(outcome: Outcome) -> Color {
    match outcome {
        Outcome::Passed => Color::Green,
        Outcome::Failed | Outcome::Error => Color::Red,
        Outcome::Skipped | Outcome::NotApplicable => Color::Yellow,
        Outcome::Cancelled => Color::Magenta,
    }
}

fn phase_color(phase: RunPhase) -> Color {
    match phase {
        RunPhase::Completed => Color::Green,
        RunPhase::Failed => Color::Red,
        RunPhase::Aborting => Color::Yellow,
        RunPhase::Pending | RunPhase::Running => Color::Cyan,
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn event(&mut self, event: &RunEvent, state: &RunState) -> io::Result<()> {
        match event {
            RunEvent::Started => {
                let label = self.paint("[STARTED]", Color::Cyan);
                writeln!(self.out, "{} Test run {}", label, state.run_id)
            }
            RunEvent::StepResult {
                case_id,
                step_id,
                outcome,
                message,
            } => {
                let label = self.paint(
                    &format!("[{}]", outcome.as_str().to_uppercase()),
                    outcome_color(*outcome),
                );
                let mut line = format!("{label} {case_id}");
                if let Some(step) = step_id {
                    line.push_str(&format!(" step {step}"));
                }
                if let Some(message) = message {
                    line.push_str(&format!(" - {message}"));
                }
                writeln!(self.out, "{line}")
            }
            RunEvent::LogLine { text } if self.show_logs => {
                for line in text.lines() {
                    let line = self.dim(&format!("    {line}"));
                    writeln!(self.out, "{line}")?;
                }
                Ok(())
            }
            RunEvent::LogLine { .. } => Ok(()),
            RunEvent::RunCompleted { .. } | RunEvent::RunAborted { .. } => Ok(()),
            RunEvent::ConnectionLost => {
                let label = self.paint("[RECONNECTING]", Color::Yellow);
                writeln!(self.out, "{label} Lost connection to the event stream")
            }
            RunEvent::Reconnected { gap } => {
                let label = self.paint("[RECONNECTED]", Color::Yellow);
                if *gap {
                    writeln!(
                        self.out,
                        "{label} Event stream resumed; progress during the outage may be missing"
                    )
                } else {
                    writeln!(self.out, "{label} Event stream resumed")
                }
            }
            RunEvent::MalformedFrame { error, .. } => {
                let line = self.dim(&format!("    ignored malformed event: {error}"));
                writeln!(self.out, "{line}")
            }
        }
    }

    fn finish(&mut self, state: &RunState) -> io::Result<()> {
        let label = self.paint(
            &format!("[{}]", state.phase.to_string().to_uppercase()),
            phase_color(state.phase),
        );
        writeln!(
            self.out,
            "{} Test run {}: {} passed, {} failed, {} skipped",
            label, state.run_id, state.passed, state.failed, state.skipped
        )?;
        if let Some(summary) = state.summary.as_deref().filter(|s| !s.is_empty()) {
            writeln!(self.out, "Summary: {summary}")?;
        }
        if let Some(reason) = &state.reason {
            writeln!(self.out, "Reason: {reason}")?;
        }
        if state.gap {
            writeln!(
                self.out,
                "Note: the event stream reconnected without replay; counts may be incomplete"
            )?;
        }
        if state.malformed_frames > 0 {
            writeln!(
                self.out,
                "Note: {} malformed event(s) were ignored",
                state.malformed_frames
            )?;
        }
        self.out.flush()
    }
}

/// One JSON object per line, for scripts
pub struct JsonRenderer<W: Write + Send> {
    out: W,
}

impl JsonRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, value: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)
    }
}

impl<W: Write + Send> Renderer for JsonRenderer<W> {
    fn event(&mut self, event: &RunEvent, state: &RunState) -> io::Result<()> {
        let mut value = serde_json::to_value(event)?;
        if let Value::Object(map) = &mut value {
            map.insert("run_id".to_string(), json!(state.run_id));
            map.insert("phase".to_string(), json!(state.phase));
        }
        self.write_line(&value)
    }

    fn finish(&mut self, state: &RunState) -> io::Result<()> {
        let value = json!({ "event": "final_state", "state": state });
        self.write_line(&value)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;

    fn render_all(renderer: &mut dyn Renderer, events: &[RunEvent]) -> RunState {
        let mut monitor = Monitor::new(9);
        for event in events {
            monitor.apply(event);
            renderer.event(event, monitor.state()).unwrap();
        }
        renderer.finish(monitor.state()).unwrap();
        monitor.state().clone()
    }

    fn events() -> Vec<RunEvent> {
        vec![
            RunEvent::Started,
            RunEvent::log("commissioning"),
            RunEvent::StepResult {
                case_id: "TC-ACE-1.1".to_string(),
                step_id: Some("3".to_string()),
                outcome: Outcome::Failed,
                message: Some("timeout".to_string()),
            },
            RunEvent::RunCompleted {
                summary: "failed".to_string(),
            },
        ]
    }

    #[test]
    fn test_terminal_output_without_color() {
        let mut renderer = TerminalRenderer::new(Vec::new(), false, false);
        render_all(&mut renderer, &events());
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.contains("[STARTED] Test run 9"));
        assert!(text.contains("[FAILED] TC-ACE-1.1 step 3 - timeout"));
        assert!(text.contains("[COMPLETED] Test run 9: 0 passed, 1 failed, 0 skipped"));
        assert!(!text.contains("commissioning"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_terminal_shows_logs_when_asked() {
        let mut renderer = TerminalRenderer::new(Vec::new(), false, true);
        render_all(&mut renderer, &events());
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(text.contains("    commissioning"));
    }

    #[test]
    fn test_json_lines() {
        let mut renderer = JsonRenderer::new(Vec::new());
        render_all(&mut renderer, &events());
        let text = String::from_utf8(renderer.into_inner()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["event"], "started");
        assert_eq!(lines[0]["run_id"], 9);
        assert_eq!(lines[2]["outcome"], "failed");
        assert_eq!(lines[4]["event"], "final_state");
        assert_eq!(lines[4]["state"]["phase"], "completed");
        assert_eq!(lines[4]["state"]["failed"], 1);
    }
}
