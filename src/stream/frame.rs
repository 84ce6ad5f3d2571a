//! Event frame decoding
//!
//! Two frame dialects are understood:
//!
//! - flat frames: `{"type": "step_result", "seq": 4, "caseId": .., "stepId": ..,
//!   "outcome": .., "message": ..}` with types `started`, `step_result`,
//!   `log_line`, `run_completed` and `run_aborted`
//! - harness envelopes: `{"type": "test_update", "payload": {..}}` and friends,
//!   whose updates address suites, cases and steps by execution index. The
//!   [`RunLayout`] of the run turns those indices back into names.
//!
//! Every frame yields at most one event. Frames that cannot be decoded turn
//! into [`RunEvent::MalformedFrame`] instead of failing the stream.

use serde_json::{Map, Value};

use super::{Outcome, RunEvent};
use crate::backend::types::{TestRunExecution, TestState};

/// Names of the suites, cases and steps of a run, by execution index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLayout {
    suites: Vec<SuiteLayout>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SuiteLayout {
    title: String,
    cases: Vec<CaseLayout>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CaseLayout {
    id: String,
    steps: Vec<String>,
}

impl RunLayout {
    pub fn from_execution(run: &TestRunExecution) -> Self {
        let suites = run
            .test_suite_executions
            .iter()
            .map(|suite| SuiteLayout {
                title: suite.test_suite_metadata.title.clone(),
                cases: suite
                    .test_case_executions
                    .iter()
                    .map(|case| {
                        let meta = &case.test_case_metadata;
                        CaseLayout {
                            id: if meta.public_id.is_empty() {
                                meta.title.clone()
                            } else {
                                meta.public_id.clone()
                            },
                            steps: case
                                .test_step_executions
                                .iter()
                                .map(|step| step.title.clone())
                                .collect(),
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { suites }
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    pub fn suite_title(&self, suite: usize) -> String {
        self.suites
            .get(suite)
            .map(|s| s.title.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("suite[{suite}]"))
    }

    pub fn case_id(&self, suite: usize, case: usize) -> String {
        self.suites
            .get(suite)
            .and_then(|s| s.cases.get(case))
            .map(|c| c.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("suite[{suite}].case[{case}]"))
    }

    pub fn step_title(&self, suite: usize, case: usize, step: usize) -> String {
        self.suites
            .get(suite)
            .and_then(|s| s.cases.get(case))
            .and_then(|c| c.steps.get(step))
            .cloned()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("step[{step}]"))
    }
}

/// A decoded frame: its sequence number, when present, and its event
///
/// `event` is `None` for frames that carry nothing for the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub seq: Option<u64>,
    pub event: Option<RunEvent>,
}

impl DecodedFrame {
    fn event(seq: Option<u64>, event: RunEvent) -> Self {
        Self {
            seq,
            event: Some(event),
        }
    }
}

const PROMPT_TYPES: &[&str] = &[
    "prompt_request",
    "options_request",
    "message_request",
    "file_upload_request",
    "stream_verification_request",
    "image_verification_request",
    "two_way_talk_verification_request",
    "push_av_stream_verification_request",
];

/// Decode one text frame
pub fn decode(raw: &str, layout: &RunLayout) -> DecodedFrame {
    let malformed = |error: String| DecodedFrame {
        seq: None,
        event: Some(RunEvent::MalformedFrame {
            raw: raw.to_string(),
            error,
        }),
    };

    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return malformed(format!("invalid JSON: {e}")),
    };
    let Value::Object(frame) = value else {
        return malformed("frame is not a JSON object".to_string());
    };
    let Some(kind) = frame.get("type").and_then(Value::as_str) else {
        return malformed("frame has no 'type'".to_string());
    };
    let seq = frame.get("seq").and_then(Value::as_u64);

    let result = match kind {
        "started" => Ok(Some(RunEvent::Started)),
        "step_result" => decode_step_result(&frame).map(Some),
        "log_line" => str_field(&frame, "message")
            .or_else(|| str_field(&frame, "text"))
            .map(|text| Some(RunEvent::log(text)))
            .ok_or_else(|| "log_line without 'message'".to_string()),
        "run_completed" => Ok(Some(RunEvent::RunCompleted {
            summary: summary_text(frame.get("summary")),
        })),
        "run_aborted" => Ok(Some(RunEvent::aborted(
            str_field(&frame, "reason").unwrap_or_else(|| "aborted".to_string()),
        ))),
        "test_update" => decode_test_update(frame.get("payload"), layout).map(Some),
        "test_log_records" => decode_log_records(frame.get("payload")).map(Some),
        "time_out_notification" => Ok(None),
        kind if PROMPT_TYPES.contains(&kind) => Ok(Some(decode_prompt(kind, frame.get("payload")))),
        other => Err(format!("unknown frame type '{other}'")),
    };

    match result {
        Ok(event) => DecodedFrame { seq, event },
        Err(error) => DecodedFrame {
            seq,
            ..malformed(error)
        },
    }
}

fn str_field(frame: &Map<String, Value>, key: &str) -> Option<String> {
    match frame.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn summary_text(summary: Option<&Value>) -> String {
    match summary {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn decode_step_result(frame: &Map<String, Value>) -> Result<RunEvent, String> {
    let case_id = str_field(frame, "caseId").ok_or("step_result without 'caseId'")?;
    let raw_outcome = str_field(frame, "outcome").ok_or("step_result without 'outcome'")?;
    let outcome =
        Outcome::parse(&raw_outcome).ok_or_else(|| format!("unknown outcome '{raw_outcome}'"))?;
    Ok(RunEvent::StepResult {
        case_id,
        step_id: str_field(frame, "stepId"),
        outcome,
        message: str_field(frame, "message"),
    })
}

fn index(body: &Map<String, Value>, key: &str) -> Option<usize> {
    body.get(key)
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
}

fn messages(body: &Map<String, Value>) -> Option<String> {
    let mut lines = Vec::new();
    for key in ["failures", "errors"] {
        if let Some(Value::Array(items)) = body.get(key) {
            lines.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }
    (!lines.is_empty()).then(|| lines.join("; "))
}

fn decode_test_update(payload: Option<&Value>, layout: &RunLayout) -> Result<RunEvent, String> {
    let body = payload
        .and_then(|p| p.get("body"))
        .and_then(Value::as_object)
        .ok_or("test_update without 'payload.body'")?;
    let state: TestState = body
        .get("state")
        .cloned()
        .ok_or("test_update without 'state'")
        .and_then(|s| serde_json::from_value(s).map_err(|_| "test_update with invalid 'state'"))?;

    let suite = index(body, "test_suite_execution_index");
    let case = index(body, "test_case_execution_index");
    let step = index(body, "test_step_execution_index");

    let event = match (suite, case, step) {
        (Some(s), Some(c), Some(st)) => {
            let mut text = format!(
                "{} step '{}': {}",
                layout.case_id(s, c),
                layout.step_title(s, c, st),
                state.as_str()
            );
            if let Some(detail) = messages(body) {
                text.push_str(&format!(" ({detail})"));
            }
            RunEvent::log(text)
        }
        (Some(s), Some(c), None) => {
            let case_id = layout.case_id(s, c);
            match terminal_outcome(state) {
                Some(outcome) => RunEvent::StepResult {
                    case_id,
                    step_id: None,
                    outcome,
                    message: messages(body),
                },
                None => RunEvent::log(format!("{case_id} {}", state.as_str())),
            }
        }
        (Some(s), None, _) => RunEvent::log(format!(
            "Suite '{}' {}",
            layout.suite_title(s),
            state.as_str()
        )),
        _ if body.contains_key("test_run_execution_id") => match state {
            TestState::Executing => RunEvent::Started,
            TestState::Cancelled => RunEvent::aborted("cancelled"),
            s if s.is_terminal() => RunEvent::RunCompleted {
                summary: s.as_str().to_string(),
            },
            s => RunEvent::log(format!("Test run {}", s.as_str())),
        },
        _ => return Err("test_update without execution indices".to_string()),
    };
    Ok(event)
}

fn terminal_outcome(state: TestState) -> Option<Outcome> {
    match state {
        TestState::Passed => Some(Outcome::Passed),
        TestState::Failed => Some(Outcome::Failed),
        TestState::Error => Some(Outcome::Error),
        TestState::NotApplicable => Some(Outcome::NotApplicable),
        TestState::Cancelled => Some(Outcome::Cancelled),
        _ => None,
    }
}

fn decode_log_records(payload: Option<&Value>) -> Result<RunEvent, String> {
    let records = payload
        .and_then(Value::as_array)
        .ok_or("test_log_records without a list payload")?;
    let lines: Vec<String> = records
        .iter()
        .filter_map(|record| {
            let message = record.get("message")?.as_str()?;
            Some(match record.get("level").and_then(Value::as_str) {
                Some(level) => format!("[{level}] {message}"),
                None => message.to_string(),
            })
        })
        .collect();
    Ok(RunEvent::log(lines.join("\n")))
}

fn decode_prompt(kind: &str, payload: Option<&Value>) -> RunEvent {
    let prompt = payload
        .and_then(|p| p.get("prompt"))
        .and_then(Value::as_str)
        .unwrap_or("(no prompt text)");
    RunEvent::log(format!(
        "Backend is waiting for input ({kind}): {prompt}. Answer it from the test harness UI"
    ))
}
