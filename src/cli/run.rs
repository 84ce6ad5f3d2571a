//! The run-tests flow
//!
//! Read every input, resolve the selection against the backend catalog,
//! create the run, attach to its event stream, start it and follow it until
//! it ends. Ctrl-C aborts the run through the [`AbortOrchestrator`].

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::backend::{self, Backend};
use crate::commands::RunTestsArgs;
use crate::common::{Error, ParseIssue, Result};
use crate::monitor::{handle_event, AbortOrchestrator, AbortOutcome, Monitor, Renderer};
use crate::selection::capability::read_capability_path;
use crate::selection::properties::{parse_assignment, parse_capability_flag, read_properties_file};
use crate::selection::{CapabilityDeclaration, CliOverrides, PropertyOverrides, Resolver};
use crate::session::{OutputMode, Session};
use crate::stream::EventStream;

/// Default run title, the local time
pub fn default_title() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H:%M:%S").to_string()
}

/// Everything read from files and flags, before resolution
#[derive(Debug, Default)]
pub struct RunInputs {
    pub capabilities: Vec<CapabilityDeclaration>,
    pub properties: Vec<PropertyOverrides>,
    pub cli: CliOverrides,
}

/// Read all inputs, reporting every problem at once
pub fn read_inputs(args: &RunTestsArgs) -> Result<RunInputs> {
    let mut issues = Vec::new();
    let mut inputs = RunInputs::default();

    for path in &args.pics {
        match read_capability_path(path) {
            Ok(mut declarations) => inputs.capabilities.append(&mut declarations),
            Err(mut errors) => issues.append(&mut errors),
        }
    }
    for path in &args.config {
        match read_properties_file(path) {
            Ok(overrides) => inputs.properties.push(overrides),
            Err(mut errors) => issues.append(&mut errors),
        }
    }
    for arg in &args.set {
        match parse_assignment(arg) {
            Ok(assignment) => inputs.cli.properties.push(assignment),
            Err(message) => issues.push(ParseIssue::new("--set", None, message)),
        }
    }
    for arg in &args.capability {
        match parse_capability_flag(arg) {
            Ok(flag) => inputs.cli.capabilities.push(flag),
            Err(message) => issues.push(ParseIssue::new("--capability", None, message)),
        }
    }

    inputs.cli.tests_list = args
        .tests_list
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    match selected_tests(args) {
        Ok(ids) => inputs.cli.selected_tests = ids,
        Err(issue) => issues.push(issue),
    }

    if issues.is_empty() {
        Ok(inputs)
    } else {
        Err(Error::Parse(issues))
    }
}

fn selected_tests(args: &RunTestsArgs) -> std::result::Result<Vec<String>, ParseIssue> {
    if let Some(json) = &args.selected_tests {
        return parse_selected_tests("--selected-tests", json);
    }
    let Some(path) = &args.file else {
        return Ok(Vec::new());
    };
    let name = path.display().to_string();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParseIssue::new(&name, None, format!("cannot read file: {e}")))?;
    parse_selected_tests(&name, &content)
}

/// Test case ids from `{"collection": {"suite": {"TC-ACE-1.1": 1}}}`
pub fn parse_selected_tests(
    origin: &str,
    content: &str,
) -> std::result::Result<Vec<String>, ParseIssue> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| ParseIssue::new(origin, Some(e.line()), format!("invalid JSON: {e}")))?;
    let shape = || {
        ParseIssue::new(
            origin,
            None,
            r#"expected {"collection": {"suite": {"test case": iterations}}}"#,
        )
    };

    let mut ids = Vec::new();
    for suites in value.as_object().ok_or_else(shape)?.values() {
        for cases in suites.as_object().ok_or_else(shape)?.values() {
            for (id, iterations) in cases.as_object().ok_or_else(shape)? {
                match iterations.as_u64() {
                    Some(0) => {}
                    Some(_) => ids.push(id.clone()),
                    None => {
                        return Err(ParseIssue::new(
                            origin,
                            None,
                            format!("iterations of '{id}' must be a positive integer"),
                        ))
                    }
                }
            }
        }
    }
    Ok(ids)
}

/// Limits applied while following a run
#[derive(Debug, Clone, Copy)]
pub struct WatchLimits {
    /// Overall time the command may follow the run
    pub timeout: Option<Duration>,
    /// How long an abort waits for the run to stop
    pub abort_wait: Duration,
}

/// Run the whole run-tests command
pub async fn run_tests(
    session: &Session,
    args: &RunTestsArgs,
    title: &str,
    mode: OutputMode,
) -> Result<()> {
    let inputs = read_inputs(args)?;
    let resolver = Resolver::fetch(session.backend.as_ref()).await?;
    let selection = resolver.resolve(&inputs.capabilities, &inputs.properties, &inputs.cli)?;
    tracing::info!(
        cases = ?selection.case_ids(),
        capabilities = selection.capabilities.len(),
        "Resolved test selection"
    );

    let api = session.backend.as_ref();
    let mut handle = backend::create(api, title, args.project_id, &selection).await?;
    // attach before starting so no early event is missed
    let mut stream = EventStream::open(
        handle.id,
        handle.layout.clone(),
        session.connector.clone(),
        &session.config.stream,
    );
    if let Err(e) = backend::start(api, &mut handle).await {
        stream.shutdown().await;
        return Err(e);
    }

    let limits = WatchLimits {
        timeout: args
            .timeout
            .or(session.config.timeouts.run_secs)
            .map(Duration::from_secs),
        abort_wait: session.abort_wait(),
    };
    let mut monitor = Monitor::new(handle.id);
    let mut renderer = mode.renderer();
    let result = watch_run(
        api,
        &mut stream,
        &mut monitor,
        renderer.as_mut(),
        limits,
        interrupted(),
    )
    .await;
    stream.shutdown().await;
    result
}

/// Resolves on Ctrl-C; never resolves if the signal cannot be watched
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot watch for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Follow a run until it ends, the command times out or `interrupt` fires
///
/// The renderer is always finished with the last known state. The result is
/// the run's outcome, or the timeout or abort failure that cut it short.
pub async fn watch_run<F>(
    backend: &dyn Backend,
    stream: &mut EventStream,
    monitor: &mut Monitor,
    renderer: &mut dyn Renderer,
    limits: WatchLimits,
    interrupt: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let run_id = monitor.state().run_id;
    let deadline = sleep_for(limits.timeout);
    tokio::pin!(interrupt);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) => {
                    handle_event(monitor, renderer, &event)?;
                    if monitor.is_terminal() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut interrupt => {
                tracing::info!(run_id, "Interrupted, aborting test run");
                let outcome = AbortOrchestrator::new(backend, limits.abort_wait)
                    .abort(monitor, stream, renderer)
                    .await;
                match outcome {
                    Ok(AbortOutcome::Inconclusive(_)) => {
                        renderer.finish(monitor.state())?;
                        return Err(Error::AbortInconclusive {
                            run_id,
                            secs: limits.abort_wait.as_secs(),
                        });
                    }
                    Ok(_) => break,
                    Err(e) => {
                        renderer.finish(monitor.state())?;
                        return Err(e);
                    }
                }
            }
            _ = &mut deadline => {
                let secs = limits.timeout.map(|t| t.as_secs()).unwrap_or_default();
                tracing::warn!(run_id, secs, "Timed out following test run");
                stream.cancel();
                renderer.finish(monitor.state())?;
                return Err(Error::Timeout(secs));
            }
        }
    }

    renderer.finish(monitor.state())?;
    monitor.state().result()
}
