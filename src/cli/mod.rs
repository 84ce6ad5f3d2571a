//! CLI command handling
//!
//! Dispatches CLI commands to the backend and formats output.

pub mod run;

use std::fmt::Write as _;
use std::time::Duration;

use crate::backend::types::{RunnerStatus, TestCollections, TestRunExecution};
use crate::commands::Commands;
use crate::common::{Error, Result};
use crate::monitor::{AbortOrchestrator, AbortOutcome, Monitor};
use crate::session::{OutputMode, Session};
use crate::stream::{EventStream, RunLayout};

/// Dispatch a CLI command
pub async fn dispatch(session: &Session, command: Commands, color: bool) -> Result<()> {
    match command {
        Commands::RunTests(args) => {
            let title = args.title.clone().unwrap_or_else(run::default_title);
            let mode = OutputMode {
                json: args.json,
                color,
                show_logs: args.verbose,
            };
            run::run_tests(session, &args, &title, mode).await
        }

        Commands::AbortTesting { timeout, json } => {
            let mode = OutputMode {
                json,
                color,
                show_logs: false,
            };
            let wait = timeout.map(Duration::from_secs);
            abort_testing(session, mode, wait).await
        }

        Commands::TestRunExecution {
            id,
            skip,
            limit,
            log,
            json,
        } => {
            let backend = session.backend.as_ref();
            match (id, log) {
                (Some(id), true) => {
                    let log = backend.run_log(id).await?;
                    print!("{log}");
                }
                (Some(id), false) => {
                    let run = backend.get_run(id).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&run)?);
                    } else {
                        print!("{}", format_runs(std::slice::from_ref(&run)));
                    }
                }
                (None, true) => {
                    return Err(Error::Usage("--log requires --id".to_string()));
                }
                (None, false) => {
                    let runs = backend.list_runs(skip, limit).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&runs)?);
                    } else {
                        print!("{}", format_runs(&runs));
                    }
                }
            }
            Ok(())
        }

        Commands::AvailableTests { json } => {
            let collections = session.backend.catalog().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&collections)?);
            } else {
                print!("{}", format_catalog(&collections)?);
            }
            Ok(())
        }

        Commands::TestRunnerStatus { json } => {
            let status = session.backend.runner_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", format_status(&status));
            }
            Ok(())
        }
    }
}

/// Abort the run the backend is executing and wait for it to stop
///
/// Returns without sending anything when no run is active.
pub async fn abort_testing(
    session: &Session,
    mode: OutputMode,
    wait: Option<Duration>,
) -> Result<()> {
    let backend = session.backend.as_ref();
    let status = backend.runner_status().await?;
    let Some(run_id) = status.active_run() else {
        println!("No test run is executing");
        return Ok(());
    };

    let layout = match backend.get_run(run_id).await {
        Ok(run) => RunLayout::from_execution(&run),
        Err(e) => {
            tracing::warn!(run_id, "Cannot fetch run details: {}", e);
            RunLayout::default()
        }
    };
    let mut stream = EventStream::open(
        run_id,
        layout,
        session.connector.clone(),
        &session.config.stream,
    );
    let mut monitor = Monitor::attached(run_id);
    let mut renderer = mode.renderer();
    let wait = wait.unwrap_or_else(|| session.abort_wait());

    let outcome = AbortOrchestrator::new(backend, wait)
        .abort(&mut monitor, &mut stream, renderer.as_mut())
        .await;
    stream.shutdown().await;
    let outcome = outcome?;
    renderer.finish(outcome.state())?;

    match outcome {
        AbortOutcome::Inconclusive(_) => Err(Error::AbortInconclusive {
            run_id,
            secs: wait.as_secs(),
        }),
        AbortOutcome::AlreadyEnded(_) | AbortOutcome::Finished(_) => Ok(()),
    }
}

fn format_runs(runs: &[TestRunExecution]) -> String {
    if runs.is_empty() {
        return "No test runs\n".to_string();
    }
    let mut out = format!("{:<6} {:<32} {:<16} {}\n", "ID", "TITLE", "STATE", "CREATED");
    for run in runs {
        let state = run.state.map(|s| s.as_str()).unwrap_or("-");
        let created = run
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<6} {:<32} {:<16} {}", run.id, run.title, state, created);
        if let Some(error) = &run.error {
            let _ = writeln!(out, "       error: {error}");
        }
    }
    out
}

fn format_catalog(collections: &TestCollections) -> Result<String> {
    serde_yaml::to_string(collections).map_err(|e| Error::Internal(e.to_string()))
}

fn format_status(status: &RunnerStatus) -> String {
    let state = serde_json::to_value(status.state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    match status.active_run() {
        Some(run_id) => format!("State: {state}\nActive test run: {run_id}\n"),
        None => format!("State: {state}\n"),
    }
}
