//! In-process stand-ins for the backend, used by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::types::{
    AbortResponse, RunnerState, RunnerStatus, TestCaseEntry, TestCollection, TestCollections,
    TestMetadata, TestRunExecution, TestState, TestSuite,
};
use crate::backend::Backend;
use crate::common::{Error, Result};
use crate::selection::TestSelection;
use crate::stream::{Connector, FrameSource};

/// Backend with canned answers that records what it was asked
pub struct FakeBackend {
    pub collections: TestCollections,
    pub abort_response: Mutex<Option<Result<AbortResponse>>>,
    pub status: Mutex<RunnerStatus>,
    pub fail_create: bool,
    pub abort_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub submitted: Mutex<Vec<TestSelection>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            collections: sample_collections(),
            abort_response: Mutex::new(None),
            status: Mutex::new(RunnerStatus {
                state: RunnerState::Idle,
                test_run_execution_id: None,
            }),
            fail_create: false,
            abort_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn aborts(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn running(run_id: i64) -> Self {
        let fake = Self::default();
        if let Ok(mut status) = fake.status.lock() {
            *status = RunnerStatus {
                state: RunnerState::Running,
                test_run_execution_id: Some(run_id),
            };
        }
        fake
    }
}

pub fn sample_collections() -> TestCollections {
    let mut suite = TestSuite::default();
    for (id, params, pics) in [
        ("TC-ACE-1.1", vec!["endpoint"], vec!["ACE.S"]),
        ("TC-OO-2.1", vec!["endpoint"], vec!["OO.S"]),
    ] {
        suite.test_cases.insert(
            id.to_string(),
            TestCaseEntry {
                metadata: TestMetadata {
                    public_id: id.to_string(),
                    title: format!("{id} title"),
                    ..TestMetadata::default()
                },
                parameters: params.into_iter().map(String::from).collect(),
                pics: pics.into_iter().map(String::from).collect(),
            },
        );
    }
    let mut collection = TestCollection::default();
    collection
        .test_suites
        .insert("FirstChipToolSuite".to_string(), suite);
    let mut collections = TestCollections::default();
    collections
        .test_collections
        .insert("SDK YAML Tests".to_string(), collection);
    collections
}

fn execution(id: i64, title: &str, state: TestState) -> TestRunExecution {
    TestRunExecution {
        id,
        title: title.to_string(),
        state: Some(state),
        project_id: Some(1),
        created_at: None,
        started_at: None,
        completed_at: None,
        error: None,
        test_suite_executions: Vec::new(),
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn url(&self) -> &str {
        "http://fake"
    }

    async fn catalog(&self) -> Result<TestCollections> {
        Ok(self.collections.clone())
    }

    async fn create_run(
        &self,
        title: &str,
        _project_id: i64,
        selection: &TestSelection,
    ) -> Result<TestRunExecution> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(Error::api("create test run", Some(422), "invalid selection"));
        }
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(selection.clone());
        }
        Ok(execution(42, title, TestState::Pending))
    }

    async fn start_run(&self, run_id: i64) -> Result<TestRunExecution> {
        Ok(execution(run_id, "", TestState::Executing))
    }

    async fn abort(&self) -> Result<AbortResponse> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        let canned = self.abort_response.lock().ok().and_then(|mut r| r.take());
        canned.unwrap_or(Ok(AbortResponse::Accepted))
    }

    async fn runner_status(&self) -> Result<RunnerStatus> {
        self.status
            .lock()
            .map(|s| s.clone())
            .map_err(|_| Error::Internal("status lock poisoned".to_string()))
    }

    async fn list_runs(
        &self,
        _skip: Option<u32>,
        _limit: Option<u32>,
    ) -> Result<Vec<TestRunExecution>> {
        Ok(vec![execution(1, "first", TestState::Passed)])
    }

    async fn get_run(&self, run_id: i64) -> Result<TestRunExecution> {
        Ok(execution(run_id, "fetched", TestState::Executing))
    }

    async fn run_log(&self, _run_id: i64) -> Result<String> {
        Ok("log line\n".to_string())
    }
}

/// Connector whose single connection delivers frames pushed by the test
///
/// The connection stays open until the sender is dropped.
pub struct ChannelConnector {
    frames: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ChannelConnector {
    pub fn channel() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                frames: Mutex::new(Some(rx)),
            },
            tx,
        )
    }

    /// Connector that delivers `frames` and then stays silent
    pub fn scripted(frames: Vec<String>) -> (Self, mpsc::UnboundedSender<String>) {
        let (connector, tx) = Self::channel();
        for frame in frames {
            let _ = tx.send(frame);
        }
        (connector, tx)
    }
}

struct ChannelSource {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        Ok(self.frames.recv().await)
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, _resume_after: Option<u64>) -> Result<Box<dyn FrameSource>> {
        let rx = self.frames.lock().ok().and_then(|mut f| f.take());
        match rx {
            Some(frames) => Ok(Box::new(ChannelSource { frames })),
            None => Err(Error::Stream("already connected once".to_string())),
        }
    }
}
