//! Reconnecting event stream client
//!
//! [`EventStream::open`] spawns one task per run. The task connects through a
//! [`Connector`], decodes frames and pushes events into a bounded channel.
//! When the connection drops before the run ends it emits
//! [`RunEvent::ConnectionLost`] and reconnects with exponential backoff. After
//! `max_reconnect_attempts` consecutive failures it emits a terminal
//! `RunAborted("connection lost")` and stops.
//!
//! Cancelling the stream (explicitly or by dropping it) closes the connection
//! and stops reading frames. Events already in the channel are still
//! delivered; after them [`EventStream::next`] returns `None`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frame::{decode, RunLayout};
use super::{RunEvent, CONNECTION_LOST_REASON};
use crate::common::config::StreamConfig;
use crate::common::Result;

/// An open connection delivering text frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, or `None` once the peer closed the connection
    async fn next_frame(&mut self) -> Result<Option<String>>;

    /// Close the connection; errors are ignored
    async fn close(&mut self);
}

/// Opens connections to the event feed
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect; `resume_after` asks the backend to replay events after that sequence number
    async fn connect(&self, resume_after: Option<u64>) -> Result<Box<dyn FrameSource>>;
}

/// Backoff policy for reconnection attempts
pub fn reconnect_backoff(config: &StreamConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.backoff_base())
        .with_max_interval(config.backoff_cap())
        .with_multiplier(2.0)
        .with_randomization_factor(0.5)
        .with_max_elapsed_time(None)
        .build()
}

/// Next reconnection delay; jitter never pushes it past `cap`
fn next_delay(backoff: &mut ExponentialBackoff, cap: Duration) -> Duration {
    backoff.next_backoff().unwrap_or(cap).min(cap)
}

/// Ordered, cancellable sequence of events for one run
pub struct EventStream {
    run_id: i64,
    events: mpsc::Receiver<RunEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Start streaming events of `run_id`
    pub fn open(
        run_id: i64,
        layout: RunLayout,
        connector: Arc<dyn Connector>,
        config: &StreamConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let cancel = CancellationToken::new();
        let worker = StreamWorker {
            run_id,
            layout,
            connector,
            tx,
            cancel: cancel.clone(),
            backoff: reconnect_backoff(config),
            backoff_cap: config.backoff_cap(),
            max_attempts: config.max_reconnect_attempts.max(1),
            resume: config.resume,
            last_seq: None,
        };
        let task = tokio::spawn(worker.run());
        Self {
            run_id,
            events: rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Next event; `None` once the run ended or the stream was cancelled
    /// and the buffer is drained
    pub async fn next(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Stop reading from the backend; buffered events stay available
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel and wait for the connection task to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(run_id = self.run_id, "Event stream task failed: {}", e);
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a connection stopped delivering frames
enum PumpEnd {
    /// Terminal event delivered
    Finished,
    /// Cancelled, or nobody is listening anymore
    Stopped,
    Lost(String),
}

struct StreamWorker {
    run_id: i64,
    layout: RunLayout,
    connector: Arc<dyn Connector>,
    tx: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
    backoff: ExponentialBackoff,
    backoff_cap: Duration,
    max_attempts: u32,
    resume: bool,
    last_seq: Option<u64>,
}

impl StreamWorker {
    async fn run(mut self) {
        let mut connected_before = false;
        let mut failures: u32 = 0;

        loop {
            let cursor = if self.resume { self.last_seq } else { None };
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return,
                attempt = self.connector.connect(cursor) => attempt,
            };

            match attempt {
                Ok(mut source) => {
                    if connected_before {
                        tracing::info!(run_id = self.run_id, "Reconnected to event stream");
                        if !self.emit(RunEvent::Reconnected { gap: !self.resume }).await {
                            source.close().await;
                            return;
                        }
                    } else {
                        tracing::debug!(run_id = self.run_id, "Connected to event stream");
                    }
                    connected_before = true;
                    failures = 0;
                    self.backoff.reset();

                    match self.pump(source.as_mut()).await {
                        PumpEnd::Finished | PumpEnd::Stopped => {
                            source.close().await;
                            return;
                        }
                        PumpEnd::Lost(reason) => {
                            tracing::warn!(run_id = self.run_id, "Event stream lost: {}", reason);
                            source.close().await;
                            if !self.emit(RunEvent::ConnectionLost).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        run_id = self.run_id,
                        attempt = failures,
                        max = self.max_attempts,
                        "Event stream connection failed: {}",
                        e
                    );
                    if failures >= self.max_attempts {
                        tracing::error!(
                            run_id = self.run_id,
                            "Giving up on event stream after {} attempts",
                            failures
                        );
                        self.emit(RunEvent::aborted(CONNECTION_LOST_REASON)).await;
                        return;
                    }
                }
            }

            let delay = next_delay(&mut self.backoff, self.backoff_cap);
            tracing::debug!(run_id = self.run_id, ?delay, "Waiting before reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forward frames from one connection until it ends
    async fn pump(&mut self, source: &mut dyn FrameSource) -> PumpEnd {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpEnd::Stopped,
                frame = source.next_frame() => frame,
            };

            let text = match frame {
                Ok(Some(text)) => text,
                Ok(None) => return PumpEnd::Lost("closed by backend".to_string()),
                Err(e) => return PumpEnd::Lost(e.to_string()),
            };

            let decoded = decode(&text, &self.layout);
            if let Some(seq) = decoded.seq {
                if self.last_seq.is_some_and(|last| seq <= last) {
                    tracing::debug!(run_id = self.run_id, seq, "Dropping replayed frame");
                    continue;
                }
                self.last_seq = Some(seq);
            }
            let Some(event) = decoded.event else {
                continue;
            };
            if let RunEvent::MalformedFrame { error, .. } = &event {
                tracing::warn!(run_id = self.run_id, "Malformed event frame: {}", error);
            }

            let terminal = event.is_terminal();
            if !self.emit(event).await {
                return PumpEnd::Stopped;
            }
            if terminal {
                return PumpEnd::Finished;
            }
        }
    }

    /// Hand an event to the consumer; false when the stream should stop
    async fn emit(&self, event: RunEvent) -> bool {
        tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What a scripted connection attempt does
    enum Attempt {
        Fail,
        /// Deliver these frames, then drop the connection
        Frames(Vec<String>),
        /// Deliver these frames, then stay silent
        FramesThenHang(Vec<String>),
    }

    struct ScriptedConnector {
        attempts: Mutex<VecDeque<Attempt>>,
        cursors: Mutex<Vec<Option<u64>>>,
        connects: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(attempts: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                attempts: Mutex::new(attempts.into()),
                cursors: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn closed(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    struct ScriptedSource {
        frames: VecDeque<String>,
        hang: bool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<Option<String>> {
            if let Some(frame) = self.frames.pop_front() {
                return Ok(Some(frame));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(Error::Stream("connection reset".to_string()))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, resume_after: Option<u64>) -> Result<Box<dyn FrameSource>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.cursors.lock().unwrap().push(resume_after);
            let next = self.attempts.lock().unwrap().pop_front();
            match next {
                Some(Attempt::Frames(frames)) => Ok(Box::new(ScriptedSource {
                    frames: frames.into(),
                    hang: false,
                    closes: self.closes.clone(),
                })),
                Some(Attempt::FramesThenHang(frames)) => Ok(Box::new(ScriptedSource {
                    frames: frames.into(),
                    hang: true,
                    closes: self.closes.clone(),
                })),
                Some(Attempt::Fail) | None => Err(Error::Stream("refused".to_string())),
            }
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
            max_reconnect_attempts: 3,
            resume: false,
            buffer: 16,
        }
    }

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    async fn collect(stream: &mut EventStream) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_events_in_order_and_stream_ends_on_terminal() {
        let connector = ScriptedConnector::new(vec![Attempt::FramesThenHang(vec![
            frame(serde_json::json!({"type": "started"})),
            frame(serde_json::json!({"type": "log_line", "message": "hello"})),
            frame(serde_json::json!({"type": "run_completed", "summary": "done"})),
            frame(serde_json::json!({"type": "log_line", "message": "after the end"})),
        ])]);
        let mut stream = EventStream::open(7, RunLayout::default(), connector, &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::log("hello"),
                RunEvent::RunCompleted {
                    summary: "done".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_loss() {
        let connector = ScriptedConnector::new(vec![
            Attempt::Frames(vec![frame(serde_json::json!({"type": "started"}))]),
            Attempt::Fail,
            Attempt::FramesThenHang(vec![frame(
                serde_json::json!({"type": "run_completed", "summary": "ok"}),
            )]),
        ]);
        let mut stream =
            EventStream::open(1, RunLayout::default(), connector.clone(), &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::ConnectionLost,
                RunEvent::Reconnected { gap: true },
                RunEvent::RunCompleted {
                    summary: "ok".to_string()
                },
            ]
        );
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_failures() {
        let connector = ScriptedConnector::new(vec![
            Attempt::Frames(vec![frame(serde_json::json!({"type": "started"}))]),
            Attempt::Fail,
            Attempt::Fail,
            Attempt::Fail,
        ]);
        let mut stream =
            EventStream::open(1, RunLayout::default(), connector.clone(), &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::ConnectionLost,
                RunEvent::aborted(CONNECTION_LOST_REASON),
            ]
        );
        // one initial connection plus three failed attempts
        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failure_count_resets_after_successful_connect() {
        let connector = ScriptedConnector::new(vec![
            Attempt::Fail,
            Attempt::Fail,
            Attempt::Frames(vec![]),
            Attempt::Fail,
            Attempt::Fail,
            Attempt::FramesThenHang(vec![frame(
                serde_json::json!({"type": "run_aborted", "reason": "user"}),
            )]),
        ]);
        let mut stream = EventStream::open(1, RunLayout::default(), connector, &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                RunEvent::ConnectionLost,
                RunEvent::Reconnected { gap: true },
                RunEvent::aborted("user"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_sends_cursor_and_drops_replayed_frames() {
        let connector = ScriptedConnector::new(vec![
            Attempt::Frames(vec![
                frame(serde_json::json!({"type": "started", "seq": 1})),
                frame(serde_json::json!({"type": "log_line", "seq": 2, "message": "a"})),
            ]),
            Attempt::FramesThenHang(vec![
                frame(serde_json::json!({"type": "log_line", "seq": 2, "message": "a"})),
                frame(serde_json::json!({"type": "log_line", "seq": 3, "message": "b"})),
                frame(serde_json::json!({"type": "run_completed", "seq": 4, "summary": ""})),
            ]),
        ]);
        let config = StreamConfig {
            resume: true,
            ..fast_config()
        };
        let mut stream = EventStream::open(1, RunLayout::default(), connector.clone(), &config);
        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::log("a"),
                RunEvent::ConnectionLost,
                RunEvent::Reconnected { gap: false },
                RunEvent::log("b"),
                RunEvent::RunCompleted {
                    summary: String::new()
                },
            ]
        );
        assert_eq!(*connector.cursors.lock().unwrap(), vec![None, Some(2)]);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_stream() {
        let connector = ScriptedConnector::new(vec![Attempt::FramesThenHang(vec![
            "{broken".to_string(),
            frame(serde_json::json!({"type": "run_completed", "summary": "x"})),
        ])]);
        let mut stream = EventStream::open(1, RunLayout::default(), connector, &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RunEvent::MalformedFrame { .. }));
    }

    #[tokio::test]
    async fn test_cancel_keeps_buffered_events_and_unblocks() {
        let connector = ScriptedConnector::new(vec![Attempt::FramesThenHang(vec![
            frame(serde_json::json!({"type": "started"})),
            frame(serde_json::json!({"type": "log_line", "message": "x"})),
        ])]);
        let mut stream =
            EventStream::open(1, RunLayout::default(), connector.clone(), &fast_config());

        assert_eq!(stream.next().await, Some(RunEvent::Started));
        // the second frame is already buffered once the first arrived or shortly after
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.cancel();

        let rest = tokio::time::timeout(Duration::from_secs(2), collect(&mut stream))
            .await
            .expect("consumer should be unblocked after cancel");
        assert_eq!(rest, vec![RunEvent::log("x")]);
        // the channel only closes once the worker has released the connection
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_to_reconnect() {
        let connector = ScriptedConnector::new(vec![]);
        let config = StreamConfig {
            backoff_base_ms: 60_000,
            backoff_cap_ms: 60_000,
            ..fast_config()
        };
        let stream = EventStream::open(1, RunLayout::default(), connector, &config);
        tokio::time::timeout(Duration::from_secs(2), stream.shutdown())
            .await
            .expect("shutdown should not wait for the backoff delay");
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connection() {
        let connector = ScriptedConnector::new(vec![Attempt::FramesThenHang(vec![frame(
            serde_json::json!({"type": "started"}),
        )])]);
        let mut stream =
            EventStream::open(1, RunLayout::default(), connector.clone(), &fast_config());
        assert_eq!(stream.next().await, Some(RunEvent::Started));

        tokio::time::timeout(Duration::from_secs(2), stream.shutdown())
            .await
            .expect("shutdown should not wait for the silent connection");
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_terminal_event_closes_connection() {
        let connector = ScriptedConnector::new(vec![Attempt::FramesThenHang(vec![frame(
            serde_json::json!({"type": "run_aborted", "reason": "user"}),
        )])]);
        let mut stream =
            EventStream::open(1, RunLayout::default(), connector.clone(), &fast_config());
        let events = collect(&mut stream).await;
        assert_eq!(events, vec![RunEvent::aborted("user")]);
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn test_backoff_is_bounded() {
        let config = StreamConfig::default();
        let cap = config.backoff_cap();
        let mut backoff = reconnect_backoff(&config);
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            last = next_delay(&mut backoff, cap);
            assert!(last <= cap, "{last:?} exceeds {cap:?}");
        }
        assert!(last >= Duration::from_secs(15));
    }
}
