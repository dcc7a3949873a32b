//! Per-source stream session
//!
//! A session owns the upstream connection for one source. The capture loop
//! runs as a tokio task while there is demand:
//!
//! ```text
//!   subscribe() ──► start() ──► capture task
//!                                 │ open upstream (bounded retries)
//!                                 │ loop:
//!                                 │   next_frame ─► encode ─► FrameBuffer::publish ─► waiters
//!                                 │   demand == 0 ? idle countdown : reset countdown
//!                                 ▼
//!                               close upstream, back to Idle / Failed
//! ```
//!
//! Releasing a subscription never stops the loop directly; the loop notices
//! zero demand over `idle_cycles` reads and retires itself. A new loop can be
//! spawned while a retiring one is still closing its handle, so every loop
//! first takes `upstream_slot`, which keeps one upstream handle per session.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ReadError;
use crate::media::JpegEncoder;
use crate::registry::{SessionConfig, SourceConfig, SourceId};
use crate::stats::{SessionCounters, SessionStats};
use crate::upstream::{UpstreamConnector, UpstreamHandle};

use super::buffer::FrameBuffer;
use super::state::SessionState;
use super::subscription::{ClientSubscription, SubscriptionKind};

/// Loop bookkeeping guarded by the session lock
struct LoopControl {
    state: SessionState,
    /// Cleared when the current loop has committed to exiting
    running: bool,
    /// Incremented per spawned loop; stale loops leave state alone
    generation: u64,
    task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// Why the capture loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureExit {
    Idle,
    Shutdown,
    Failed,
}

/// Why frame pumping on one upstream handle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    Idle,
    Shutdown,
    Dropped,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: SourceId,
    pub state: SessionState,
    pub demand: usize,
    pub connected: bool,
    pub version: u64,
    /// Frames published per second since the session was created
    pub average_fps: f64,
    pub stats: SessionStats,
}

/// Relay session for one upstream source
pub struct StreamSession {
    source: SourceConfig,
    config: Arc<SessionConfig>,
    connector: Arc<dyn UpstreamConnector>,
    encoder: JpegEncoder,
    buffer: FrameBuffer,
    demand: AtomicUsize,
    connected: AtomicBool,
    counters: SessionCounters,
    control: Mutex<LoopControl>,
    /// Held by a capture loop for its whole run
    upstream_slot: Mutex<()>,
}

impl StreamSession {
    /// Create an idle session
    pub fn new(
        source: SourceConfig,
        connector: Arc<dyn UpstreamConnector>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            encoder: JpegEncoder::new(config.jpeg_quality),
            source,
            config,
            connector,
            buffer: FrameBuffer::new(),
            demand: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            counters: SessionCounters::new(),
            control: Mutex::new(LoopControl {
                state: SessionState::Idle,
                running: false,
                generation: 0,
                task: None,
                shutdown: CancellationToken::new(),
            }),
            upstream_slot: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.source.id
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Number of live subscriptions
    pub fn demand(&self) -> usize {
        self.demand.load(Ordering::SeqCst)
    }

    /// Whether the upstream is open and delivering frames
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SessionState {
        self.control.lock().await.state
    }

    /// Whether a capture loop is running and not retiring
    pub async fn is_running(&self) -> bool {
        self.control.lock().await.running
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub async fn status(&self) -> SessionStatus {
        let stats = self.stats();
        SessionStatus {
            id: self.source.id.clone(),
            state: self.state().await,
            demand: self.demand(),
            connected: self.is_connected(),
            version: self.buffer.version(),
            average_fps: stats.average_fps(),
            stats,
        }
    }

    /// Register a consumer and make sure the capture loop is running
    ///
    /// Returns without waiting for a frame.
    pub async fn subscribe(self: &Arc<Self>, kind: SubscriptionKind) -> ClientSubscription {
        let clients = self.demand.fetch_add(1, Ordering::SeqCst) + 1;
        SessionCounters::incr(&self.counters.subscriptions);

        if clients == 1 {
            tracing::info!(source = %self.source.id, kind = ?kind, "First client subscribed");
        } else {
            tracing::debug!(
                source = %self.source.id,
                kind = ?kind,
                clients = clients,
                "Client subscribed"
            );
        }

        let subscription = ClientSubscription::new(Arc::clone(self), kind);
        self.start().await;
        subscription
    }

    /// Drop one unit of demand; returns the remaining count
    ///
    /// Never stops the session itself. At zero the capture loop starts its
    /// idle countdown.
    pub(crate) fn release_demand(&self) -> usize {
        match self
            .demand
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => {
                let remaining = previous - 1;
                if remaining == 0 {
                    tracing::info!(
                        source = %self.source.id,
                        idle_cycles = self.config.idle_cycles,
                        "Last client released, idle countdown armed"
                    );
                }
                remaining
            }
            Err(_) => {
                tracing::warn!(source = %self.source.id, "Release without matching subscribe");
                0
            }
        }
    }

    /// Start the capture loop unless one is already running
    ///
    /// Returns true if a new loop was spawned.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut control = self.control.lock().await;
        if control.running {
            return false;
        }

        // A retiring loop has already left `pump()` and a stopped loop's
        // token is cancelled, so neither can publish over this reset
        self.buffer.reset();

        control.running = true;
        control.generation += 1;
        control.shutdown = CancellationToken::new();

        let generation = control.generation;
        let shutdown = control.shutdown.clone();
        let session = Arc::clone(self);

        tracing::info!(
            source = %self.source.id,
            generation = generation,
            "Starting stream"
        );

        // A retiring loop's handle is dropped here without aborting it; it
        // still holds `upstream_slot` and finishes on its own
        control.task = Some(tokio::spawn(async move {
            session.capture(generation, shutdown).await;
        }));

        true
    }

    /// Stop the capture loop and wait for it to exit
    ///
    /// Must not be called from inside the capture loop.
    pub async fn stop(&self) {
        let task = {
            let mut control = self.control.lock().await;
            control.running = false;
            control.shutdown.cancel();
            control.task.take()
        };

        tracing::info!(source = %self.source.id, "Stopping stream");

        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(source = %self.source.id, error = %e, "Capture task failed");
            }
        }
    }

    async fn capture(self: Arc<Self>, generation: u64, shutdown: CancellationToken) {
        let _slot = self.upstream_slot.lock().await;

        let outcome = AssertUnwindSafe(self.run_capture(&shutdown))
            .catch_unwind()
            .await;

        let final_state = match outcome {
            Ok(CaptureExit::Idle) | Ok(CaptureExit::Shutdown) => SessionState::Idle,
            Ok(CaptureExit::Failed) => SessionState::Failed,
            Err(_) => {
                tracing::error!(source = %self.source.id, "Capture loop panicked");
                SessionState::Failed
            }
        };

        self.connected.store(false, Ordering::SeqCst);

        let mut control = self.control.lock().await;
        if control.generation == generation {
            control.running = false;
            self.transition(&mut control, final_state);
        }
    }

    async fn run_capture(&self, shutdown: &CancellationToken) -> CaptureExit {
        let mut reconnects = 0u32;

        loop {
            if shutdown.is_cancelled() {
                return CaptureExit::Shutdown;
            }

            self.set_state(SessionState::Connecting).await;
            self.buffer.reset();

            let Some(mut handle) = self.connect(shutdown).await else {
                return if shutdown.is_cancelled() {
                    CaptureExit::Shutdown
                } else {
                    CaptureExit::Failed
                };
            };

            self.connected.store(true, Ordering::SeqCst);
            SessionCounters::incr(&self.counters.connects);
            self.set_state(SessionState::Streaming).await;
            tracing::info!(source = %self.source.id, "Camera connected");

            let (exit, published) = self.pump(handle.as_mut(), shutdown).await;

            self.set_state(SessionState::Disconnecting).await;
            self.connected.store(false, Ordering::SeqCst);
            handle.close().await;
            SessionCounters::incr(&self.counters.disconnects);

            tracing::info!(
                source = %self.source.id,
                clients = self.demand(),
                "Disconnected from camera"
            );

            match exit {
                PumpExit::Idle => return CaptureExit::Idle,
                PumpExit::Shutdown => return CaptureExit::Shutdown,
                PumpExit::Dropped => {
                    reconnects = if published { 0 } else { reconnects + 1 };
                    if reconnects > self.config.max_reconnects {
                        tracing::error!(
                            source = %self.source.id,
                            reconnects = reconnects,
                            "Upstream keeps dropping, giving up"
                        );
                        return CaptureExit::Failed;
                    }
                    if self.try_retire().await {
                        return CaptureExit::Idle;
                    }
                    tracing::warn!(source = %self.source.id, "Reconnecting to camera");
                }
            }
        }
    }

    /// Open the upstream, retrying with a fixed delay
    async fn connect(&self, shutdown: &CancellationToken) -> Option<Box<dyn UpstreamHandle>> {
        let attempts = self.config.connect_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            SessionCounters::incr(&self.counters.connect_attempts);

            tracing::debug!(
                source = %self.source.id,
                url = %self.source.url,
                attempt = attempt,
                "Attempting to connect to camera"
            );

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                result = self.connector.open(&self.source.url) => result,
            };

            match result {
                Ok(handle) => return Some(handle),
                Err(e) if !e.is_retryable() || attempt >= attempts => {
                    tracing::error!(
                        source = %self.source.id,
                        attempts = attempt,
                        error = %e,
                        "Camera not connected"
                    );
                    return None;
                }
                Err(e) => {
                    tracing::debug!(
                        source = %self.source.id,
                        attempt = attempt,
                        error = %e,
                        "Connect attempt failed"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.config.connect_retry_delay) => {}
            }
        }
    }

    /// Read frames into the buffer until idle, shutdown, or the upstream drops
    ///
    /// The flag reports whether any frame was published.
    async fn pump(
        &self,
        handle: &mut dyn UpstreamHandle,
        shutdown: &CancellationToken,
    ) -> (PumpExit, bool) {
        let mut idle_countdown = self.config.idle_cycles;
        let mut read_errors = 0u32;
        let mut last_sequence = None;
        let mut published = false;

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return (PumpExit::Shutdown, published),
                read = tokio::time::timeout(self.config.read_timeout, handle.next_frame()) => read,
            };

            let failure = match read {
                Ok(Ok(frame)) if frame.is_repeat_of(last_sequence) => {
                    SessionCounters::incr(&self.counters.duplicates_skipped);
                    None
                }
                Ok(Ok(frame)) if frame.image.len() > self.config.max_frame_size => {
                    SessionCounters::incr(&self.counters.read_errors);
                    Some(ReadError::FrameTooLarge {
                        size: frame.image.len(),
                        limit: self.config.max_frame_size,
                    })
                }
                Ok(Ok(frame)) => {
                    last_sequence = frame.sequence;
                    match self.encoder.encode(&frame.image) {
                        Ok(jpeg) => {
                            let Some(version) =
                                self.buffer.publish(jpeg, shutdown)
                            else {
                                return (PumpExit::Shutdown, published);
                            };
                            self.connected.store(true, Ordering::SeqCst);
                            SessionCounters::incr(&self.counters.frames_published);
                            tracing::trace!(source = %self.source.id, version = version, "Frame published");
                            read_errors = 0;
                            published = true;
                            None
                        }
                        Err(e) => {
                            SessionCounters::incr(&self.counters.encode_errors);
                            Some(e)
                        }
                    }
                }
                Ok(Err(e)) => {
                    SessionCounters::incr(&self.counters.read_errors);
                    Some(e)
                }
                Err(_) => {
                    SessionCounters::incr(&self.counters.read_errors);
                    Some(ReadError::Timeout)
                }
            };

            if let Some(e) = failure {
                self.connected.store(false, Ordering::SeqCst);
                read_errors += 1;

                if e.is_disconnect() || read_errors > self.config.max_read_errors {
                    tracing::warn!(
                        source = %self.source.id,
                        error = %e,
                        consecutive = read_errors,
                        "Upstream read failed, dropping connection"
                    );
                    return (PumpExit::Dropped, published);
                }

                tracing::warn!(
                    source = %self.source.id,
                    error = %e,
                    consecutive = read_errors,
                    "Failed to read frame from camera"
                );
            }

            if self.demand() == 0 {
                idle_countdown = idle_countdown.saturating_sub(1);
                if idle_countdown == 0 {
                    if self.try_retire().await {
                        tracing::info!(
                            source = %self.source.id,
                            "No clients connected, stopping stream"
                        );
                        return (PumpExit::Idle, published);
                    }
                    idle_countdown = self.config.idle_cycles;
                }
            } else {
                idle_countdown = self.config.idle_cycles;
            }
        }
    }

    /// Commit the running loop to exit if demand is still zero
    ///
    /// Checked under the session lock so a concurrent `subscribe()` either
    /// keeps this loop alive or starts a fresh one, never neither.
    async fn try_retire(&self) -> bool {
        let mut control = self.control.lock().await;
        if self.demand() > 0 || !control.running {
            return false;
        }
        control.running = false;
        self.transition(&mut control, SessionState::Disconnecting);
        true
    }

    async fn set_state(&self, next: SessionState) {
        let mut control = self.control.lock().await;
        self.transition(&mut control, next);
    }

    fn transition(&self, control: &mut LoopControl, next: SessionState) {
        let previous = control.state;
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            tracing::warn!(
                source = %self.source.id,
                from = %previous,
                to = %next,
                "Unexpected session transition"
            );
        }
        tracing::debug!(source = %self.source.id, from = %previous, to = %next, "Session state changed");
        control.state = next;
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("source", &self.source)
            .field("demand", &self.demand())
            .field("connected", &self.is_connected())
            .field("version", &self.buffer.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::error::SubscriptionError;
    use crate::upstream::testing::{fake_jpeg, FakeConnector};

    const FRAME_INTERVAL: Duration = Duration::from_millis(40);

    fn session_with(connector: &FakeConnector, config: SessionConfig) -> Arc<StreamSession> {
        Arc::new(StreamSession::new(
            SourceConfig::new("hallcam", "http://camera.local/stream"),
            Arc::new(connector.clone()),
            Arc::new(config),
        ))
    }

    fn fast_config() -> SessionConfig {
        SessionConfig::default()
            .connect_retry(5, Duration::from_millis(100))
            .idle_cycles(5)
    }

    /// Let spawned tasks run until nothing is ready, advancing paused time
    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_is_idle() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(session.demand(), 0);
        assert!(!session.is_connected());
        assert_eq!(session.buffer().version(), 0);
        assert_eq!(connector.upstream.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_starts_streaming() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        assert_eq!(session.demand(), 1);

        let cancel = CancellationToken::new();
        let frame = assert_ok!(sub.next_frame(&cancel).await);

        assert_eq!(frame, fake_jpeg(1));
        assert_eq!(session.state().await, SessionState::Streaming);
        assert!(session.is_connected());
        assert_eq!(connector.upstream.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        assert!(session.start().await);
        assert!(!session.start().await);
        assert!(!session.start().await);

        settle(Duration::from_millis(200)).await;
        assert_eq!(connector.upstream.opens(), 1);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_countdown_disconnects_once() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let cancel = CancellationToken::new();
        assert_ok!(sub.next_frame(&cancel).await);
        sub.release();
        assert_eq!(session.demand(), 0);

        // Five idle read cycles at 40ms each, plus slack
        settle(FRAME_INTERVAL * 20).await;

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(!session.is_connected());
        assert!(!session.is_running().await);
        assert_eq!(connector.upstream.opens(), 1);
        assert_eq!(connector.upstream.closes(), 1);
        assert_eq!(connector.upstream.open_handles(), 0);

        // Nothing else happens while idle
        settle(Duration::from_secs(5)).await;
        assert_eq!(connector.upstream.closes(), 1);
        assert_eq!(session.stats().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_within_grace_period_keeps_connection() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config().idle_cycles(50));

        let cancel = CancellationToken::new();
        let mut first = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(first.next_frame(&cancel).await);
        first.release();

        settle(FRAME_INTERVAL * 3).await;

        let mut second = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(second.next_frame(&cancel).await);

        assert_eq!(connector.upstream.opens(), 1);
        assert_eq!(connector.upstream.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_idle_starts_from_scratch() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());
        let cancel = CancellationToken::new();

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(sub.next_frame(&cancel).await);
        sub.release();
        settle(FRAME_INTERVAL * 20).await;
        assert_eq!(session.state().await, SessionState::Idle);

        let version_before = session.buffer().version();

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        // The stale frame was dropped on restart
        assert!(!session.buffer().has_frame());

        let frame = assert_ok!(sub.next_frame(&cancel).await);
        // New connection numbers frames from 1 again, versions keep growing
        assert_eq!(frame, fake_jpeg(1));
        assert!(session.buffer().version() > version_before);
        assert_eq!(connector.upstream.opens(), 2);
        assert_eq!(connector.upstream.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_while_retiring_hands_over_upstream() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        connector.upstream.set_close_delay(Duration::from_millis(500));
        let session = session_with(&connector, fast_config().idle_cycles(3));
        let cancel = CancellationToken::new();

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(sub.next_frame(&cancel).await);
        sub.release();

        // Wait for the loop to commit to exiting while its close is still pending
        for _ in 0..20 {
            if !session.is_running().await {
                break;
            }
            settle(FRAME_INTERVAL).await;
        }
        assert!(!session.is_running().await);
        assert_eq!(session.state().await, SessionState::Disconnecting);
        assert_eq!(connector.upstream.closes(), 0);

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let frame = assert_ok!(sub.next_frame(&cancel).await);

        assert_eq!(frame, fake_jpeg(1));
        assert_eq!(connector.upstream.opens(), 2);
        assert_eq!(connector.upstream.closes(), 1);
        assert_eq!(connector.upstream.max_open_handles(), 1);
        assert_eq!(session.state().await, SessionState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_upstream_fails_after_retries() {
        let connector = FakeConnector::unreachable();
        let session = session_with(&connector, fast_config());

        assert!(session.start().await);
        settle(Duration::from_secs(2)).await;

        assert_eq!(session.state().await, SessionState::Failed);
        assert!(!session.is_running().await);
        assert_eq!(
            connector.upstream.open_attempts.load(Ordering::SeqCst),
            5
        );
        assert_eq!(session.stats().connect_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_session_retries_on_subscribe() {
        let connector = FakeConnector::unreachable();
        let session = session_with(&connector, fast_config());

        session.start().await;
        settle(Duration::from_secs(2)).await;
        assert_eq!(session.state().await, SessionState::Failed);

        connector.upstream.set_reachable(true);

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let cancel = CancellationToken::new();
        assert_ok!(sub.next_frame(&cancel).await);
        assert_eq!(session.state().await, SessionState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_frames_skipped() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        connector.upstream.repeat_frames.store(true, Ordering::SeqCst);
        let session = session_with(&connector, fast_config());

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let cancel = CancellationToken::new();

        assert_eq!(assert_ok!(sub.next_frame(&cancel).await), fake_jpeg(1));
        assert_eq!(assert_ok!(sub.next_frame(&cancel).await), fake_jpeg(2));
        assert_eq!(assert_ok!(sub.next_frame(&cancel).await), fake_jpeg(3));

        let stats = session.stats();
        assert!(stats.duplicates_skipped >= 2);
        assert_eq!(stats.frames_published, session.buffer().version());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_upstream_reconnects() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());
        let cancel = CancellationToken::new();

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(sub.next_frame(&cancel).await);

        connector.upstream.fail_reads.store(true, Ordering::SeqCst);
        settle(FRAME_INTERVAL * 2).await;
        connector.upstream.fail_reads.store(false, Ordering::SeqCst);

        assert_ok!(sub.next_frame(&cancel).await);
        assert!(connector.upstream.opens() >= 2);
        assert_eq!(
            connector.upstream.max_open_handles.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_read_failure_gives_up() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        connector.upstream.fail_reads.store(true, Ordering::SeqCst);
        let session = session_with(&connector, fast_config().read_error_limits(3, 2));

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let cancel = CancellationToken::new();

        let result = sub.next_frame(&cancel).await;
        assert_eq!(result, Err(SubscriptionError::UpstreamUnavailable));

        settle(Duration::from_secs(1)).await;
        assert_eq!(session.state().await, SessionState::Failed);
        // First connect plus two reconnects, then the third drop gives up
        assert_eq!(connector.upstream.opens(), 3);
        assert_eq!(connector.upstream.closes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_upstream() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        let cancel = CancellationToken::new();
        assert_ok!(sub.next_frame(&cancel).await);

        session.stop().await;

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(!session.is_connected());
        assert_eq!(connector.upstream.closes(), 1);
        assert_eq!(connector.upstream.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_subscribe_release_balance() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        let mut tasks = Vec::new();
        for i in 0..32 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                let sub = session.subscribe(SubscriptionKind::Stream).await;
                tokio::time::sleep(Duration::from_millis(i * 3)).await;
                sub.release();
            }));
        }

        let held = session.subscribe(SubscriptionKind::Snapshot).await;
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(session.demand(), 1);
        drop(held);
        assert_eq!(session.demand(), 0);
        assert_eq!(session.stats().subscriptions, 33);
        assert_eq!(connector.upstream.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_without_subscribe_saturates() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        assert_eq!(session.release_demand(), 0);
        assert_eq!(session.demand(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_session() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let session = session_with(&connector, fast_config());

        let mut sub = session.subscribe(SubscriptionKind::Stream).await;
        assert_ok!(sub.next_frame(&CancellationToken::new()).await);

        let status = session.status().await;
        assert_eq!(status.id.as_str(), "hallcam");
        assert_eq!(status.state, SessionState::Streaming);
        assert_eq!(status.demand, 1);
        assert!(status.connected);
        assert!(status.version >= 1);
        assert!(status.average_fps > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_frames_rejected() {
        let connector = FakeConnector::reachable(FRAME_INTERVAL);
        let config = fast_config().max_frame_size(8).read_error_limits(2, 0);
        let session = session_with(&connector, config);

        let _sub = session.subscribe(SubscriptionKind::Stream).await;
        settle(FRAME_INTERVAL * 10).await;

        let stats = session.stats();
        assert_eq!(stats.frames_published, 0);
        assert_eq!(stats.read_errors, 3);
        assert_eq!(session.state().await, SessionState::Failed);
        assert!(!session.buffer().has_frame());
    }

    struct PanickingConnector;

    #[async_trait::async_trait]
    impl UpstreamConnector for PanickingConnector {
        async fn open(
            &self,
            _url: &str,
        ) -> Result<Box<dyn UpstreamHandle>, crate::error::ConnectError> {
            panic!("decoder crashed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_loop_finalizes_failed() {
        let session = Arc::new(StreamSession::new(
            SourceConfig::new("hallcam", "http://camera.local/stream"),
            Arc::new(PanickingConnector),
            Arc::new(fast_config()),
        ));

        assert!(session.start().await);
        settle(Duration::from_millis(50)).await;

        assert_eq!(session.state().await, SessionState::Failed);
        assert!(!session.is_running().await);
        assert!(!session.is_connected());

        // A later start is allowed
        assert!(session.start().await);
        session.stop().await;
    }
}
