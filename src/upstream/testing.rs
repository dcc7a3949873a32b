//! Scripted upstream for session tests
//!
//! Produces a numbered JPEG-looking frame every `frame_interval` and counts
//! every open/close so tests can assert on upstream usage.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ConnectError, ReadError};
use crate::media::RawFrame;

use super::{UpstreamConnector, UpstreamHandle};

#[derive(Debug, Default)]
pub(crate) struct FakeUpstream {
    pub reachable: AtomicBool,
    pub fail_reads: AtomicBool,
    /// Emit each sequence number twice to exercise duplicate skipping
    pub repeat_frames: AtomicBool,
    pub open_attempts: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub open_handles: AtomicUsize,
    pub max_open_handles: AtomicUsize,
    pub frames_read: AtomicU64,
    /// How long `close()` takes, in milliseconds
    pub close_delay_ms: AtomicU64,
}

impl FakeUpstream {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_close_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.close_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn max_open_handles(&self) -> usize {
        self.max_open_handles.load(Ordering::SeqCst)
    }
}

/// Connector handing out [`FakeHandle`]s
#[derive(Debug, Clone)]
pub(crate) struct FakeConnector {
    pub upstream: Arc<FakeUpstream>,
    pub frame_interval: Duration,
}

impl FakeConnector {
    pub fn reachable(frame_interval: Duration) -> Self {
        let upstream = FakeUpstream::default();
        upstream.set_reachable(true);
        Self {
            upstream: Arc::new(upstream),
            frame_interval,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            upstream: Arc::new(FakeUpstream::default()),
            frame_interval: Duration::from_millis(50),
        }
    }
}

/// Fake JPEG payload carrying its sequence number
pub(crate) fn fake_jpeg(sequence: u64) -> Bytes {
    let mut data = BytesMut::with_capacity(12);
    data.put_slice(&[0xFF, 0xD8]);
    data.put_u64(sequence);
    data.put_slice(&[0xFF, 0xD9]);
    data.freeze()
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn open(&self, _url: &str) -> Result<Box<dyn UpstreamHandle>, ConnectError> {
        let upstream = &self.upstream;
        upstream.open_attempts.fetch_add(1, Ordering::SeqCst);

        if !upstream.reachable.load(Ordering::SeqCst) {
            return Err(ConnectError::Request("connection refused".into()));
        }

        upstream.opens.fetch_add(1, Ordering::SeqCst);
        let open = upstream.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        upstream.max_open_handles.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakeHandle {
            upstream: Arc::clone(upstream),
            frame_interval: self.frame_interval,
            reads: 0,
        }))
    }
}

pub(crate) struct FakeHandle {
    upstream: Arc<FakeUpstream>,
    frame_interval: Duration,
    reads: u64,
}

#[async_trait]
impl UpstreamHandle for FakeHandle {
    async fn next_frame(&mut self) -> Result<RawFrame, ReadError> {
        tokio::time::sleep(self.frame_interval).await;

        if self.upstream.fail_reads.load(Ordering::SeqCst) {
            return Err(ReadError::Disconnected("camera went away".into()));
        }

        self.reads += 1;
        self.upstream.frames_read.fetch_add(1, Ordering::SeqCst);

        let sequence = if self.upstream.repeat_frames.load(Ordering::SeqCst) {
            (self.reads + 1) / 2
        } else {
            self.reads
        };

        Ok(RawFrame::jpeg(fake_jpeg(sequence)).with_sequence(sequence))
    }

    async fn close(self: Box<Self>) {
        // The handle counts as open until the slow close completes
        let delay = self.upstream.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.upstream.closes.fetch_add(1, Ordering::SeqCst);
        self.upstream.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
