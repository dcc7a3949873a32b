//! Statistics for relay sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Live counters updated by a session's capture loop and subscribers
#[derive(Debug)]
pub struct SessionCounters {
    created_at: Instant,
    pub connect_attempts: AtomicU64,
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub frames_published: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub read_errors: AtomicU64,
    pub encode_errors: AtomicU64,
    pub subscriptions: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            connect_attempts: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
        }
    }

    /// Bump a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            uptime: self.created_at.elapsed(),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Session-level statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Time since the session was created
    #[serde(serialize_with = "as_secs")]
    pub uptime: Duration,
    /// Upstream open attempts, including failed ones
    pub connect_attempts: u64,
    /// Successful upstream opens
    pub connects: u64,
    /// Upstream handles closed
    pub disconnects: u64,
    /// Frames published to the buffer
    pub frames_published: u64,
    /// Frames dropped because the source repeated itself
    pub duplicates_skipped: u64,
    /// Failed frame reads
    pub read_errors: u64,
    /// Frames that could not be encoded
    pub encode_errors: u64,
    /// Subscriptions handed out over the session's lifetime
    pub subscriptions: u64,
}

impl SessionStats {
    /// Published frames per second over the session's lifetime
    pub fn average_fps(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }
}

fn as_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}
