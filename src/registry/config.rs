//! Session tuning
//!
//! Retry bounds and countdowns shared by every session in a registry.

use std::time::Duration;

/// Session configuration options
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Upstream open attempts before the session fails
    pub connect_attempts: u32,

    /// Delay between upstream open attempts
    pub connect_retry_delay: Duration,

    /// Consecutive read cycles with no clients before disconnecting
    pub idle_cycles: u32,

    /// Upper bound on a single upstream frame read
    pub read_timeout: Duration,

    /// Consecutive non-fatal read errors tolerated before reconnecting
    pub max_read_errors: u32,

    /// Consecutive reconnects without a published frame before failing
    pub max_reconnects: u32,

    /// Waits for a new frame while the upstream is down, per stream frame
    pub stream_wait_attempts: u32,

    /// Length of each stream wait
    pub stream_wait_interval: Duration,

    /// Polls for an upstream connection before a snapshot gives up
    pub snapshot_wait_attempts: u32,

    /// Delay between snapshot polls
    pub snapshot_wait_interval: Duration,

    /// Quality used when a source hands back raw pixels
    pub jpeg_quality: u8,

    /// Largest upstream frame accepted, in bytes
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 35,
            connect_retry_delay: Duration::from_millis(200),
            idle_cycles: 45,
            read_timeout: Duration::from_secs(5),
            max_read_errors: 10,
            max_reconnects: 5,
            stream_wait_attempts: 20,
            stream_wait_interval: Duration::from_millis(100),
            snapshot_wait_attempts: 15,
            snapshot_wait_interval: Duration::from_millis(200),
            jpeg_quality: 80,
            max_frame_size: 8 * 1024 * 1024, // 8MB
        }
    }
}

impl SessionConfig {
    /// Set the upstream connect retry policy
    pub fn connect_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_retry_delay = delay;
        self
    }

    /// Set the idle countdown
    pub fn idle_cycles(mut self, cycles: u32) -> Self {
        self.idle_cycles = cycles.max(1);
        self
    }

    /// Set the upstream read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set read error and reconnect tolerances
    pub fn read_error_limits(mut self, max_read_errors: u32, max_reconnects: u32) -> Self {
        self.max_read_errors = max_read_errors;
        self.max_reconnects = max_reconnects;
        self
    }

    /// Set how long a streaming client waits on a disconnected upstream
    pub fn stream_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.stream_wait_attempts = attempts.max(1);
        self.stream_wait_interval = interval;
        self
    }

    /// Set how long a snapshot waits for the upstream to connect
    pub fn snapshot_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.snapshot_wait_attempts = attempts.max(1);
        self.snapshot_wait_interval = interval;
        self
    }

    /// Set JPEG quality for raw sources
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the largest accepted upstream frame
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
