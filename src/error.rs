//! Error types for the relay
//!
//! Errors are grouped by where they originate: configuration lookups,
//! opening the upstream source, reading frames from it, and waiting on a
//! subscription. The HTTP layer turns every consumer-facing error into a
//! `404` with the `Display` text as the body.

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and source lookup errors
///
/// These fail fast and are never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Camera {0} not found in config")]
    UnknownSource(String),

    #[error("Camera {0} configured more than once")]
    DuplicateSource(String),

    #[error("Invalid camera entry: {0}")]
    InvalidSource(String),

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure to open an upstream source
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Upstream request failed: {0}")]
    Request(String),

    #[error("Upstream responded with status {0}")]
    Status(u16),

    #[error("Unsupported upstream content type: {0}")]
    UnsupportedContentType(String),

    #[error("Timed out connecting to upstream")]
    Timeout,
}

impl ConnectError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::UnsupportedContentType(_))
    }
}

/// Failure to read a single frame from an open upstream handle
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Frame read failed: {0}")]
    Transient(String),

    #[error("Upstream connection dropped: {0}")]
    Disconnected(String),

    #[error("Timed out waiting for upstream frame")]
    Timeout,

    #[error("Upstream frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

impl ReadError {
    /// Whether the upstream connection is gone and must be reopened
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ReadError::Disconnected(_))
    }
}

/// Consumer-facing errors from a subscription wait
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Camera not connected")]
    UpstreamUnavailable,

    #[error("Failed to get frame")]
    NoFrameYet,

    #[error("Request cancelled")]
    Cancelled,
}
