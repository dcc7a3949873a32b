//! Upstream video sources
//!
//! The session layer only sees this boundary: open a source by URL, pull
//! the next raw frame, close it. Decoding lives behind the trait so other
//! capture backends can be plugged in next to the HTTP MJPEG one.

use async_trait::async_trait;

use crate::error::{ConnectError, ReadError};
use crate::media::RawFrame;

pub mod http;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpMjpegConnector;

/// Opens handles to upstream sources
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Open a source
    async fn open(&self, url: &str) -> Result<Box<dyn UpstreamHandle>, ConnectError>;
}

/// An open upstream source
#[async_trait]
pub trait UpstreamHandle: Send {
    /// Pull the next available frame
    async fn next_frame(&mut self) -> Result<RawFrame, ReadError>;

    /// Release the source
    async fn close(self: Box<Self>);
}
