//! HTTP MJPEG camera connector
//!
//! Opens `http://` camera URLs with reqwest and cuts the streaming body into
//! JPEG frames with [`MjpegReader`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;

use crate::error::{ConnectError, ReadError};
use crate::media::jpeg::looks_like_jpeg;
use crate::media::multipart::boundary_from_content_type;
use crate::media::{MjpegReader, RawFrame};

use super::{UpstreamConnector, UpstreamHandle};

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Connector for cameras serving MJPEG over HTTP
#[derive(Debug, Clone)]
pub struct HttpMjpegConnector {
    client: reqwest::Client,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl HttpMjpegConnector {
    /// Create a connector
    pub fn new(connect_timeout: Duration, max_frame_size: usize) -> Result<Self, ConnectError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        Ok(Self {
            client,
            connect_timeout,
            max_frame_size,
        })
    }
}

#[async_trait]
impl UpstreamConnector for HttpMjpegConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn UpstreamHandle>, ConnectError> {
        let response = tokio::time::timeout(self.connect_timeout, self.client.get(url).send())
            .await
            .map_err(|_| ConnectError::Timeout)?
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let reader = reader_for(&content_type, self.max_frame_size)?;

        tracing::debug!(url = url, content_type = %content_type, "Upstream responded");

        Ok(Box::new(HttpMjpegHandle {
            body: Box::pin(response.bytes_stream()),
            reader,
        }))
    }
}

/// Pick a reader for the upstream's content type
fn reader_for(content_type: &str, max_frame_size: usize) -> Result<MjpegReader, ConnectError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type.starts_with("multipart/") {
        Ok(match boundary_from_content_type(content_type) {
            Some(boundary) => MjpegReader::with_boundary(&boundary, max_frame_size),
            None => MjpegReader::with_markers(max_frame_size),
        })
    } else if media_type.is_empty() || media_type == "image/jpeg" {
        Ok(MjpegReader::with_markers(max_frame_size))
    } else {
        Err(ConnectError::UnsupportedContentType(content_type.to_string()))
    }
}

struct HttpMjpegHandle {
    body: BodyStream,
    reader: MjpegReader,
}

#[async_trait]
impl UpstreamHandle for HttpMjpegHandle {
    async fn next_frame(&mut self) -> Result<RawFrame, ReadError> {
        loop {
            if let Some(jpeg) = self.reader.next_frame()? {
                if !looks_like_jpeg(&jpeg) {
                    return Err(ReadError::Transient("part is not a JPEG".to_string()));
                }
                return Ok(RawFrame::jpeg(jpeg));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.reader.push(&chunk),
                Some(Err(e)) => return Err(ReadError::Disconnected(e.to_string())),
                None => return Err(ReadError::Disconnected("stream ended".to_string())),
            }
        }
    }

    async fn close(self: Box<Self>) {
        // Dropping the body aborts the HTTP response
        drop(self);
    }
}
