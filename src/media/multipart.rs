//! MJPEG over `multipart/x-mixed-replace`
//!
//! Cameras serve MJPEG as an endless multipart body:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 12345\r\n        (optional)
//! \r\n
//! <jpeg bytes>\r\n
//! --frame\r\n
//! ...
//! ```
//!
//! [`MjpegReader`] incrementally cuts such a body into JPEG parts. Parts
//! carrying `Content-Length` are cut by length, the rest at the next
//! boundary. Without a boundary the reader scans for JPEG SOI/EOI markers.
//! The writer half produces the same framing for downstream clients.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ReadError;

use super::jpeg::{JPEG_EOI, JPEG_SOI};

/// Boundary used for downstream responses
pub const DEFAULT_BOUNDARY: &str = "frame";

/// Headers longer than this without a blank line are treated as garbage
const MAX_HEADER_SIZE: usize = 4096;

/// `Content-Type` header value for a multipart MJPEG response
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Frame one JPEG as a multipart part
pub fn encode_part(boundary: &str, jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(boundary.len() + jpeg.len() + 40);
    part.put_slice(b"--");
    part.put_slice(boundary.as_bytes());
    part.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Extract the boundary parameter from a `Content-Type` header value
///
/// Tolerates quoting and cameras that include the leading `--`.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        let val = val.strip_prefix("--").unwrap_or(val);
        (!val.is_empty()).then(|| val.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Looking for the next `--boundary` line
    SeekBoundary,
    /// Past the boundary, waiting for the blank line ending the part headers
    Headers,
    /// Reading part body, by length when known
    Body { length: Option<usize> },
}

/// Incremental MJPEG body reader
#[derive(Debug)]
pub struct MjpegReader {
    buf: BytesMut,
    /// `--boundary`, or None for marker scanning
    delimiter: Option<Vec<u8>>,
    max_frame_size: usize,
    state: ReadState,
    /// Prefix of the current search window already known not to match
    scanned: usize,
}

impl MjpegReader {
    /// Reader for a multipart body with the given boundary
    pub fn with_boundary(boundary: &str, max_frame_size: usize) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Self {
            buf: BytesMut::new(),
            delimiter: Some(delimiter),
            max_frame_size,
            state: ReadState::SeekBoundary,
            scanned: 0,
        }
    }

    /// Reader that finds frames by JPEG start/end markers
    pub fn with_markers(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            delimiter: None,
            max_frame_size,
            state: ReadState::SeekBoundary,
            scanned: 0,
        }
    }

    /// Bytes buffered but not yet returned
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a body chunk
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete JPEG, if one is buffered
    ///
    /// An oversized part is reported once as `FrameTooLarge`; the reader then
    /// resynchronizes on the next boundary and later calls continue normally.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ReadError> {
        match self.delimiter.clone() {
            Some(delimiter) => self.next_part(&delimiter),
            None => self.next_marked(),
        }
    }

    fn next_part(&mut self, delimiter: &[u8]) -> Result<Option<Bytes>, ReadError> {
        loop {
            match self.state {
                ReadState::SeekBoundary => match find(&self.buf, delimiter) {
                    Some(pos) => {
                        let _ = self.buf.split_to(pos + delimiter.len());
                        self.state = ReadState::Headers;
                    }
                    None => {
                        let keep = delimiter.len().saturating_sub(1);
                        if self.buf.len() > keep {
                            let _ = self.buf.split_to(self.buf.len() - keep);
                        }
                        return Ok(None);
                    }
                },
                ReadState::Headers => match find(&self.buf, b"\r\n\r\n") {
                    Some(pos) => {
                        let headers = self.buf.split_to(pos + 4);
                        let length = content_length(&headers);
                        self.state = ReadState::Body { length };
                    }
                    None if self.buf.len() > MAX_HEADER_SIZE => {
                        self.state = ReadState::SeekBoundary;
                        return Err(ReadError::Transient(
                            "multipart headers too long".to_string(),
                        ));
                    }
                    None => return Ok(None),
                },
                ReadState::Body { length: Some(len) } => {
                    if len > self.max_frame_size {
                        self.state = ReadState::SeekBoundary;
                        return Err(ReadError::FrameTooLarge {
                            size: len,
                            limit: self.max_frame_size,
                        });
                    }
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let frame = self.buf.split_to(len).freeze();
                    self.state = ReadState::SeekBoundary;
                    return Ok(Some(frame));
                }
                ReadState::Body { length: None } => match self.scan(delimiter, 0) {
                    Some(pos) => {
                        let mut frame = self.buf.split_to(pos);
                        trim_line_end(&mut frame);
                        self.state = ReadState::SeekBoundary;
                        if frame.is_empty() {
                            continue;
                        }
                        return Ok(Some(frame.freeze()));
                    }
                    None if self.buf.len() > self.max_frame_size => {
                        let size = self.buf.len();
                        self.buf.clear();
                        self.scanned = 0;
                        self.state = ReadState::SeekBoundary;
                        return Err(ReadError::FrameTooLarge {
                            size,
                            limit: self.max_frame_size,
                        });
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    fn next_marked(&mut self) -> Result<Option<Bytes>, ReadError> {
        let Some(start) = find(&self.buf, &JPEG_SOI) else {
            // Keep a trailing 0xFF in case the marker straddles chunks
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let _ = self.buf.split_to(self.buf.len() - keep);
            return Ok(None);
        };
        if start > 0 {
            let _ = self.buf.split_to(start);
            self.scanned = 0;
        }

        match self.scan(&JPEG_EOI, 2) {
            Some(end) => Ok(Some(self.buf.split_to(end + 4).freeze())),
            None if self.buf.len() > self.max_frame_size => {
                let size = self.buf.len();
                self.buf.clear();
                self.scanned = 0;
                Err(ReadError::FrameTooLarge {
                    size,
                    limit: self.max_frame_size,
                })
            }
            None => Ok(None),
        }
    }

    /// Search `buf[offset..]` for `needle`, skipping bytes a previous miss
    /// already covered. The returned position is relative to `offset`.
    fn scan(&mut self, needle: &[u8], offset: usize) -> Option<usize> {
        let haystack = self.buf.get(offset..).unwrap_or_default();
        let start = self.scanned.min(haystack.len());
        match find(&haystack[start..], needle) {
            Some(pos) => {
                self.scanned = 0;
                Some(start + pos)
            }
            None => {
                self.scanned = haystack.len().saturating_sub(needle.len().saturating_sub(1));
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_line_end(frame: &mut BytesMut) {
    if frame.ends_with(b"\r\n") {
        frame.truncate(frame.len() - 2);
    } else if frame.ends_with(b"\n") {
        frame.truncate(frame.len() - 1);
    }
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
