//! Media handling for the relay
//!
//! This module provides:
//! - Raw frame types handed over by upstream sources
//! - JPEG encoding for pixel-buffer sources
//! - MJPEG multipart parsing (upstream) and framing (downstream)

pub mod jpeg;
pub mod multipart;
pub mod raw;

pub use jpeg::JpegEncoder;
pub use multipart::{encode_part, MjpegReader, DEFAULT_BOUNDARY};
pub use raw::{RawFrame, RawImage};
