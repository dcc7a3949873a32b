//! JPEG encoding of raw frames
//!
//! MJPEG cameras already deliver JPEG parts, which are relayed as-is.
//! Sources that hand back pixel buffers are compressed here.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ColorType;

use crate::error::ReadError;

use super::raw::RawImage;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Encoder turning raw images into JPEG bytes
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Create an encoder; quality is clamped to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode an image to JPEG
    pub fn encode(&self, image: &RawImage) -> Result<Bytes, ReadError> {
        match image {
            RawImage::Jpeg(data) => Ok(data.clone()),
            RawImage::Rgb8 {
                width,
                height,
                data,
            } => self.encode_pixels(data, *width, *height, ColorType::Rgb8, 3),
            RawImage::Gray8 {
                width,
                height,
                data,
            } => self.encode_pixels(data, *width, *height, ColorType::L8, 1),
        }
    }

    fn encode_pixels(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        color: ColorType,
        channels: usize,
    ) -> Result<Bytes, ReadError> {
        let expected = width as usize * height as usize * channels;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ReadError::Encode(format!(
                "{}x{} image needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }

        let mut out = Vec::with_capacity(expected / 4);
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(data, width, height, color)
            .map_err(|e| ReadError::Encode(e.to_string()))?;

        Ok(Bytes::from(out))
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

/// Check whether bytes start with a JPEG SOI marker
pub fn looks_like_jpeg(data: &[u8]) -> bool {
    data.starts_with(&JPEG_SOI)
}
