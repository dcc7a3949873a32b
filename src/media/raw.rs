//! Raw frames as produced by an upstream source

use bytes::Bytes;

/// Image payload pulled from an upstream source
#[derive(Debug, Clone)]
pub enum RawImage {
    /// Already JPEG-compressed (the common case for MJPEG cameras)
    Jpeg(Bytes),
    /// Packed 8-bit RGB pixels, row-major
    Rgb8 { width: u32, height: u32, data: Bytes },
    /// 8-bit grayscale pixels, row-major
    Gray8 { width: u32, height: u32, data: Bytes },
}

impl RawImage {
    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            RawImage::Jpeg(data) => data.len(),
            RawImage::Rgb8 { data, .. } | RawImage::Gray8 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A frame read from an upstream handle
///
/// `sequence` is the source's own frame position when it exposes one.
/// Two consecutive frames with the same sequence are the same picture.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub image: RawImage,
    pub sequence: Option<u64>,
}

impl RawFrame {
    /// JPEG frame without a sequence marker
    pub fn jpeg(data: Bytes) -> Self {
        Self {
            image: RawImage::Jpeg(data),
            sequence: None,
        }
    }

    /// Attach the source's sequence marker
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Whether this frame repeats the previously captured one
    pub fn is_repeat_of(&self, last_sequence: Option<u64>) -> bool {
        match (self.sequence, last_sequence) {
            (Some(current), Some(last)) => current == last,
            _ => false,
        }
    }
}
