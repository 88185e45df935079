//! The frame value type emitted by the reader.

use std::io::Cursor;

use bytes::Bytes;
use image::ImageDecoder;

/// One decoded image from the upstream stream.
///
/// Frames are immutable once emitted by the reader. The payload is `Bytes`,
/// so passing a frame through the distributor and fan-out paths is an Arc
/// bump, not a copy.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number, strictly increasing within a session.
    pub seq: u64,
    /// Wall-clock capture time (Unix milliseconds).
    pub timestamp_ms: u64,
    /// Milliseconds since session start.
    pub relative_ms: u64,
    /// Original dimensions, when the JPEG header could be probed.
    pub dimensions: Option<(u32, u32)>,
    /// Encoded JPEG bytes.
    pub data: Bytes,
}

impl Frame {
    /// Timestamp relative to session start, in fractional seconds.
    #[must_use]
    pub fn relative_secs(&self) -> f64 {
        self.relative_ms as f64 / 1000.0
    }
}

/// Probes JPEG dimensions from the encoded header without a full decode.
///
/// Returns `None` for bytes that are not a parseable JPEG.
#[must_use]
pub fn probe_jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let decoder = image::codecs::jpeg::JpegDecoder::new(Cursor::new(data)).ok()?;
    Some(decoder.dimensions())
}

/// Test helper: a small valid JPEG with known dimensions.
#[cfg(test)]
pub(crate) fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([128, 0, 255]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut out)
        .encode_image(&image::DynamicImage::ImageRgb8(img))
        .unwrap();
    out
}
