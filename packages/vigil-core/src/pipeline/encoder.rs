//! Frame re-encoding and MP4 assembly.
//!
//! Frames are decoded, scaled down to the configured bound preserving
//! aspect ratio, and re-encoded as JPEG with the `image` crate. Clips are
//! assembled by the `ffmpeg` CLI over a scratch directory of numbered
//! JPEGs; a non-zero exit status is an [`EncodeError`] and the caller
//! discards the batch.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use tokio::process::Command;

use crate::error::EncodeError;
use crate::protocol_constants::JPEG_ENCODE_QUALITY;

/// A re-encoded frame ready for packaging.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decodes `data`, scales it to fit within `max_width x max_height`
/// preserving aspect ratio (never upscaling), and re-encodes as JPEG.
pub fn resize_and_encode(
    data: &[u8],
    max_width: u32,
    max_height: u32,
) -> Result<EncodedFrame, EncodeError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    let (w, h) = img.dimensions();

    let img = if w > max_width || h > max_height {
        img.resize(max_width, max_height, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    let (width, height) = img.dimensions();

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_ENCODE_QUALITY);
    img.write_with_encoder(encoder)?;

    Ok(EncodedFrame { jpeg, width, height })
}

/// Encodes `frames` into an MP4 at `dest` with exactly `fps` output frames
/// per second.
///
/// Frames are staged as `frame_%05d.jpg` in a scratch directory and handed
/// to ffmpeg. The scratch directory is removed on drop regardless of
/// outcome.
pub async fn encode_mp4(
    frames: &[EncodedFrame],
    fps: u32,
    dest: &Path,
) -> Result<(), EncodeError> {
    if frames.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }

    let scratch = tempfile::tempdir().map_err(EncodeError::Io)?;
    for (i, frame) in frames.iter().enumerate() {
        let path = scratch.path().join(format!("frame_{:05}.jpg", i));
        tokio::fs::write(&path, &frame.jpeg)
            .await
            .map_err(EncodeError::Io)?;
    }

    let pattern = scratch.path().join("frame_%05d.jpg");
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-framerate")
        .arg(fps.to_string())
        .arg("-i")
        .arg(&pattern)
        .arg("-c:v")
        .arg("libx264")
        .arg("-pix_fmt")
        .arg("yuv420p")
        // libx264 requires even dimensions.
        .arg("-vf")
        .arg("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        .arg("-r")
        .arg(fps.to_string())
        .arg(dest)
        .output()
        .await
        .map_err(EncodeError::Spawn)?;

    if !output.status.success() {
        return Err(EncodeError::Ffmpeg {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::frame::test_jpeg;

    #[test]
    fn oversized_frame_is_scaled_down_preserving_aspect() {
        let jpeg = test_jpeg(1280, 720);
        let encoded = resize_and_encode(&jpeg, 640, 360).unwrap();
        assert_eq!((encoded.width, encoded.height), (640, 360));
    }

    #[test]
    fn small_frame_is_not_upscaled() {
        let jpeg = test_jpeg(320, 180);
        let encoded = resize_and_encode(&jpeg, 640, 360).unwrap();
        assert_eq!((encoded.width, encoded.height), (320, 180));
    }

    #[test]
    fn tall_frame_fits_height_bound() {
        let jpeg = test_jpeg(360, 1280);
        let encoded = resize_and_encode(&jpeg, 640, 360).unwrap();
        assert!(encoded.height <= 360);
        assert!(encoded.width <= 640);
        // Aspect preserved within rounding.
        let src_aspect = 360.0 / 1280.0;
        let dst_aspect = encoded.width as f64 / encoded.height as f64;
        assert!((src_aspect - dst_aspect).abs() < 0.02);
    }

    #[test]
    fn reencoded_output_is_a_decodable_jpeg() {
        let jpeg = test_jpeg(100, 50);
        let encoded = resize_and_encode(&jpeg, 640, 360).unwrap();
        let back = image::load_from_memory(&encoded.jpeg).unwrap();
        assert_eq!(back.dimensions(), (100, 50));
    }

    #[test]
    fn garbage_input_is_an_encode_error() {
        assert!(resize_and_encode(&[1, 2, 3, 4], 640, 360).is_err());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_spawning_ffmpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let err = encode_mp4(&[], 1, &tmp.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::EmptyBatch));
    }
}
