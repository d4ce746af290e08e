//! Barcode extraction from camera frames
//!
//! The detection itself is delegated to `rxing`; this module only adapts it
//! behind the `Decoder` seam the reader consumes.

use crate::capture::Frame;
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;

/// Extracts recognized code strings from one frame.
///
/// Duplicates within a frame collapse (the result is a set); an empty set
/// means nothing was found and is not an error.
pub trait Decoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Result<HashSet<String>>;
}

/// Multi-format barcode decoder over JPEG frames.
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(&self, frame: &Frame) -> Result<HashSet<String>> {
        let img = image::load_from_memory(&frame.data)
            .context("failed to decode camera frame as an image")?;
        let luma = img.to_luma8();
        let (width, height) = luma.dimensions();

        match rxing::helpers::detect_multiple_in_luma(luma.into_raw(), width, height) {
            Ok(results) => Ok(results.iter().map(|r| r.getText().to_string()).collect()),
            // No barcode in the frame: a normal outcome, not a failure
            Err(rxing::Exceptions::NotFoundException(_)) => Ok(HashSet::new()),
            Err(e) => Err(anyhow!("barcode detection failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;
    use std::time::Instant;

    fn jpeg_frame(width: u32, height: u32) -> Frame {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        Frame {
            data: Bytes::from(buf.into_inner()),
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn blank_frame_yields_empty_set() {
        let decoder = ImageDecoder;
        let codes = decoder.decode(&jpeg_frame(64, 64)).unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        let decoder = ImageDecoder;
        let frame = Frame {
            data: Bytes::from_static(b"definitely not a jpeg"),
            captured_at: Instant::now(),
        };
        assert!(decoder.decode(&frame).is_err());
    }
}
