//! Camera frame acquisition
//!
//! The reader only depends on the `FrameSource`/`FrameSourceFactory` seams;
//! the MJPEG implementation in [`mjpeg`] covers the IP-webcam feeds this
//! tool is pointed at.

pub mod mjpeg;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;

pub use mjpeg::{MjpegFactory, MjpegSource};

/// One still image pulled from the camera stream (JPEG-encoded).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at: Instant,
}

/// An open camera stream.
///
/// `read` blocks until the next frame arrives. `Ok(None)` means the stream
/// ended cleanly; errors are I/O or protocol failures. The connection is
/// released when the source is dropped.
#[async_trait]
pub trait FrameSource: Send {
    async fn read(&mut self) -> Result<Option<Frame>>;
}

/// Opens camera streams from a locator (e.g. an MJPEG URL).
///
/// Acquisition failures surface here, synchronously to the caller of `open`.
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    async fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>>;
}
