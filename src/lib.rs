//! Scanwatch - IP-camera barcode reader
//!
//! Pulls an MJPEG stream from a networked camera, decodes barcodes per
//! frame, debounces repeat sightings into discrete read events, and records
//! reads against a local product catalog.

pub mod capture;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod engine;
pub mod paths;
pub mod reader;

pub use capture::{Frame, FrameSource, FrameSourceFactory, MjpegFactory};
pub use catalog::{Catalog, Product, ProductStore, Reading, ReadingStat};
pub use config::AppConfig;
pub use decode::{Decoder, ImageDecoder};
pub use engine::{DebounceEngine, EngineSettings, ReadEvent};
pub use reader::{Reader, ScanNotice, ScanOutcome};
