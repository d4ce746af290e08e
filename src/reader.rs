//! Barcode reader loop driver
//!
//! Owns the start/stop lifecycle of a single background task that pulls
//! frames from the camera, decodes them, feeds sightings through the
//! debounce engine, and reports the resulting read events as notices.
//!
//! The engine state lives inside the background task; nothing else touches
//! it. Consumers receive notices over an mpsc channel (taken once via
//! [`Reader::take_notice_receiver`]), which marshals delivery onto whatever
//! execution context the consumer runs in. Failures inside the task are
//! terminal for that run: the task emits an `Error` notice and the driver
//! returns to the stopped state. Call `start` again to resume.

use crate::capture::{Frame, FrameSource, FrameSourceFactory};
use crate::catalog::ProductStore;
use crate::decode::Decoder;
use crate::engine::{DebounceEngine, EngineSettings};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a scan attempt turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A cataloged code was read and recorded.
    Read,
    /// A code was read but is not in the catalog; nothing was recorded.
    Unregistered,
    /// The run ended abnormally (stream ended or a frame failed).
    Error,
}

/// One notice delivered to the consumer.
#[derive(Debug, Clone)]
pub struct ScanNotice {
    pub outcome: ScanOutcome,
    pub code: Option<String>,
    pub detail: String,
}

/// Loop driver around the capture → decode → debounce pipeline.
pub struct Reader {
    settings: EngineSettings,
    sources: Arc<dyn FrameSourceFactory>,
    decoder: Arc<dyn Decoder>,
    store: Arc<dyn ProductStore>,
    notice_tx: mpsc::Sender<ScanNotice>,
    notice_rx: SyncMutex<Option<mpsc::Receiver<ScanNotice>>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Reader {
    pub fn new(
        settings: EngineSettings,
        sources: Arc<dyn FrameSourceFactory>,
        decoder: Arc<dyn Decoder>,
        store: Arc<dyn ProductStore>,
    ) -> Self {
        let (notice_tx, notice_rx) = mpsc::channel(256);
        Self {
            settings,
            sources,
            decoder,
            store,
            notice_tx,
            notice_rx: SyncMutex::new(Some(notice_rx)),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Take the notice receiver. Returns `None` after the first call.
    pub fn take_notice_receiver(&self) -> Option<mpsc::Receiver<ScanNotice>> {
        self.notice_rx.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the camera stream and launch the background task.
    ///
    /// Fails while already running (without touching the active run) and
    /// when the stream cannot be opened (the driver stays stopped).
    pub async fn start(&self, locator: &str) -> Result<()> {
        let mut task = self.task.lock().await;
        if self.running.load(Ordering::SeqCst) {
            bail!("reader is already running");
        }
        // Reap a task that stopped on its own (stream end or frame error)
        if let Some((_, handle)) = task.take() {
            let _ = handle.await;
        }

        let source = self
            .sources
            .open(locator)
            .await
            .with_context(|| format!("failed to open camera stream at {locator}"))?;

        // Fresh engine per run: per-code state never survives a restart
        let engine = DebounceEngine::new(self.settings.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(
            source,
            engine,
            Arc::clone(&self.decoder),
            Arc::clone(&self.store),
            self.notice_tx.clone(),
            stop_rx,
            Arc::clone(&self.running),
        ));
        *task = Some((stop_tx, handle));

        info!("▶️  Barcode reading started ({})", locator);
        Ok(())
    }

    /// Signal the background task and wait for it to exit. A no-op while
    /// already stopped.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some((stop_tx, handle)) = task.take() else {
            debug!("Stop requested while already stopped");
            return;
        };

        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            warn!("Reader task did not shut down cleanly: {}", e);
        }
        info!("⏹️  Barcode reading stopped");
    }
}

async fn run_loop(
    mut source: Box<dyn FrameSource>,
    mut engine: DebounceEngine,
    decoder: Arc<dyn Decoder>,
    store: Arc<dyn ProductStore>,
    notices: mpsc::Sender<ScanNotice>,
    mut stop_rx: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) {
    let terminal: Option<String> = loop {
        if *stop_rx.borrow() {
            break None;
        }

        // An in-flight pull is dropped on stop; no new pulls start after it
        let pulled = tokio::select! {
            _ = stop_rx.changed() => break None,
            res = source.read() => res,
        };

        match pulled {
            Ok(Some(frame)) => {
                if let Err(e) = process_frame(&frame, &mut engine, &decoder, &store, &notices).await
                {
                    warn!("Frame processing failed, stopping: {:#}", e);
                    break Some(format!("frame processing failed: {e:#}"));
                }
            }
            Ok(None) => {
                info!("Camera stream ended");
                break Some("camera stream ended".to_string());
            }
            Err(e) => {
                warn!("Camera read failed, stopping: {:#}", e);
                break Some(format!("camera read failed: {e:#}"));
            }
        }
    };

    // Back to Stopped before the terminal notice goes out, so a consumer
    // reacting to the notice can immediately start() again
    running.store(false, Ordering::SeqCst);
    if let Some(detail) = terminal {
        send_error(&notices, detail).await;
    }
    // Dropping the source releases the camera connection
}

async fn process_frame(
    frame: &Frame,
    engine: &mut DebounceEngine,
    decoder: &Arc<dyn Decoder>,
    store: &Arc<dyn ProductStore>,
    notices: &mpsc::Sender<ScanNotice>,
) -> Result<()> {
    let seen = decoder.decode(frame)?;
    let events = engine.process_frame(&seen, Instant::now());

    for event in events {
        if store.exists(&event.code)? {
            store
                .record_reading(&event.code)
                .with_context(|| format!("failed to record reading for {}", event.code))?;
            info!("📦 Code read: {}", event.code);
            let _ = notices
                .send(ScanNotice {
                    outcome: ScanOutcome::Read,
                    code: Some(event.code.clone()),
                    detail: format!("Code read: {}", event.code),
                })
                .await;
        } else {
            warn!("Unregistered code: {}", event.code);
            let _ = notices
                .send(ScanNotice {
                    outcome: ScanOutcome::Unregistered,
                    code: Some(event.code.clone()),
                    detail: format!("Code not registered: {}", event.code),
                })
                .await;
        }
    }

    Ok(())
}

async fn send_error(notices: &mpsc::Sender<ScanNotice>, detail: String) {
    let _ = notices
        .send(ScanNotice {
            outcome: ScanOutcome::Error,
            code: None,
            detail,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Source scripted with frame payloads; after the script it either ends
    /// the stream or blocks forever (to model a live camera).
    struct ScriptedSource {
        frames: VecDeque<&'static str>,
        hold_open: bool,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn read(&mut self) -> Result<Option<Frame>> {
            match self.frames.pop_front() {
                Some(payload) => Ok(Some(Frame {
                    data: Bytes::from_static(payload.as_bytes()),
                    captured_at: Instant::now(),
                })),
                None if self.hold_open => std::future::pending().await,
                None => Ok(None),
            }
        }
    }

    struct ScriptedFactory {
        fail_open: bool,
        frames: Vec<&'static str>,
        hold_open: bool,
    }

    #[async_trait]
    impl FrameSourceFactory for ScriptedFactory {
        async fn open(&self, locator: &str) -> Result<Box<dyn FrameSource>> {
            if self.fail_open {
                bail!("cannot reach {locator}");
            }
            Ok(Box::new(ScriptedSource {
                frames: self.frames.clone().into(),
                hold_open: self.hold_open,
            }))
        }
    }

    /// Frame payloads are comma-separated code lists; "ERR" fails the frame.
    struct PayloadDecoder;

    impl Decoder for PayloadDecoder {
        fn decode(&self, frame: &Frame) -> Result<HashSet<String>> {
            let text = std::str::from_utf8(&frame.data)?;
            if text == "ERR" {
                return Err(anyhow!("synthetic decode failure"));
            }
            Ok(text
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect())
        }
    }

    struct FakeStore {
        known: HashSet<String>,
        recorded: StdMutex<Vec<String>>,
    }

    impl FakeStore {
        fn new(known: &[&str]) -> Self {
            Self {
                known: known.iter().map(|s| s.to_string()).collect(),
                recorded: StdMutex::new(Vec::new()),
            }
        }
    }

    impl ProductStore for FakeStore {
        fn exists(&self, code: &str) -> Result<bool> {
            Ok(self.known.contains(code))
        }

        fn record_reading(&self, code: &str) -> Result<bool> {
            self.recorded.lock().unwrap().push(code.to_string());
            Ok(true)
        }
    }

    fn make_reader(
        factory: ScriptedFactory,
        store: Arc<FakeStore>,
    ) -> (Reader, mpsc::Receiver<ScanNotice>) {
        let reader = Reader::new(
            EngineSettings::default(),
            Arc::new(factory),
            Arc::new(PayloadDecoder),
            store,
        );
        let rx = reader.take_notice_receiver().unwrap();
        (reader, rx)
    }

    async fn drain_until_error(rx: &mut mpsc::Receiver<ScanNotice>) -> Vec<ScanNotice> {
        let mut notices = Vec::new();
        loop {
            let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for notices")
                .expect("notice channel closed unexpectedly");
            let is_error = notice.outcome == ScanOutcome::Error;
            notices.push(notice);
            if is_error {
                return notices;
            }
        }
    }

    #[tokio::test]
    async fn start_fails_when_stream_unavailable() {
        let store = Arc::new(FakeStore::new(&[]));
        let (reader, _rx) = make_reader(
            ScriptedFactory {
                fail_open: true,
                frames: vec![],
                hold_open: false,
            },
            store,
        );

        assert!(reader.start("http://nowhere/video").await.is_err());
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn known_and_unknown_codes_produce_matching_notices() {
        let store = Arc::new(FakeStore::new(&["A"]));
        let (reader, mut rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec!["A", "B"],
                hold_open: false,
            },
            Arc::clone(&store),
        );

        reader.start("http://cam/video").await.unwrap();
        let notices = drain_until_error(&mut rx).await;

        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0].outcome, ScanOutcome::Read);
        assert_eq!(notices[0].code.as_deref(), Some("A"));
        assert_eq!(notices[1].outcome, ScanOutcome::Unregistered);
        assert_eq!(notices[1].code.as_deref(), Some("B"));
        // Stream end is reported explicitly, not silently swallowed
        assert_eq!(notices[2].outcome, ScanOutcome::Error);
        assert!(notices[2].detail.contains("stream ended"));

        assert_eq!(*store.recorded.lock().unwrap(), vec!["A".to_string()]);

        reader.stop().await;
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn repeated_sightings_debounce_to_one_read() {
        let store = Arc::new(FakeStore::new(&["A"]));
        let (reader, mut rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec!["A", "A", "A"],
                hold_open: false,
            },
            Arc::clone(&store),
        );

        reader.start("http://cam/video").await.unwrap();
        let notices = drain_until_error(&mut rx).await;

        let reads: Vec<_> = notices
            .iter()
            .filter(|n| n.outcome == ScanOutcome::Read)
            .collect();
        assert_eq!(reads.len(), 1);
        assert_eq!(store.recorded.lock().unwrap().len(), 1);
        reader.stop().await;
    }

    #[tokio::test]
    async fn decode_failure_is_fail_stop() {
        let store = Arc::new(FakeStore::new(&["A"]));
        let (reader, mut rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec!["A", "ERR", "A"],
                hold_open: false,
            },
            Arc::clone(&store),
        );

        reader.start("http://cam/video").await.unwrap();
        let notices = drain_until_error(&mut rx).await;

        assert_eq!(notices.last().unwrap().outcome, ScanOutcome::Error);
        assert!(notices.last().unwrap().detail.contains("frame processing failed"));
        // The frame after the failure was never processed
        assert_eq!(store.recorded.lock().unwrap().len(), 1);

        reader.stop().await;
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let store = Arc::new(FakeStore::new(&[]));
        let (reader, _rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec![],
                hold_open: true,
            },
            store,
        );

        reader.start("http://cam/video").await.unwrap();
        assert!(reader.is_running());
        assert!(reader.start("http://cam/video").await.is_err());
        assert!(reader.is_running());

        reader.stop().await;
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = Arc::new(FakeStore::new(&[]));
        let (reader, _rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec![],
                hold_open: true,
            },
            store,
        );

        // Stopped → stop is a no-op
        reader.stop().await;
        assert!(!reader.is_running());

        reader.start("http://cam/video").await.unwrap();
        reader.stop().await;
        reader.stop().await;
        assert!(!reader.is_running());
    }

    #[tokio::test]
    async fn restart_after_self_stop() {
        let store = Arc::new(FakeStore::new(&["A"]));
        let (reader, mut rx) = make_reader(
            ScriptedFactory {
                fail_open: false,
                frames: vec!["A"],
                hold_open: false,
            },
            Arc::clone(&store),
        );

        reader.start("http://cam/video").await.unwrap();
        drain_until_error(&mut rx).await;

        // Task ended on its own; a new start must succeed without stop()
        reader.start("http://cam/video").await.unwrap();
        let notices = drain_until_error(&mut rx).await;

        // Fresh engine state per run: A reads again immediately
        assert_eq!(notices[0].outcome, ScanOutcome::Read);
        assert_eq!(store.recorded.lock().unwrap().len(), 2);
        reader.stop().await;
    }
}
