//! Video Capture Layer
//!
//! A [`FrameSource`] owns a capture device and keeps the most recent frame
//! available from a dedicated background thread. Consumers read the latest
//! frame through a [`FrameReader`] without ever blocking the capture loop.

pub mod ffmpeg;
pub mod frame;

#[cfg(test)]
pub mod testing;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::OverlayError;

pub use ffmpeg::FfmpegBackend;
pub use frame::Frame;

/// Pause after a failed read before the capture loop tries again
const READ_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Errors reported by capture backends and devices
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source {0:?} not found")]
    NotFound(String),
    #[error("unsupported capture source: {0}")]
    Unsupported(String),
    #[error("invalid capture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("failed to start capture process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("capture stream ended")]
    EndOfStream,
    #[error("device returned an empty frame")]
    EmptyFrame,
    #[error("device already released")]
    Released,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Opens capture devices by identifier
pub trait CaptureBackend {
    /// Acquire the device named by `source_id`
    fn open(&self, source_id: &str) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// An opened capture device
///
/// Devices are moved onto the capture thread once the source starts, so they
/// must be `Send`.
pub trait CaptureDevice: Send {
    /// Request a frame size; devices may not honor it
    fn configure(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;

    /// Blocking read of the next frame
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device handle
    fn release(&mut self);
}

/// Single-slot cell holding the most recently captured frame
///
/// Writers publish a complete frame by swapping the shared handle, readers
/// clone the handle. A reader never observes a partially written frame.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: RwLock<Option<Arc<Frame>>>,
}

impl LatestFrame {
    /// Replace the current frame
    pub fn store(&self, frame: Arc<Frame>) {
        let previous = std::mem::replace(&mut *self.slot.write(), Some(frame));
        drop(previous);
    }

    /// Get the current frame, if any has been published
    pub fn load(&self) -> Option<Arc<Frame>> {
        self.slot.read().clone()
    }
}

/// Read-only handle onto a frame source's latest frame
#[derive(Debug, Clone)]
pub struct FrameReader {
    cell: Arc<LatestFrame>,
}

impl FrameReader {
    pub fn new(cell: Arc<LatestFrame>) -> Self {
        Self { cell }
    }

    /// The most recently captured frame
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.cell.load()
    }
}

/// Capture counters shared with the capture thread
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl CaptureStats {
    /// Record a successful read, returning the sequence number for the frame
    fn record_frame(&self) -> u64 {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.frames_captured.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a failed read, returning the length of the current failure streak
    fn record_failure(&self) -> u64 {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total frames published, including the priming read
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Total failed reads
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Failed reads since the last successful one
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Continuously captures frames on a background thread
pub struct FrameSource {
    source_id: String,
    cell: Arc<LatestFrame>,
    stats: Arc<CaptureStats>,
    stop_flag: Arc<AtomicBool>,
    /// Held here until `start` moves it onto the capture thread
    device: Option<Box<dyn CaptureDevice>>,
    worker: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Open a capture device, request a frame size and read a first frame
    ///
    /// A frame is available from [`current_frame`](Self::current_frame) as soon
    /// as this returns.
    pub fn open(
        backend: &dyn CaptureBackend,
        source_id: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, OverlayError> {
        info!("Opening capture source {:?} at {}x{}", source_id, width, height);

        let unavailable = |reason| OverlayError::DeviceUnavailable {
            source_id: source_id.to_string(),
            reason,
        };

        let mut device = backend.open(source_id).map_err(unavailable)?;

        if let Err(e) = device.configure(width, height) {
            warn!("Could not set capture size {}x{}: {}", width, height, e);
        }

        let first = match device.read() {
            Ok(frame) if frame.is_empty() => Err(CaptureError::EmptyFrame),
            other => other,
        };
        let first = match first {
            Ok(frame) => frame,
            Err(e) => {
                device.release();
                return Err(unavailable(e));
            }
        };

        let source = Self {
            source_id: source_id.to_string(),
            cell: Arc::new(LatestFrame::default()),
            stats: Arc::new(CaptureStats::default()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            device: Some(device),
            worker: None,
        };
        publish(&source.cell, &source.stats, first);

        let (w, h) = source.current_frame().map(|f| f.dimensions()).unwrap_or_default();
        info!("Capture source {:?} ready, first frame {}x{}", source_id, w, h);

        Ok(source)
    }

    /// Launch the background capture thread
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let Some(device) = self.device.take() else {
            debug!("Capture source {:?} already started or stopped", self.source_id);
            return Ok(());
        };

        let cell = self.cell.clone();
        let stats = self.stats.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || capture_loop(device, &cell, &stats, &stop_flag))
            .map_err(CaptureError::Spawn)?;

        self.worker = Some(handle);
        info!("Capture thread started for {:?}", self.source_id);
        Ok(())
    }

    /// The most recently captured frame
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.cell.load()
    }

    /// A cloneable read-only handle onto the latest frame
    pub fn reader(&self) -> FrameReader {
        FrameReader::new(self.cell.clone())
    }

    /// Capture counters
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Identifier the source was opened with
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether the capture thread is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop capturing and release the device
    ///
    /// Blocks until the capture thread has exited. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Capture thread for {:?} panicked", self.source_id);
            }
            info!("Capture source {:?} stopped", self.source_id);
        }

        // Never started: release here
        if let Some(mut device) = self.device.take() {
            device.release();
            info!("Capture source {:?} released", self.source_id);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stamp and publish a frame into the cell
fn publish(cell: &LatestFrame, stats: &CaptureStats, mut frame: Frame) {
    frame.sequence = stats.record_frame();
    cell.store(Arc::new(frame));
}

/// Body of the capture thread
fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    cell: &LatestFrame,
    stats: &CaptureStats,
    stop_flag: &AtomicBool,
) {
    while !stop_flag.load(Ordering::Acquire) {
        let result = match device.read() {
            Ok(frame) if frame.is_empty() => Err(CaptureError::EmptyFrame),
            other => other,
        };

        // Stopped mid-read: discard the result
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        match result {
            Ok(frame) => publish(cell, stats, frame),
            Err(e) => {
                let streak = stats.record_failure();
                if streak == 1 {
                    warn!("Frame read failed, keeping previous frame: {}", e);
                } else {
                    debug!("Frame read failed ({} in a row): {}", streak, e);
                }
                std::thread::sleep(READ_RETRY_PAUSE);
            }
        }
    }

    device.release();
    debug!("Capture thread exiting");
}
