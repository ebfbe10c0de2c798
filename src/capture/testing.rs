//! In-process capture doubles for tests

use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CaptureBackend, CaptureDevice, CaptureError, Frame};

/// Shared counters recording what a fake device was asked to do
#[derive(Debug, Clone, Default)]
pub struct DeviceCounters {
    opens: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    configured: Arc<Mutex<Option<(u32, u32)>>>,
}

impl DeviceCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.releases() > 0
    }

    pub fn configured(&self) -> Option<(u32, u32)> {
        *self.configured.lock()
    }
}

/// Backend producing [`FakeDevice`]s with a fixed synthetic frame
pub struct FakeBackend {
    pub counters: DeviceCounters,
    frame_size: (u32, u32),
    fail_open: bool,
    fail_reads_after: Option<usize>,
    read_delay: Duration,
}

impl FakeBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            counters: DeviceCounters::default(),
            frame_size: (width, height),
            fail_open: false,
            fail_reads_after: None,
            read_delay: Duration::from_millis(1),
        }
    }

    /// A backend whose `open` always fails
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(640, 480)
        }
    }

    /// Let the first `n` reads succeed and fail every read after that
    pub fn fail_reads_after(mut self, n: usize) -> Self {
        self.fail_reads_after = Some(n);
        self
    }
}

impl CaptureBackend for FakeBackend {
    fn open(&self, source_id: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CaptureError::NotFound(source_id.to_string()));
        }
        Ok(Box::new(FakeDevice {
            counters: self.counters.clone(),
            frame: synthetic_frame(self.frame_size.0, self.frame_size.1),
            fail_reads_after: self.fail_reads_after,
            read_delay: self.read_delay,
            released: false,
        }))
    }
}

/// Device returning the same synthetic frame on every read
pub struct FakeDevice {
    counters: DeviceCounters,
    frame: RgbImage,
    fail_reads_after: Option<usize>,
    read_delay: Duration,
    released: bool,
}

impl CaptureDevice for FakeDevice {
    fn configure(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        *self.counters.configured.lock() = Some((width, height));
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        std::thread::sleep(self.read_delay);
        let index = self.counters.reads.fetch_add(1, Ordering::SeqCst);
        match self.fail_reads_after {
            Some(limit) if index >= limit => Err(CaptureError::EndOfStream),
            _ => Ok(Frame::new(self.frame.clone())),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A dark frame with a light plate-shaped patch in the middle
pub fn synthetic_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let in_patch =
            x > width / 4 && x < width * 3 / 4 && y > height * 2 / 5 && y < height * 3 / 5;
        if in_patch {
            Rgb([230, 230, 230])
        } else {
            Rgb([30, 30, 40])
        }
    })
}
