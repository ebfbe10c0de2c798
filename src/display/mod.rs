//! Display Layer
//!
//! Drives the capture → annotate → show cycle. The loop is written against
//! [`DisplaySink`] so the windowing backend can be swapped; [`window`] holds
//! the eframe implementation.

pub mod window;

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, error, info};

use crate::capture::{CaptureError, FrameSource};
use crate::error::OverlayError;
use crate::overlay::{codec, AnnotatedFrameProducer, DetectedTexts};
use crate::vision::TextRecognizer;

/// Key that ends the display loop
pub const QUIT_KEY: char = 'q';

/// Somewhere annotated frames can be shown
pub trait DisplaySink {
    /// Show `image` in the window named `window`
    fn show(&mut self, window: &str, image: &RgbImage) -> Result<()>;
    /// The key pressed since the last poll, if any
    fn poll_key(&mut self) -> Option<char>;
    /// Close every window this sink opened
    fn close_all(&mut self);
}

/// Whether the loop should keep going after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Quit,
}

/// A running camera session: frame source, producer and display
///
/// Dropping the session stops the frame source and closes the display, on
/// every exit path including unwinding.
pub struct DisplaySession<R, S: DisplaySink> {
    source: FrameSource,
    producer: AnnotatedFrameProducer<R>,
    sink: S,
    window_title: String,
    frames_shown: u64,
    closed: bool,
}

impl<R: TextRecognizer, S: DisplaySink> DisplaySession<R, S> {
    /// Create a new session; `source` should already be started
    pub fn new(
        source: FrameSource,
        producer: AnnotatedFrameProducer<R>,
        sink: S,
        window_title: impl Into<String>,
    ) -> Self {
        Self {
            source,
            producer,
            sink,
            window_title: window_title.into(),
            frames_shown: 0,
            closed: false,
        }
    }

    /// Produce, decode and show one frame, then check for the quit key
    pub fn step(&mut self) -> Result<LoopControl> {
        if !self.source.is_running() {
            return Err(OverlayError::ReadFailed(CaptureError::EndOfStream)).with_context(|| {
                format!("Capture from {:?} is no longer running", self.source.source_id())
            });
        }

        let annotated = self
            .producer
            .next_annotated_frame()
            .context("Failed to produce annotated frame")?;
        let image = codec::decode(&annotated.jpeg).context("Failed to decode annotated frame")?;

        self.sink
            .show(&self.window_title, &image)
            .context("Failed to show frame")?;
        self.frames_shown += 1;

        match self.sink.poll_key() {
            Some(QUIT_KEY) => Ok(LoopControl::Quit),
            Some(key) => {
                debug!("Ignoring key {:?}", key);
                Ok(LoopControl::Continue)
            }
            None => Ok(LoopControl::Continue),
        }
    }

    /// Run one step and close the session if it ended
    ///
    /// Returns `None` while the session keeps running, otherwise how it ended.
    pub fn tick(&mut self) -> Option<Result<()>> {
        match self.step() {
            Ok(LoopControl::Continue) => None,
            Ok(LoopControl::Quit) => {
                info!(
                    "Quit key pressed, plates in last frame: {:?}",
                    self.producer.detected_texts()
                );
                self.close();
                Some(Ok(()))
            }
            Err(e) => {
                error!("Display loop stopped: {:#}", e);
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl<R, S: DisplaySink> DisplaySession<R, S> {
    pub fn window_title(&self) -> &str {
        &self.window_title
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle onto the texts recognized in the latest frame
    pub fn texts_handle(&self) -> DetectedTexts
    where
        R: TextRecognizer,
    {
        self.producer.texts_handle()
    }

    /// Stop the frame source and close the display. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.stop();
        self.sink.close_all();
        let stats = self.source.stats();
        info!(
            "Camera session closed after {} frames ({} captured, {} read failures, {} in a row)",
            self.frames_shown,
            stats.frames_captured(),
            stats.read_failures(),
            stats.consecutive_failures()
        );
    }
}

impl<R, S: DisplaySink> Drop for DisplaySession<R, S> {
    fn drop(&mut self) {
        self.close();
    }
}
