//! Camera window (eframe)

use anyhow::Result;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{DisplaySession, DisplaySink, QUIT_KEY};
use crate::capture::FrameSource;
use crate::config::DisplaySettings;
use crate::overlay::{AnnotatedFrameProducer, DetectedTexts};
use crate::vision::TextRecognizer;

/// [`DisplaySink`] backed by an egui context
pub struct EguiSink {
    ctx: egui::Context,
    textures: HashMap<String, egui::TextureHandle>,
}

impl EguiSink {
    pub fn new(ctx: egui::Context) -> Self {
        Self {
            ctx,
            textures: HashMap::new(),
        }
    }

    /// Texture last shown in `window`
    pub fn texture(&self, window: &str) -> Option<&egui::TextureHandle> {
        self.textures.get(window)
    }
}

impl DisplaySink for EguiSink {
    fn show(&mut self, window: &str, image: &RgbImage) -> Result<()> {
        let size = [image.width() as usize, image.height() as usize];
        let color_image = egui::ColorImage::from_rgb(size, image.as_raw());

        match self.textures.get_mut(window) {
            Some(texture) => texture.set(color_image, egui::TextureOptions::LINEAR),
            None => {
                let texture = self
                    .ctx
                    .load_texture(window, color_image, egui::TextureOptions::LINEAR);
                self.textures.insert(window.to_string(), texture);
            }
        }
        Ok(())
    }

    /// Several keys can arrive in one frame; the quit key wins over the rest
    fn poll_key(&mut self) -> Option<char> {
        let keys: Vec<char> = self.ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|event| match event {
                    egui::Event::Text(text) => Some(text.chars()),
                    _ => None,
                })
                .flatten()
                .collect()
        });

        if keys.contains(&QUIT_KEY) {
            Some(QUIT_KEY)
        } else {
            keys.first().copied()
        }
    }

    fn close_all(&mut self) {
        self.textures.clear();
        self.ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }
}

struct CameraApp<R> {
    session: DisplaySession<R, EguiSink>,
    texts: DetectedTexts,
    show_plate_list: bool,
    outcome: Arc<Mutex<Option<anyhow::Error>>>,
    finished: bool,
}

impl<R: TextRecognizer> CameraApp<R> {
    fn new(
        session: DisplaySession<R, EguiSink>,
        show_plate_list: bool,
        outcome: Arc<Mutex<Option<anyhow::Error>>>,
    ) -> Self {
        Self {
            texts: session.texts_handle(),
            session,
            show_plate_list,
            outcome,
            finished: false,
        }
    }

    /// Run one session step for this UI frame
    fn advance(&mut self, ctx: &egui::Context) {
        if self.finished {
            return;
        }
        match self.session.tick() {
            None => ctx.request_repaint(),
            Some(result) => {
                self.finished = true;
                *self.outcome.lock() = result.err();
            }
        }
    }
}

impl<R: TextRecognizer> eframe::App for CameraApp<R> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.advance(ctx);

        if self.show_plate_list {
            let texts = self.texts.snapshot();
            egui::TopBottomPanel::bottom("plates").show(ctx, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(egui::RichText::new("Plates:").strong());
                    if texts.is_empty() {
                        ui.weak("none");
                    }
                    for text in texts.iter() {
                        ui.monospace(text);
                    }
                });
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            match self.session.sink().texture(self.session.window_title()) {
                Some(texture) => {
                    let tex_size = texture.size_vec2();
                    let available = ui.available_size();
                    // Fit the window, never upscale
                    let scale = (available.x / tex_size.x)
                        .min(available.y / tex_size.y)
                        .min(1.0);
                    ui.centered_and_justified(|ui| {
                        ui.image((texture.id(), tex_size * scale));
                    });
                }
                None => {
                    ui.centered_and_justified(|ui| {
                        ui.label("Waiting for camera...");
                    });
                }
            }
        });
    }
}

/// Open the camera window and run the session until it closes
///
/// Blocks the calling thread. The frame source is stopped before this
/// returns, whether the window closed normally, on error, or failed to open.
pub fn run_window<R: TextRecognizer + 'static>(
    source: FrameSource,
    producer: AnnotatedFrameProducer<R>,
    settings: &DisplaySettings,
) -> Result<()> {
    let outcome = Arc::new(Mutex::new(None));
    let title = settings.window_title.clone();
    let show_plate_list = settings.show_plate_list;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([800.0, 640.0])
            .with_min_inner_size([320.0, 240.0])
            .with_title(&title),
        ..Default::default()
    };

    info!("Opening camera window, press '{}' to quit", QUIT_KEY);
    let app_outcome = outcome.clone();
    let app_title = title.clone();
    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| {
            let sink = EguiSink::new(cc.egui_ctx.clone());
            let session = DisplaySession::new(source, producer, sink, app_title);
            Ok(Box::new(CameraApp::new(session, show_plate_list, app_outcome)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Camera window failed: {}", e))?;

    let result = match outcome.lock().take() {
        Some(err) => Err(err),
        None => Ok(()),
    };
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::FakeBackend;
    use crate::overlay::ProducerConfig;
    use crate::vision::testing::{plate_detection, FakeRecognizer};

    fn text_input(keys: &[&str]) -> egui::RawInput {
        egui::RawInput {
            events: keys.iter().map(|k| egui::Event::Text(k.to_string())).collect(),
            ..Default::default()
        }
    }

    fn camera_app(
        ctx: &egui::Context,
        backend: &FakeBackend,
        recognizer: FakeRecognizer,
    ) -> CameraApp<FakeRecognizer> {
        let mut source = FrameSource::open(backend, "0", 640, 480).unwrap();
        source.start().unwrap();
        let producer =
            AnnotatedFrameProducer::new(source.reader(), recognizer, ProducerConfig::default());
        let sink = EguiSink::new(ctx.clone());
        let session = DisplaySession::new(source, producer, sink, "ANPR Camera");
        CameraApp::new(session, true, Arc::new(Mutex::new(None)))
    }

    #[test]
    fn test_poll_key_finds_quit_after_other_keys() {
        let ctx = egui::Context::default();
        let mut sink = EguiSink::new(ctx.clone());

        let mut key = None;
        let _ = ctx.run(text_input(&["x", "q"]), |_| key = sink.poll_key());
        assert_eq!(key, Some('q'));

        let _ = ctx.run(text_input(&["ab"]), |_| key = sink.poll_key());
        assert_eq!(key, Some('a'));

        let _ = ctx.run(egui::RawInput::default(), |_| key = sink.poll_key());
        assert_eq!(key, None);
    }

    #[test]
    fn test_show_uploads_texture_per_window() {
        let ctx = egui::Context::default();
        let mut sink = EguiSink::new(ctx.clone());
        let image = RgbImage::new(32, 16);

        let _ = ctx.run(egui::RawInput::default(), |_| {
            sink.show("ANPR Camera", &image).unwrap();
            sink.show("ANPR Camera", &image).unwrap();
        });

        let texture = sink.texture("ANPR Camera").unwrap();
        assert_eq!(texture.size(), [32, 16]);
        assert!(sink.texture("other").is_none());

        sink.close_all();
        assert!(sink.texture("ANPR Camera").is_none());
    }

    #[test]
    fn test_app_quits_when_q_follows_another_key() {
        let ctx = egui::Context::default();
        let backend = FakeBackend::new(640, 480);
        let recognizer = FakeRecognizer::returning(vec![plate_detection()]);
        let mut app = camera_app(&ctx, &backend, recognizer);

        let _ = ctx.run(egui::RawInput::default(), |ctx| app.advance(ctx));
        assert!(!app.finished);
        assert_eq!(app.texts.get(), vec!["ABC123"]);

        let _ = ctx.run(text_input(&["x", "q"]), |ctx| app.advance(ctx));
        assert!(app.finished);
        assert!(app.outcome.lock().is_none());
        assert_eq!(app.session.frames_shown(), 2);
        assert!(backend.counters.is_released());

        // Further UI frames after finishing do nothing
        let _ = ctx.run(egui::RawInput::default(), |ctx| app.advance(ctx));
        assert_eq!(app.session.frames_shown(), 2);
    }

    #[test]
    fn test_app_keeps_running_on_other_keys() {
        let ctx = egui::Context::default();
        let backend = FakeBackend::new(640, 480);
        let mut app = camera_app(&ctx, &backend, FakeRecognizer::default());

        for key in ["x", "Q", " "] {
            let _ = ctx.run(text_input(&[key]), |ctx| app.advance(ctx));
        }

        assert!(!app.finished);
        assert_eq!(app.session.frames_shown(), 3);
        assert!(!backend.counters.is_released());
    }

    #[test]
    fn test_app_records_error_and_releases_camera() {
        let ctx = egui::Context::default();
        let backend = FakeBackend::new(640, 480);
        let recognizer = FakeRecognizer::returning(vec![plate_detection()]).failing_after(1);
        let mut app = camera_app(&ctx, &backend, recognizer);

        let _ = ctx.run(egui::RawInput::default(), |ctx| app.advance(ctx));
        assert!(!app.finished);

        let _ = ctx.run(egui::RawInput::default(), |ctx| app.advance(ctx));
        assert!(app.finished);
        let err = app.outcome.lock().take().unwrap();
        assert!(format!("{:#}", err).contains("text recognition failed"));
        assert!(backend.counters.is_released());
    }
}
