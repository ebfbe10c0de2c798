//! anpr-overlay - Live license plate reading over a camera feed
//!
//! Captures frames from a camera or video source, reads plate text with
//! PaddleOCR and shows the annotated feed in a window.

mod capture;
mod config;
mod display;
mod error;
mod overlay;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{CaptureBackend, FfmpegBackend, FrameSource};
use crate::config::AppConfig;
use crate::overlay::{AnnotatedFrameProducer, ProducerConfig};
use crate::vision::{ModelManager, PaddleOcr};

const USAGE_HINT: &str = "Please provide --camera argument to start the ANPR camera.";

/// anpr-overlay - Live license plate OCR overlay
#[derive(Parser, Debug)]
#[command(name = "anpr-overlay")]
#[command(about = "Reads license plates from a live camera feed and overlays them on the video")]
struct Args {
    /// Start the camera and open the ANPR window
    #[arg(long)]
    camera: bool,

    /// Capture source: device index, /dev/videoN, video file or stream URL
    #[arg(long)]
    source: Option<String>,

    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable the GPU execution provider
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    run(args, &mut std::io::stdout(), |config| {
        FfmpegBackend::new(config.capture.ffmpeg_path.clone())
    })
}

/// Run the application; the capture backend is only built once `--camera` is given
fn run<W, B>(args: Args, out: &mut W, make_backend: impl FnOnce(&AppConfig) -> B) -> Result<()>
where
    W: Write,
    B: CaptureBackend,
{
    if !args.camera {
        writeln!(out, "{}", USAGE_HINT)?;
        return Ok(());
    }

    info!("anpr-overlay starting...");

    let config = config::load_or_default(args.config.as_deref())?;
    let source_id = args.source.unwrap_or_else(|| config.capture.source.clone());

    let mut ocr_config = config.vision.ocr_config();
    if args.cpu {
        ocr_config.use_gpu = false;
    }

    let models = match &config.vision.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    if !models.are_models_ready() {
        for (model_type, available, size) in models.get_model_status() {
            if !available {
                info!(
                    "{} model missing or incomplete ({:?} bytes on disk)",
                    model_type.display_name(),
                    size
                );
            }
        }
        info!("Downloading OCR models to {:?}", models.models_dir());
        models
            .ensure_all_models()
            .context("Failed to prepare OCR models")?;
    }
    let recognizer = PaddleOcr::new(&models, ocr_config).context("Failed to initialize OCR")?;

    let backend = make_backend(&config);
    let mut source = FrameSource::open(
        &backend,
        &source_id,
        config.capture.width,
        config.capture.height,
    )?;
    source.start().context("Failed to start capture thread")?;

    let producer = AnnotatedFrameProducer::new(
        source.reader(),
        recognizer,
        ProducerConfig::from(&config),
    );

    display::window::run_window(source, producer, &config.display)?;

    info!("anpr-overlay shutdown complete");
    Ok(())
}
