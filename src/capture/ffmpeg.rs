//! FFmpeg-backed capture devices.
//!
//! Cameras, video files and network streams are all read by piping raw RGB24
//! frames out of an `ffmpeg` child process. The output is always scaled to the
//! configured size, so every frame has exactly `width * height * 3` bytes.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{CaptureBackend, CaptureDevice, CaptureError, Frame};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Minimum time between two ffmpeg launches for the same camera
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Where ffmpeg should read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    /// A local camera opened through a platform input device
    Device { format: &'static str, path: String },
    /// A local video file, read at its native frame rate
    File(String),
    /// A network stream URL
    Stream(String),
}

impl CaptureInput {
    /// Resolve a user-supplied source identifier
    pub fn resolve(source_id: &str) -> Result<Self, CaptureError> {
        let source_id = source_id.trim();
        if source_id.is_empty() {
            return Err(CaptureError::NotFound(String::new()));
        }

        if let Some(index) = parse_device_index(source_id) {
            return device_for_index(index);
        }
        if source_id.starts_with("/dev/video") {
            return Ok(Self::Device {
                format: "video4linux2",
                path: source_id.to_string(),
            });
        }
        if let Some(name) = source_id.strip_prefix("video=") {
            return Ok(Self::Device {
                format: "dshow",
                path: format!("video={name}"),
            });
        }
        if source_id.contains("://") {
            return Ok(Self::Stream(source_id.to_string()));
        }
        Ok(Self::File(source_id.to_string()))
    }

    /// Local path that must exist before ffmpeg is started
    fn required_path(&self) -> Option<&Path> {
        match self {
            Self::Device { format: "video4linux2", path } => Some(Path::new(path)),
            Self::File(path) => Some(Path::new(path)),
            _ => None,
        }
    }
}

#[cfg(target_os = "linux")]
fn device_for_index(index: u32) -> Result<CaptureInput, CaptureError> {
    Ok(CaptureInput::Device {
        format: "video4linux2",
        path: format!("/dev/video{index}"),
    })
}

#[cfg(target_os = "macos")]
fn device_for_index(index: u32) -> Result<CaptureInput, CaptureError> {
    Ok(CaptureInput::Device {
        format: "avfoundation",
        path: format!("{index}:none"),
    })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn device_for_index(index: u32) -> Result<CaptureInput, CaptureError> {
    Err(CaptureError::Unsupported(format!(
        "camera index {index}; pass a DirectShow device as \"video=<name>\""
    )))
}

/// Parse a camera index such as `0`, or the number in `/dev/video2`
pub fn parse_device_index(source_id: &str) -> Option<u32> {
    if let Ok(index) = source_id.parse::<u32>() {
        return Some(index);
    }
    source_id
        .strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
}

/// Build the ffmpeg argument list for an input scaled to `width` x `height`
pub fn build_args(input: &CaptureInput, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match input {
        CaptureInput::Device { format, path } => {
            args.extend([
                "-f".to_string(),
                format.to_string(),
                "-video_size".to_string(),
                format!("{width}x{height}"),
                "-i".to_string(),
                path.clone(),
            ]);
        }
        CaptureInput::File(path) => {
            args.extend(["-re".to_string(), "-i".to_string(), path.clone()]);
        }
        CaptureInput::Stream(url) => {
            args.extend([
                "-fflags".to_string(),
                "nobuffer".to_string(),
                "-flags".to_string(),
                "low_delay".to_string(),
                "-i".to_string(),
                url.clone(),
            ]);
        }
    }

    args.extend([
        "-an".to_string(),
        "-vf".to_string(),
        format!("scale={width}:{height}"),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-".to_string(),
    ]);
    args
}

/// Opens [`FfmpegCamera`] devices
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Check that the ffmpeg binary can be executed
    fn check_ffmpeg(&self) -> Result<(), CaptureError> {
        let status = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(CaptureError::Spawn)?;

        if !status.success() {
            return Err(CaptureError::Other(anyhow::anyhow!(
                "{:?} -version exited with {}",
                self.ffmpeg_path,
                status
            )));
        }
        Ok(())
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl CaptureBackend for FfmpegBackend {
    fn open(&self, source_id: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let input = CaptureInput::resolve(source_id)?;

        if let Some(path) = input.required_path() {
            if !path.exists() {
                return Err(CaptureError::NotFound(path.display().to_string()));
            }
        }
        self.check_ffmpeg()?;

        debug!("Resolved capture source {:?} to {:?}", source_id, input);
        Ok(Box::new(FfmpegCamera::new(self.ffmpeg_path.clone(), input)))
    }
}

/// A running (or restartable) ffmpeg capture process
pub struct FfmpegCamera {
    ffmpeg_path: PathBuf,
    input: CaptureInput,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    last_start: Option<Instant>,
    released: bool,
}

impl FfmpegCamera {
    fn new(ffmpeg_path: PathBuf, input: CaptureInput) -> Self {
        Self {
            ffmpeg_path,
            input,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            child: None,
            stdout: None,
            last_start: None,
            released: false,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Start ffmpeg if it is not already running
    ///
    /// Launches are at least [`RESTART_DELAY`] apart; reads in between fail
    /// with [`CaptureError::EndOfStream`] without starting a process.
    fn ensure_running(&mut self) -> Result<&mut ChildStdout, CaptureError> {
        if self.stdout.is_none() {
            if self.last_start.is_some_and(|t| t.elapsed() < RESTART_DELAY) {
                return Err(CaptureError::EndOfStream);
            }
            self.last_start = Some(Instant::now());

            let args = build_args(&self.input, self.width, self.height);
            info!("Starting ffmpeg capture: {:?}", self.input);

            let mut child = Command::new(&self.ffmpeg_path)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(CaptureError::Spawn)?;

            if let Some(stderr) = child.stderr.take() {
                forward_stderr(stderr);
            }
            let stdout = child.stdout.take().ok_or_else(|| {
                CaptureError::Other(anyhow::anyhow!("failed to capture ffmpeg stdout"))
            })?;
            self.child = Some(child);
            self.stdout = Some(stdout);
        }

        self.stdout
            .as_mut()
            .ok_or_else(|| CaptureError::Other(anyhow::anyhow!("ffmpeg stdout missing")))
    }

    /// Kill and reap the ffmpeg process
    fn shutdown_process(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited
                debug!("ffmpeg kill: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap ffmpeg process: {}", e);
            }
        }
    }
}

impl CaptureDevice for FfmpegCamera {
    fn configure(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidSize { width, height });
        }
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            // Restarted with the new size on the next read
            self.shutdown_process();
            self.last_start = None;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }

        let (width, height) = (self.width, self.height);
        let mut buffer = vec![0u8; self.frame_len()];
        let stdout = self.ensure_running()?;

        match stdout.read_exact(&mut buffer) {
            Ok(()) => Frame::from_rgb24(buffer, width, height).ok_or(CaptureError::EmptyFrame),
            Err(e) => {
                // A fresh process is started on the next read
                self.shutdown_process();
                if e.kind() == ErrorKind::UnexpectedEof {
                    Err(CaptureError::EndOfStream)
                } else {
                    Err(CaptureError::Io(e))
                }
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shutdown_process();
            debug!("ffmpeg capture released");
        }
    }
}

/// Log ffmpeg's stderr at debug level until the process closes it
fn forward_stderr(stderr: ChildStderr) {
    let spawned = std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!("ffmpeg: {}", line);
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start ffmpeg log thread: {}", e);
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}
