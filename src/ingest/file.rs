//! Local file frame source.
//!
//! This module provides `FileSource` for ingesting frames from local video files.
//! The file source is responsible for:
//! - Reading frames from a local video file (no network access)
//! - Decoding video frames in-memory
//! - Reporting the container duration and native frame rate when known
//! - Signalling `ReadError::EndOfStream` once the clip is exhausted
//!
//! Synthetic clips (`stub://video/<name>?frames=N&fps=F`) produce `N` frames and
//! report a duration of `N / F` seconds. Add `realtime=true` to pace reads at `F`.

use anyhow::{anyhow, Result};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFile;
use super::{
    parse_stub_params, stub_param, synthetic_pixels, FrameSource, ReadError, SourceKind,
    DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH,
};
use crate::frame::Frame;

const DEFAULT_SYNTHETIC_FRAMES: u64 = 150;
const DEFAULT_SYNTHETIC_FPS: u32 = 30;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/srv/footage/site_a.mp4") or `stub://video/<name>`.
    pub path: String,
    /// Frame size for synthetic clips. Decoded files keep their own size.
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticClip),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFile),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                path: config.path.clone(),
                backend: FileBackend::Synthetic(SyntheticClip::new(config)?),
            });
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                path: config.path.clone(),
                backend: FileBackend::Ffmpeg(FfmpegFile::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                config.path
            ))
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        format!("video file {}", self.path)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.open(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.open(),
        }
    }

    fn read(&mut self) -> Result<Frame, ReadError> {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.read(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.release(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.release(),
        }
    }

    fn reported_duration(&self) -> Option<Duration> {
        match &self.backend {
            FileBackend::Synthetic(clip) => Some(clip.duration()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.duration(),
        }
    }

    fn native_fps(&self) -> Option<u32> {
        match &self.backend {
            FileBackend::Synthetic(clip) => Some(clip.fps),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.native_fps(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://video/...)
// ----------------------------------------------------------------------------

struct SyntheticClip {
    config: FileConfig,
    total_frames: u64,
    fps: u32,
    realtime: bool,
    frame_count: u64,
    scene_state: u8,
    opened: bool,
    next_due: Option<Instant>,
}

impl SyntheticClip {
    fn new(config: FileConfig) -> Result<Self> {
        let (_, params) = parse_stub_params(&config.path);
        let total_frames = stub_param(&params, "frames")?.unwrap_or(DEFAULT_SYNTHETIC_FRAMES);
        let fps = stub_param(&params, "fps")?.unwrap_or(DEFAULT_SYNTHETIC_FPS);
        let realtime = stub_param(&params, "realtime")?.unwrap_or(false);
        if fps == 0 {
            return Err(anyhow!("synthetic clip fps must be greater than zero"));
        }
        Ok(Self {
            config,
            total_frames,
            fps,
            realtime,
            frame_count: 0,
            scene_state: 0,
            opened: false,
            next_due: None,
        })
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        self.frame_count = 0;
        self.next_due = None;
        log::info!(
            "FileSource: opened {} (synthetic, {} frames at {} fps)",
            self.config.path,
            self.total_frames,
            self.fps
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, ReadError> {
        if !self.opened || self.frame_count >= self.total_frames {
            return Err(ReadError::EndOfStream);
        }
        if self.realtime {
            if let Some(due) = self.next_due {
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
            }
            self.next_due = Some(Instant::now() + Duration::from_secs_f64(1.0 / self.fps as f64));
        }

        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixels = synthetic_pixels(
            self.config.width,
            self.config.height,
            self.frame_count,
            self.scene_state,
        );
        Frame::from_rgb(self.config.width, self.config.height, pixels, self.frame_count)
            .map_err(|err| ReadError::Failed(err.to_string()))
    }

    fn release(&mut self) {
        self.opened = false;
    }

    fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames as f64 / self.fps as f64)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
