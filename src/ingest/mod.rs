//! Frame ingestion sources.
//!
//! This module provides the sources a monitoring session can read from:
//! - Live devices (`DeviceSource`): V4L2 cameras (feature: ingest-v4l2) or a
//!   synthetic `stub://camera/...` camera
//! - Local video files (`FileSource`): FFmpeg decode (feature: ingest-file-ffmpeg)
//!   or a synthetic `stub://video/...` clip
//! - Scripted sources (`ScriptedSource`) for deterministic tests
//!
//! Devices and files share the `FrameSource` read interface but have opposite
//! failure semantics: a failed device read is retryable (release, back off,
//! reopen), a failed file read means the clip is over. `is_retryable()` carries
//! that distinction so the reconnection logic never inspects concrete types.
//!
//! Sources MUST NOT:
//! - Store frames to disk
//! - Fetch remote URLs
//! - Log pixel content

pub mod device;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod scripted;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::frame::Frame;

pub use device::{DeviceConfig, DeviceSource};
pub use file::{FileConfig, FileSource};
pub use scripted::{ScriptProbe, ScriptStep, ScriptedSource};

pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Live camera; failures are retryable.
    Device,
    /// Finite recording; a failed read is end-of-stream.
    File,
}

/// Outcome of a failed `FrameSource::read`.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("end of stream")]
    EndOfStream,
    #[error("{0}")]
    Failed(String),
}

pub trait FrameSource: Send {
    /// Human-readable identity for logs and errors.
    fn describe(&self) -> String;

    fn kind(&self) -> SourceKind;

    /// True when a failed read should trigger a reconnect rather than end the session.
    fn is_retryable(&self) -> bool {
        self.kind() == SourceKind::Device
    }

    /// Acquire the underlying handle. Errors here mean the source is unreadable.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame. Blocking is allowed; a live camera paces the caller.
    fn read(&mut self) -> Result<Frame, ReadError>;

    /// Drop the underlying handle. Idempotent.
    fn release(&mut self);

    fn reopen(&mut self) -> Result<()> {
        self.release();
        self.open()
    }

    /// Length of a finite recording, when the container reports it.
    fn reported_duration(&self) -> Option<Duration> {
        None
    }

    /// Native frame rate, when known.
    fn native_fps(&self) -> Option<u32> {
        None
    }
}

/// Where a session's frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    /// Device path (`/dev/video0`) or synthetic camera (`stub://camera/...`).
    Device(String),
    /// Local file path or synthetic clip (`stub://video/...`).
    File(String),
}

impl MediaSource {
    /// Parse a media source string.
    ///
    /// A bare integer is a camera index, `/dev/video*` and `stub://camera/*` are
    /// devices, `stub://video/*` and plain paths are files. Network URLs are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(anyhow!("media source must not be empty"));
        }
        if let Ok(index) = input.parse::<u32>() {
            return Ok(Self::Device(format!("/dev/video{}", index)));
        }
        if input.starts_with("/dev/video") || input.starts_with("stub://camera") {
            return Ok(Self::Device(input.to_string()));
        }
        if input.starts_with("stub://video") {
            return Ok(Self::File(input.to_string()));
        }
        if input.starts_with("stub://") {
            return Err(anyhow!(
                "unknown synthetic source '{}' (expected stub://camera/... or stub://video/...)",
                input
            ));
        }
        if input.contains("://") {
            return Err(anyhow!(
                "media source '{}' is a URL; only local devices and files are supported",
                input
            ));
        }
        Ok(Self::File(input.to_string()))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            MediaSource::Device(_) => SourceKind::Device,
            MediaSource::File(_) => SourceKind::File,
        }
    }
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Device(device) => write!(f, "device {}", device),
            MediaSource::File(path) => write!(f, "file {}", path),
        }
    }
}

/// Construct (but do not open) the source for `media`.
pub fn build_source(media: &MediaSource, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    match media {
        MediaSource::Device(device) => Ok(Box::new(DeviceSource::new(DeviceConfig {
            device: device.clone(),
            width,
            height,
            ..DeviceConfig::default()
        })?)),
        MediaSource::File(path) => Ok(Box::new(FileSource::new(FileConfig {
            path: path.clone(),
            width,
            height,
        })?)),
    }
}

/// Split `stub://<kind>/<name>?k=v&...` into its name and query parameters.
pub(crate) fn parse_stub_params(uri: &str) -> (String, HashMap<String, String>) {
    let rest = uri.strip_prefix("stub://").unwrap_or(uri);
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, query),
        None => (rest, ""),
    };
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    (path.to_string(), params)
}

pub(crate) fn stub_param<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>> {
    match params.get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("invalid value '{}' for stub parameter '{}'", raw, key)),
        None => Ok(None),
    }
}

/// Gradient test pattern that shifts with the frame index.
pub(crate) fn synthetic_pixels(width: u32, height: u32, index: u64, scene: u8) -> Vec<u8> {
    let pixel_count = (width as usize) * (height as usize) * 3;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + index + scene as u64) % 256) as u8;
    }
    pixels
}
