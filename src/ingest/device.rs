//! Live camera source.
//!
//! `DeviceSource` reads from a local V4L2 device (feature `ingest-v4l2`) or a
//! synthetic `stub://camera/<name>?fps=N` camera used for demos and tests.
//! Both block in `read()` at roughly the camera's native rate. Read failures are
//! surfaced as `ReadError::Failed` and are always retryable.

use anyhow::{anyhow, Result};
use std::thread;
use std::time::{Duration, Instant};

use super::{
    parse_stub_params, stub_param, synthetic_pixels, FrameSource, ReadError, SourceKind,
    DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH,
};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Capture;
use crate::frame::Frame;

pub const DEFAULT_CAMERA_FPS: u32 = 30;

/// Configuration for a device source.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Device path (e.g., "/dev/video0") or `stub://camera/<name>`.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Native capture rate requested from the device.
    pub fps: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            fps: DEFAULT_CAMERA_FPS,
        }
    }
}

pub struct DeviceSource {
    device: String,
    fps: u32,
    backend: DeviceBackend,
}

enum DeviceBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Capture),
}

impl DeviceSource {
    pub fn new(mut config: DeviceConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            let (_, params) = parse_stub_params(&config.device);
            if let Some(fps) = stub_param::<u32>(&params, "fps")? {
                config.fps = fps;
            }
            if config.fps == 0 {
                return Err(anyhow!("synthetic camera fps must be greater than zero"));
            }
            return Ok(Self {
                device: config.device.clone(),
                fps: config.fps,
                backend: DeviceBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }

        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                device: config.device.clone(),
                fps: config.fps,
                backend: DeviceBackend::V4l2(V4l2Capture::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "device capture of {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }
}

impl FrameSource for DeviceSource {
    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            DeviceBackend::Synthetic(camera) => camera.open(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(capture) => capture.open(),
        }
    }

    fn read(&mut self) -> Result<Frame, ReadError> {
        match &mut self.backend {
            DeviceBackend::Synthetic(camera) => camera.read(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(capture) => capture.read(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            DeviceBackend::Synthetic(camera) => camera.release(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(capture) => capture.release(),
        }
    }

    fn native_fps(&self) -> Option<u32> {
        Some(self.fps)
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://camera/...)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: DeviceConfig,
    frame_interval: Duration,
    frame_count: u64,
    /// Changes every 50 frames so consecutive scenes differ.
    scene_state: u8,
    opened: bool,
    next_due: Option<Instant>,
}

impl SyntheticCamera {
    fn new(config: DeviceConfig) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / config.fps as f64),
            config,
            frame_count: 0,
            scene_state: 0,
            opened: false,
            next_due: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        self.next_due = None;
        log::info!("DeviceSource: opened {} (synthetic)", self.config.device);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, ReadError> {
        if !self.opened {
            return Err(ReadError::Failed(format!(
                "{} is not open",
                self.config.device
            )));
        }
        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.frame_interval);

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
}
