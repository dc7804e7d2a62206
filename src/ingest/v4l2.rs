//! V4L2 capture backend for `DeviceSource`.
//!
//! Frames are requested as RGB3; devices that insist on NV12 or YUYV are
//! converted in-memory. The stream borrows the device handle, so both live in
//! one self-referencing struct that is dropped as a unit on release.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::device::DeviceConfig;
use super::normalize::{to_rgb, PixelFormat};
use super::ReadError;
use crate::frame::Frame;

pub(crate) struct V4l2Capture {
    config: DeviceConfig,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
    format: PixelFormat,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Capture {
    pub(crate) fn new(config: DeviceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "DeviceSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
            format!(
                "unsupported v4l2 pixel format {} on {}",
                format.fourcc, self.config.device
            )
        })?;

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "DeviceSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "DeviceSource: opened {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<Frame, ReadError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| ReadError::Failed(format!("{} is not open", self.config.device)))?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| ReadError::Failed(format!("capture v4l2 frame: {}", err)))?;

        let pixels = to_rgb(&buf, self.active_width, self.active_height, self.format)
            .map_err(|err| ReadError::Failed(err.to_string()))?;
        self.frame_count += 1;
        Frame::from_rgb(self.active_width, self.active_height, pixels, self.frame_count)
            .map_err(|err| ReadError::Failed(err.to_string()))
    }

    pub(crate) fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("DeviceSource: released {}", self.config.device);
        }
    }
}
