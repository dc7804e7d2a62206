//! FFmpeg decode backend for `FileSource`.
//!
//! Frames are scaled to RGB24 at the file's native resolution. Once the
//! demuxer runs out of packets the decoder is drained, after which every read
//! reports end-of-stream.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::file::FileConfig;
use super::ReadError;
use crate::frame::Frame;

/// FFmpeg reports container duration in AV_TIME_BASE units (microseconds).
const AV_TIME_BASE: f64 = 1_000_000.0;

pub(crate) struct FfmpegFile {
    config: FileConfig,
    state: Option<DecodeState>,
    duration: Option<Duration>,
    native_fps: Option<u32>,
    frame_count: u64,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    draining: bool,
}

impl FfmpegFile {
    pub(crate) fn new(config: FileConfig) -> Self {
        Self {
            config,
            state: None,
            duration: None,
            native_fps: None,
            frame_count: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.config.path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", self.config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("'{}' has no video track", self.config.path))?;
        let stream_index = input_stream.index();

        let rate = input_stream.avg_frame_rate();
        self.native_fps = (rate.denominator() != 0 && rate.numerator() > 0)
            .then(|| (f64::from(rate)).round() as u32);
        self.duration = (input.duration() > 0)
            .then(|| Duration::from_secs_f64(input.duration() as f64 / AV_TIME_BASE));

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        self.state = Some(DecodeState {
            input,
            stream_index,
            decoder,
            scaler,
            draining: false,
        });
        log::info!(
            "FileSource: opened {} (ffmpeg, {:?} fps, {:?})",
            self.config.path,
            self.native_fps,
            self.duration
        );
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<Frame, ReadError> {
        let state = self.state.as_mut().ok_or(ReadError::EndOfStream)?;
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                state
                    .scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|err| ReadError::Failed(format!("scale frame to RGB: {}", err)))?;
                let (pixels, width, height) =
                    frame_to_pixels(&rgb).map_err(|err| ReadError::Failed(err.to_string()))?;
                self.frame_count += 1;
                return Frame::from_rgb(width, height, pixels, self.frame_count)
                    .map_err(|err| ReadError::Failed(err.to_string()));
            }
            if state.draining {
                return Err(ReadError::EndOfStream);
            }

            let stream_index = state.stream_index;
            let next_packet = state
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match next_packet {
                Some(packet) => state
                    .decoder
                    .send_packet(&packet)
                    .map_err(|err| ReadError::Failed(format!("decode packet: {}", err)))?,
                None => {
                    state.draining = true;
                    // A failed flush only loses the buffered tail.
                    if let Err(err) = state.decoder.send_eof() {
                        log::debug!("FileSource: decoder flush failed: {}", err);
                    }
                }
            }
        }
    }

    pub(crate) fn release(&mut self) {
        self.state = None;
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub(crate) fn native_fps(&self) -> Option<u32> {
        self.native_fps
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
