//! Frame ownership layer.
//!
//! - `Frame`: immutable RGB pixel buffer produced by a `FrameSource`.
//! - Overlays derived from a frame are new `Frame`s; the source frame is never
//!   written to after capture.
//!
//! Frames are cheap to clone (the pixel buffer is shared behind an `Arc`) and
//! expose no mutable access, so handing a clone to an event consumer cannot
//! disturb the capture loop or any other consumer.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::Arc;

/// Channel layout of frame pixels. Sources normalise to packed RGB before handoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
}

impl PixelLayout {
    pub fn channels(self) -> u32 {
        match self {
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// Immutable captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    /// Position of this frame in its source (1-based).
    index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self {
            image: Arc::new(image),
            index,
        }
    }

    /// Build a frame from packed RGB bytes, validating the buffer length.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid {}x{} RGB buffer", width, height))?;
        Ok(Self::new(image, index))
    }

    /// Solid-colour frame, mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Self {
        Self::new(RgbImage::from_pixel(width, height, image::Rgb(rgb)), index)
    }

    /// A new frame sharing this frame's index, e.g. an annotated overlay.
    pub fn derive(&self, image: RgbImage) -> Self {
        Self::new(image, self.index)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn layout(&self) -> PixelLayout {
        PixelLayout::Rgb8
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Private, writable copy of the pixels for drawing overlays.
    pub fn to_image(&self) -> RgbImage {
        self.image.as_ref().clone()
    }

    /// True when both handles point at the same pixel buffer.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}
