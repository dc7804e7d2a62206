use anyhow::{anyhow, Result};

/// Axis-aligned box in pixel coordinates. Invariant: `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if !(x1 < x2 && y1 < y2) {
            return Err(anyhow!(
                "degenerate box ({}, {}, {}, {}): expected x1 < x2 and y1 < y2",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Integer corners for a `width` x `height` canvas, floored and clamped
    /// to at most `CANVAS_MARGIN` pixels outside it.
    pub fn corners_within(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        (
            clamp_axis(self.x1, width),
            clamp_axis(self.y1, height),
            clamp_axis(self.x2, width),
            clamp_axis(self.y2, height),
        )
    }
}

/// How far off-canvas a corner may sit once converted to pixels. Wide enough
/// that label bars attached to an off-canvas box stay off-canvas.
pub const CANVAS_MARGIN: i32 = 1 << 16;

fn clamp_axis(value: f32, extent: u32) -> i32 {
    let low = -CANVAS_MARGIN as f32;
    let high = extent.min(i32::MAX as u32 / 2) as f32 + CANVAS_MARGIN as f32;
    value.floor().clamp(low, high) as i32
}

/// One labelled box returned by a detector.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!("confidence {} outside [0, 1]", confidence));
        }
        Ok(Self {
            label: label.into(),
            confidence,
            bbox,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_boxes_are_rejected() {
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 20.0).is_err());
        assert!(BoundingBox::new(10.0, 30.0, 20.0, 20.0).is_err());
        let bbox = BoundingBox::new(1.6, 2.2, 9.9, 8.0).unwrap();
        assert_eq!(bbox.corners_within(640, 480), (1, 2, 9, 8));
    }

    #[test]
    fn far_off_canvas_corners_are_clamped() {
        let bbox = BoundingBox::new(3.0e9, -4.0e9, 4.0e9, 10.0).unwrap();
        let (x1, y1, x2, y2) = bbox.corners_within(64, 48);
        assert_eq!(x1, 64 + CANVAS_MARGIN);
        assert_eq!(x2, 64 + CANVAS_MARGIN);
        assert_eq!(y1, -CANVAS_MARGIN);
        assert_eq!(y2, 10);
    }

    #[test]
    fn confidence_must_be_a_probability() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(Detection::new("NO-Mask", 1.2, bbox).is_err());
        assert!(Detection::new("NO-Mask", -0.1, bbox).is_err());
        assert!(Detection::new("NO-Mask", 0.4, bbox).is_ok());
    }
}
