//! Violation classification and overlay rendering.
//!
//! The classifier filters detector output down to a configured, closed set of
//! violation labels. It renders two independent overlays from the same frame:
//! the general detection overlay (every box, with confidence) and the
//! violation-only overlay (red box, filled label bar, label text). Each overlay
//! is drawn on its own private copy; the captured frame is never touched.

use image::Rgb;

use crate::annotate::{draw_label, draw_rectangle, fill_rect, text_width, GLYPH_HEIGHT};
use crate::detect::Detection;
use crate::frame::Frame;

pub const DEFAULT_VIOLATION_LABELS: [&str; 3] = ["NO-Mask", "NO-Hardhat", "NO-Safety Vest"];

const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const VIOLATION_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const VIOLATION_STROKE: i32 = 3;
const VIOLATION_BAR_HEIGHT: i32 = 25;
const VIOLATION_BAR_MIN_WIDTH: i32 = 150;
const DETECTION_STROKE: i32 = 2;

/// Palette for the general detection overlay, picked per label.
const DETECTION_PALETTE: [Rgb<u8>; 6] = [
    Rgb([56, 189, 248]),
    Rgb([34, 197, 94]),
    Rgb([250, 204, 21]),
    Rgb([249, 115, 22]),
    Rgb([168, 85, 247]),
    Rgb([236, 72, 153]),
];

#[derive(Clone, Debug)]
pub struct ViolationClassifier {
    labels: Vec<String>,
}

impl ViolationClassifier {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels.into_iter().map(Into::into) {
            if !unique.contains(&label) {
                unique.push(label);
            }
        }
        Self { labels: unique }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Exact, case-sensitive membership test against the configured set.
    pub fn is_violation(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Detections whose label is a configured violation, in detector order.
    pub fn violations<'a>(&self, detections: &'a [Detection]) -> Vec<&'a Detection> {
        detections
            .iter()
            .filter(|d| self.is_violation(&d.label))
            .collect()
    }

    /// Every detection drawn with label and confidence.
    pub fn render_detections(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut canvas = frame.to_image();
        for detection in detections {
            let color = palette_color(&detection.label);
            let (x1, y1, x2, y2) = detection.bbox.corners_within(frame.width(), frame.height());
            draw_rectangle(&mut canvas, x1, y1, x2, y2, DETECTION_STROKE, color);

            let caption = format!("{} {:.2}", detection.label, detection.confidence);
            let bar_top = label_bar_top(y1, GLYPH_HEIGHT + 4);
            fill_rect(
                &mut canvas,
                x1,
                bar_top,
                x1.saturating_add(text_width(&caption) + 4),
                bar_top.saturating_add(GLYPH_HEIGHT + 3),
                color,
            );
            draw_label(
                &mut canvas,
                x1.saturating_add(2),
                bar_top.saturating_add(2),
                &caption,
                VIOLATION_TEXT,
            );
        }
        frame.derive(canvas)
    }

    /// Violations drawn as red boxes with a label bar, no confidence.
    pub fn render_violations(&self, frame: &Frame, violations: &[&Detection]) -> Frame {
        let mut canvas = frame.to_image();
        for violation in violations {
            let (x1, y1, x2, y2) = violation.bbox.corners_within(frame.width(), frame.height());
            draw_rectangle(
                &mut canvas,
                x1,
                y1,
                x2,
                y2,
                VIOLATION_STROKE,
                VIOLATION_COLOR,
            );

            let bar_top = label_bar_top(y1, VIOLATION_BAR_HEIGHT);
            let bar_width = VIOLATION_BAR_MIN_WIDTH.max(text_width(&violation.label) + 10);
            fill_rect(
                &mut canvas,
                x1,
                bar_top,
                x1.saturating_add(bar_width),
                bar_top.saturating_add(VIOLATION_BAR_HEIGHT - 1),
                VIOLATION_COLOR,
            );
            let text_top = bar_top.saturating_add((VIOLATION_BAR_HEIGHT - GLYPH_HEIGHT) / 2);
            draw_label(
                &mut canvas,
                x1.saturating_add(5),
                text_top,
                &violation.label,
                VIOLATION_TEXT,
            );
        }
        frame.derive(canvas)
    }
}

impl Default for ViolationClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_VIOLATION_LABELS)
    }
}

/// Bars sit above the box; when the box touches the top edge they move inside it.
fn label_bar_top(box_top: i32, bar_height: i32) -> i32 {
    if box_top >= bar_height {
        box_top - bar_height
    } else {
        box_top
    }
}

fn palette_color(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    DETECTION_PALETTE[hash % DETECTION_PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn detection(label: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(label, 0.8, BoundingBox::new(x1, y1, x2, y2).unwrap()).unwrap()
    }

    #[test]
    fn default_labels_match_ppe_set() {
        let classifier = ViolationClassifier::default();
        assert!(classifier.is_violation("NO-Mask"));
        assert!(classifier.is_violation("NO-Hardhat"));
        assert!(classifier.is_violation("NO-Safety Vest"));
        assert!(!classifier.is_violation("Hardhat"));
        assert!(!classifier.is_violation("no-mask"));
    }

    #[test]
    fn violations_filters_and_keeps_order() {
        let classifier = ViolationClassifier::new(["NO-Mask", "NO-Hardhat", "NO-Mask"]);
        assert_eq!(classifier.labels().len(), 2);

        let detections = vec![
            detection("Person", 0.0, 0.0, 10.0, 10.0),
            detection("NO-Hardhat", 0.0, 0.0, 10.0, 10.0),
            detection("Mask", 0.0, 0.0, 10.0, 10.0),
            detection("NO-Mask", 0.0, 0.0, 10.0, 10.0),
        ];
        let labels: Vec<&str> = classifier
            .violations(&detections)
            .iter()
            .map(|d| d.label.as_str())
            .collect();
        assert_eq!(labels, vec!["NO-Hardhat", "NO-Mask"]);
    }

    #[test]
    fn overlays_are_independent_of_the_source_frame() {
        let classifier = ViolationClassifier::default();
        let frame = Frame::filled(320, 240, [0, 0, 0], 4);
        let detections = vec![
            detection("NO-Mask", 40.0, 60.0, 120.0, 200.0),
            detection("Person", 200.0, 40.0, 300.0, 220.0),
        ];
        let violations = classifier.violations(&detections);

        let general = classifier.render_detections(&frame, &detections);
        let isolated = classifier.render_violations(&frame, &violations);

        assert_eq!(general.index(), 4);
        assert_eq!(isolated.index(), 4);
        assert!(!general.shares_pixels_with(&frame));
        assert!(!isolated.shares_pixels_with(&frame));
        assert!(frame.pixels().iter().all(|&p| p == 0));

        // The violation overlay carries the red box but not the non-violation one.
        assert_eq!(*isolated.image().get_pixel(40, 100), VIOLATION_COLOR);
        assert_eq!(*isolated.image().get_pixel(200, 100), Rgb([0, 0, 0]));
        // The general overlay draws both.
        assert_ne!(*general.image().get_pixel(200, 100), Rgb([0, 0, 0]));
        // Label bar sits above the violation box.
        assert_eq!(*isolated.image().get_pixel(41, 36), VIOLATION_COLOR);
    }

    #[test]
    fn far_off_canvas_boxes_draw_nothing() {
        let classifier = ViolationClassifier::default();
        let frame = Frame::filled(64, 64, [0, 0, 0], 0);
        let detections = vec![
            detection("NO-Mask", 3.0e9, 0.0, 4.0e9, 10.0),
            detection("NO-Hardhat", -4.0e9, -4.0e9, -3.0e9, -3.0e9),
        ];
        let violations = classifier.violations(&detections);

        let general = classifier.render_detections(&frame, &detections);
        let isolated = classifier.render_violations(&frame, &violations);

        assert!(general.pixels().iter().all(|&p| p == 0));
        assert!(isolated.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn box_spilling_far_left_still_draws_its_visible_edge() {
        let classifier = ViolationClassifier::default();
        let frame = Frame::filled(64, 64, [0, 0, 0], 0);
        let detections = vec![detection("NO-Vest", -4.0e9, 10.0, 30.0, 40.0)];
        let classifier_with_vest = ViolationClassifier::new(["NO-Vest"]);
        let violations = classifier_with_vest.violations(&detections);

        let isolated = classifier_with_vest.render_violations(&frame, &violations);
        assert_eq!(*isolated.image().get_pixel(30, 20), VIOLATION_COLOR);
        assert_eq!(*isolated.image().get_pixel(10, 20), Rgb([0, 0, 0]));

        let general = classifier.render_detections(&frame, &detections);
        assert_ne!(*general.image().get_pixel(30, 20), Rgb([0, 0, 0]));
    }
}
