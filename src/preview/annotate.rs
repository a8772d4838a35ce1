//! Box and label drawing on RGB24 buffers.
//!
//! Cosmetic only; nothing here affects the wire protocol.

use serde::Deserialize;

use crate::detect::{Detection, DetectionSet};
use crate::frame::{Frame, RGB_CHANNELS};
use crate::preview::font::{glyph, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};

const LABEL_BACKGROUND: [u8; 3] = [0, 0, 0];

/// Where a label sits relative to its box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPosition {
    TopLeft,
    TopCenter,
    BottomLeft,
    #[default]
    BottomCenter,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    pub box_thickness: u32,
    pub label_position: LabelPosition,
    /// Integer glyph magnification.
    pub label_scale: u32,
    pub color: [u8; 3],
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_thickness: 2,
            label_position: LabelPosition::BottomCenter,
            label_scale: 2,
            color: [0, 255, 0],
        }
    }
}

/// Draw every detection onto a copy of the frame's pixels.
pub fn annotate(frame: &Frame, detections: &DetectionSet, style: &AnnotationStyle) -> Vec<u8> {
    let mut canvas = Canvas {
        pixels: frame.pixels().to_vec(),
        width: frame.width as i64,
        height: frame.height as i64,
    };
    for detection in detections {
        canvas.draw_box(detection, style);
    }
    for detection in detections {
        canvas.draw_label(detection, style);
    }
    canvas.pixels
}

/// Label text for a detection: class name and rounded confidence.
///
/// Characters without a glyph render as blank cells.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} {:.0}%",
        detection.class_name(),
        detection.confidence() * 100.0
    )
}

struct Canvas {
    pixels: Vec<u8>,
    width: i64,
    height: i64,
}

impl Canvas {
    fn put(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.width + x) as usize * RGB_CHANNELS;
        self.pixels[offset..offset + RGB_CHANNELS].copy_from_slice(&color);
    }

    fn fill(&mut self, left: i64, top: i64, right: i64, bottom: i64, color: [u8; 3]) {
        for y in top.max(0)..=bottom.min(self.height - 1) {
            for x in left.max(0)..=right.min(self.width - 1) {
                self.put(x, y, color);
            }
        }
    }

    fn draw_box(&mut self, detection: &Detection, style: &AnnotationStyle) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let [x1, y1, x2, y2] = detection.bounding_box();
        let left = (x1.round() as i64).clamp(0, self.width - 1);
        let top = (y1.round() as i64).clamp(0, self.height - 1);
        let right = (x2.round() as i64).clamp(0, self.width - 1);
        let bottom = (y2.round() as i64).clamp(0, self.height - 1);
        let t = i64::from(style.box_thickness.max(1)) - 1;

        self.fill(left, top, right, (top + t).min(bottom), style.color);
        self.fill(left, (bottom - t).max(top), right, bottom, style.color);
        self.fill(left, top, (left + t).min(right), bottom, style.color);
        self.fill((right - t).max(left), top, right, bottom, style.color);
    }

    fn draw_label(&mut self, detection: &Detection, style: &AnnotationStyle) {
        let text = label_text(detection);
        let scale = i64::from(style.label_scale.max(1));
        let pad = scale;
        let text_width = text.chars().count() as i64 * GLYPH_ADVANCE * scale;
        let text_height = GLYPH_HEIGHT * scale;

        let [x1, y1, x2, y2] = detection.bounding_box();
        let (x1, y1, x2, y2) = (x1.round() as i64, y1.round() as i64, x2.round() as i64, y2.round() as i64);
        let x = match style.label_position {
            LabelPosition::TopLeft | LabelPosition::BottomLeft => x1,
            LabelPosition::TopCenter | LabelPosition::BottomCenter => (x1 + x2) / 2 - text_width / 2,
        };
        let y = match style.label_position {
            LabelPosition::TopLeft | LabelPosition::TopCenter => y1 - text_height - 2 * pad,
            LabelPosition::BottomLeft | LabelPosition::BottomCenter => y2 + 1,
        };
        // Keep the label on-screen when the box hugs an edge.
        let x = x.clamp(0, (self.width - text_width - 2 * pad).max(0));
        let y = y.clamp(0, (self.height - text_height - 2 * pad).max(0));

        self.fill(
            x,
            y,
            x + text_width + 2 * pad - 1,
            y + text_height + 2 * pad - 1,
            LABEL_BACKGROUND,
        );
        let mut cursor = x + pad;
        for ch in text.chars() {
            if let Some(rows) = glyph(ch) {
                for (row, pattern) in rows.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                            let px = cursor + col * scale;
                            let py = y + pad + row as i64 * scale;
                            self.fill(px, py, px + scale - 1, py + scale - 1, style.color);
                        }
                    }
                }
            }
            cursor += GLYPH_ADVANCE * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![255u8; (width * height * 3) as usize], width, height, 0).unwrap()
    }

    fn pixel(buf: &[u8], width: u32, x: u32, y: u32) -> [u8; 3] {
        let o = ((y * width + x) * 3) as usize;
        [buf[o], buf[o + 1], buf[o + 2]]
    }

    #[test]
    fn empty_set_leaves_frame_untouched() {
        let frame = blank(16, 16);
        let out = annotate(&frame, &DetectionSet::new(), &AnnotationStyle::default());
        assert_eq!(out, frame.pixels());
    }

    #[test]
    fn box_edges_use_configured_thickness() {
        let frame = blank(100, 100);
        let detections: DetectionSet =
            vec![Detection::new([10.0, 10.0, 60.0, 40.0], 0.5, 1, "card").unwrap()].into();
        let style = AnnotationStyle {
            box_thickness: 3,
            label_position: LabelPosition::BottomLeft,
            ..AnnotationStyle::default()
        };
        let out = annotate(&frame, &detections, &style);

        assert_eq!(pixel(&out, 100, 30, 10), [0, 255, 0]);
        assert_eq!(pixel(&out, 100, 30, 12), [0, 255, 0]);
        assert_eq!(pixel(&out, 100, 30, 13), [255, 255, 255]);
        assert_eq!(pixel(&out, 100, 60, 25), [0, 255, 0]);
        assert_eq!(pixel(&out, 100, 35, 25), [255, 255, 255]);
    }

    #[test]
    fn bottom_center_label_sits_below_box() {
        let frame = blank(200, 200);
        let detections: DetectionSet =
            vec![Detection::new([50.0, 20.0, 150.0, 80.0], 0.87, 3, "queen").unwrap()].into();
        let out = annotate(&frame, &detections, &AnnotationStyle::default());

        // Label background starts directly under the bottom edge.
        assert_eq!(pixel(&out, 200, 100, 81), LABEL_BACKGROUND);
        assert_eq!(pixel(&out, 200, 100, 10), [255, 255, 255]);
    }

    #[test]
    fn boxes_outside_frame_are_clamped() {
        let frame = blank(8, 8);
        let detections: DetectionSet =
            vec![Detection::new([-20.0, -20.0, 500.0, 500.0], 1.0, 0, "big").unwrap()].into();
        let out = annotate(&frame, &detections, &AnnotationStyle::default());
        assert_eq!(out.len(), frame.byte_len());
    }

    #[test]
    fn label_text_uses_drawable_glyphs() {
        let d = Detection::new([0.0, 0.0, 1.0, 1.0], 0.87, 3, "queen_of_hearts").unwrap();
        let text = label_text(&d);
        assert_eq!(text, "queen_of_hearts 87%");
        assert!(text.chars().all(|c| glyph(c).is_some()));
    }

    #[test]
    fn label_pixels_depend_on_class_name() {
        let frame = blank(200, 120);
        let style = AnnotationStyle {
            label_position: LabelPosition::BottomLeft,
            ..AnnotationStyle::default()
        };
        let render = |name: &str| {
            let detections: DetectionSet =
                vec![Detection::new([10.0, 10.0, 60.0, 40.0], 0.87, 3, name).unwrap()].into();
            annotate(&frame, &detections, &style)
        };

        // Same id and confidence; only the drawn name differs.
        assert_ne!(render("queen_of_hearts"), render("king_of_clubs"));
        assert_eq!(render("Queen.v2"), render("Queen.v2"));
    }
}
