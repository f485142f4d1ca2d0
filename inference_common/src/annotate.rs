//! Frame overlays: detection boxes, the operator zone and the alert marker.
//!
//! Drawing is a display side effect only; nothing here feeds back into
//! detection or state decisions.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::rect::Rect;

use crate::bbox::Point;
use crate::detection::Detection;

pub const DETECTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const ZONE_POINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ZONE_EDGE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const ZONE_POINT_RADIUS: i32 = 5;
const LABEL_SCALE: f32 = 18.0;
const ALERT_SCALE: f32 = 40.0;
const ALERT_TEXT: &str = "!!!ALERT!!!";
const ALERT_BORDER: u32 = 6;
/// Zone vertices further out than this are not drawn; imageproc's integer
/// math overflows near the ends of the `i32` range.
const DRAWABLE_LIMIT: i32 = 1 << 15;

/// Draws overlays onto frames. Text needs a font; without one only
/// geometry is drawn.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Loads a TTF/OTF font from disk for labels and the alert banner.
    pub fn with_font_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {path:?}"))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("Invalid font {path:?}: {e}"))?;
        log::info!("Loaded label font from {path:?}");
        Ok(Self { font: Some(font) })
    }

    /// Red 2px box per detection, with a `label: confidence` caption above it
    /// when the class is known.
    pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (width, height) = image.dimensions();
        for det in detections {
            let (x1, y1, x2, y2) = det.bbox.clamp_to(width, height).to_pixels();
            draw_box(image, x1, y1, x2, y2, DETECTION_COLOR);

            if let (Some(font), Some(caption)) = (&self.font, det.caption()) {
                draw_text_mut(
                    image,
                    DETECTION_COLOR,
                    x1,
                    y1 - LABEL_SCALE as i32 - 2,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &caption,
                );
            }
        }
    }

    /// Green dot per zone vertex; the closed outline once all vertices exist.
    pub fn draw_zone(&self, image: &mut RgbImage, points: &[Point], complete: bool) {
        for p in points.iter().filter(|p| drawable(p)) {
            draw_filled_circle_mut(image, (p.x, p.y), ZONE_POINT_RADIUS, ZONE_POINT_COLOR);
        }

        if !complete || points.len() < 2 {
            return;
        }
        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            if !drawable(a) || !drawable(&b) {
                continue;
            }
            // two passes, one pixel apart, for a 2px edge
            for offset in [0.0, 1.0] {
                draw_line_segment_mut(
                    image,
                    (a.x as f32 + offset, a.y as f32),
                    (b.x as f32 + offset, b.y as f32),
                    ZONE_EDGE_COLOR,
                );
                draw_line_segment_mut(
                    image,
                    (a.x as f32, a.y as f32 + offset),
                    (b.x as f32, b.y as f32 + offset),
                    ZONE_EDGE_COLOR,
                );
            }
        }
    }

    /// Fixed visual marker for the alerted state.
    pub fn draw_alert_marker(&self, image: &mut RgbImage) {
        let (w, h) = image.dimensions();
        let border = ALERT_BORDER.min(w / 2).min(h / 2);
        if border > 0 {
            draw_filled_rect_mut(image, Rect::at(0, 0).of_size(w, border), ALERT_COLOR);
            draw_filled_rect_mut(image, Rect::at(0, (h - border) as i32).of_size(w, border), ALERT_COLOR);
            draw_filled_rect_mut(image, Rect::at(0, 0).of_size(border, h), ALERT_COLOR);
            draw_filled_rect_mut(image, Rect::at((w - border) as i32, 0).of_size(border, h), ALERT_COLOR);
        }

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                ALERT_COLOR,
                50,
                50 - ALERT_SCALE as i32,
                PxScale::from(ALERT_SCALE),
                font,
                ALERT_TEXT,
            );
        }
    }
}

fn drawable(p: &Point) -> bool {
    (-DRAWABLE_LIMIT..=DRAWABLE_LIMIT).contains(&p.x)
        && (-DRAWABLE_LIMIT..=DRAWABLE_LIMIT).contains(&p.y)
}

fn draw_box(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    for inset in 0..2 {
        let w = x2 - x1 - 2 * inset;
        let h = y2 - y1 - 2 * inset;
        if w < 1 || h < 1 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;

    fn detection(bbox: Bbox) -> Detection {
        Detection {
            center: bbox.center(),
            bbox,
            confidence: 0.9,
            label: Some("car".into()),
        }
    }

    #[test]
    fn test_draw_detection_box_edges() {
        let mut image = RgbImage::new(100, 100);
        let annotator = Annotator::default();
        annotator.draw_detections(&mut image, &[detection(Bbox::new(10.0, 10.0, 50.0, 50.0))]);

        assert_eq!(*image.get_pixel(10, 30), DETECTION_COLOR);
        assert_eq!(*image.get_pixel(11, 30), DETECTION_COLOR);
        // interior untouched
        assert_eq!(*image.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_box_does_not_panic() {
        let mut image = RgbImage::new(20, 20);
        let annotator = Annotator::default();
        annotator.draw_detections(&mut image, &[detection(Bbox::new(5.0, 5.0, 5.0, 5.0))]);
    }

    #[test]
    fn test_zone_outline_only_when_complete() {
        let points = [
            Point::new(10, 10),
            Point::new(80, 10),
            Point::new(80, 80),
            Point::new(10, 80),
        ];
        let annotator = Annotator::default();

        let mut partial = RgbImage::new(100, 100);
        annotator.draw_zone(&mut partial, &points[..3], false);
        assert_eq!(*partial.get_pixel(10, 10), ZONE_POINT_COLOR);
        assert_eq!(*partial.get_pixel(45, 10), Rgb([0, 0, 0]));

        let mut full = RgbImage::new(100, 100);
        annotator.draw_zone(&mut full, &points, true);
        assert_eq!(*full.get_pixel(45, 10), ZONE_EDGE_COLOR);
        assert_eq!(*full.get_pixel(10, 45), ZONE_EDGE_COLOR);
    }

    #[test]
    fn test_extreme_zone_points_do_not_panic() {
        let annotator = Annotator::default();
        let mut image = RgbImage::new(64, 48);
        annotator.draw_zone(&mut image, &[Point::new(i32::MAX, i32::MAX)], false);

        let corners = [
            Point::new(i32::MIN, i32::MIN),
            Point::new(i32::MAX, i32::MIN),
            Point::new(i32::MAX, i32::MAX),
            Point::new(10, 10),
        ];
        annotator.draw_zone(&mut image, &corners, true);
        assert_eq!(*image.get_pixel(10, 10), ZONE_POINT_COLOR);
    }

    #[test]
    fn test_extreme_detection_box_clamped() {
        let mut image = RgbImage::new(40, 40);
        let annotator = Annotator::default();
        annotator.draw_detections(&mut image, &[detection(Bbox::new(-3e9, -3e9, 3e9, 3e9))]);
        assert_eq!(*image.get_pixel(0, 20), DETECTION_COLOR);
    }

    #[test]
    fn test_alert_marker_border() {
        let mut image = RgbImage::new(64, 48);
        Annotator::default().draw_alert_marker(&mut image);
        assert_eq!(*image.get_pixel(0, 0), ALERT_COLOR);
        assert_eq!(*image.get_pixel(63, 47), ALERT_COLOR);
        assert_eq!(*image.get_pixel(32, 24), Rgb([0, 0, 0]));
    }
}
