use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::models::{LineSet, Segment};

/// Opacity of the line overlay.
const OVERLAY_ALPHA: f32 = 0.7;
const ROI_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Stroke width scaled to the image width, at least 2px.
pub fn line_thickness(width: u32) -> u32 {
    (width / 300).max(2)
}

fn draw_thick_segment(canvas: &mut RgbImage, segment: &Segment, thickness: u32, color: Rgb<u8>) {
    let radius = (thickness / 2).max(1) as i32;
    for pair in segment.points().windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let steps = a.distance(&b).ceil().max(1.0) as i32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let x = a.x as f32 + t * (b.x - a.x) as f32;
            let y = a.y as f32 + t * (b.y - a.y) as f32;
            draw_filled_circle_mut(canvas, (x.round() as i32, y.round() as i32), radius, color);
        }
    }
}

/// Draw the detected lines over `clean` with a translucent overlay, plus the ROI outline.
pub fn render_annotated(clean: &RgbImage, lines: &LineSet, roi: Option<&[[f32; 2]; 4]>) -> RgbImage {
    let thickness = line_thickness(clean.width());
    let mut overlay = clean.clone();
    for line in lines.iter() {
        let color = Rgb(line.kind.color());
        for segment in &line.segments {
            draw_thick_segment(&mut overlay, segment, thickness, color);
        }
    }

    let mut out = RgbImage::new(clean.width(), clean.height());
    for ((dst, o), c) in out.pixels_mut().zip(overlay.pixels()).zip(clean.pixels()) {
        for ch in 0..3 {
            let v = OVERLAY_ALPHA * o[ch] as f32 + (1.0 - OVERLAY_ALPHA) * c[ch] as f32;
            dst[ch] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    if let Some(corners) = roi {
        for i in 0..corners.len() {
            let [x1, y1] = corners[i];
            let [x2, y2] = corners[(i + 1) % corners.len()];
            draw_line_segment_mut(&mut out, (x1, y1), (x2, y2), ROI_COLOR);
        }
    }
    out
}
