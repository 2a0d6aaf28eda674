//! Landmark-derived regions in canonical space: the palm mask used by extraction, and one
//! search template per crease line used by classification.
//!
//! Canonical orientation is wrist at the bottom, fingers up, thumb on the left, so the
//! templates below never need to branch on handedness.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use crate::detection::landmarks::{
    INDEX_MCP, LANDMARK_COUNT, MIDDLE_MCP, PINKY_MCP, RING_MCP, THUMB_CMC, THUMB_MCP, WRIST,
};
use crate::models::{CanonicalPoint, LineKind};

/// Fraction of the palm width trimmed below the knuckle line to keep finger creases out.
const FINGER_TRIM: f32 = 0.08;

/// Rasterize a polygon into a `width` x `height` mask (255 inside).
pub fn fill_polygon(width: u32, height: u32, polygon: &[CanonicalPoint]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    let mut points: Vec<Point<i32>> = Vec::with_capacity(polygon.len());
    for p in polygon {
        let q = Point::new(p.x.round() as i32, p.y.round() as i32);
        if points.last() != Some(&q) {
            points.push(q);
        }
    }
    // draw_polygon_mut rejects closed input
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return mask;
    }

    draw_polygon_mut(&mut mask, &points, Luma([255u8]));
    mask
}

/// Named reference points shared by the palm mask and the templates.
struct PalmFrame {
    wrist: CanonicalPoint,
    thumb_cmc: CanonicalPoint,
    thumb_mcp: CanonicalPoint,
    index: CanonicalPoint,
    middle: CanonicalPoint,
    ring: CanonicalPoint,
    pinky: CanonicalPoint,
    /// Midpoint between the thumb MCP and index MCP
    web: CanonicalPoint,
    center: CanonicalPoint,
    palm_width: f32,
}

impl PalmFrame {
    fn new(lm: &[CanonicalPoint; LANDMARK_COUNT]) -> Self {
        let wrist = lm[WRIST];
        let index = lm[INDEX_MCP];
        let pinky = lm[PINKY_MCP];
        let center = CanonicalPoint::new(
            (wrist.x + index.x + pinky.x) / 3.0,
            (wrist.y + index.y + pinky.y) / 3.0,
        );
        Self {
            wrist,
            thumb_cmc: lm[THUMB_CMC],
            thumb_mcp: lm[THUMB_MCP],
            index,
            middle: lm[MIDDLE_MCP],
            ring: lm[RING_MCP],
            pinky,
            web: lm[THUMB_MCP].midpoint(&index),
            center,
            palm_width: index.distance(&pinky).max(1.0),
        }
    }

    /// `p` moved down (toward the wrist) by `f` palm widths.
    fn below(&self, p: &CanonicalPoint, f: f32) -> CanonicalPoint {
        p.offset(0.0, f * self.palm_width)
    }
}

/// Palm area below the fingers: the only place crease pixels are searched for.
pub fn palm_mask(width: u32, height: u32, lm: &[CanonicalPoint; LANDMARK_COUNT]) -> GrayImage {
    let f = PalmFrame::new(lm);
    let pw = f.palm_width;
    let hypothenar = CanonicalPoint::new(
        f.pinky.x + 0.1 * pw,
        f.wrist.y - 0.15 * (f.wrist.y - f.pinky.y),
    );
    let polygon = [
        f.below(&f.index, FINGER_TRIM),
        f.below(&f.middle, FINGER_TRIM),
        f.below(&f.ring, FINGER_TRIM),
        f.below(&f.pinky, FINGER_TRIM).offset(0.1 * pw, 0.0),
        hypothenar,
        f.wrist,
        f.thumb_cmc.offset(-0.05 * pw, 0.0),
        f.thumb_mcp.offset(-0.05 * pw, 0.0),
        f.web,
    ];
    fill_polygon(width, height, &polygon)
}

/// Search region and expected path for one crease line.
#[derive(Debug, Clone)]
pub struct LineTemplate {
    pub kind: LineKind,
    pub region: Vec<CanonicalPoint>,
    mask: GrayImage,
    /// Anatomical start of the line
    pub axis_start: CanonicalPoint,
    /// Anatomical end of the line
    pub axis_end: CanonicalPoint,
}

impl LineTemplate {
    pub fn new(
        kind: LineKind,
        region: Vec<CanonicalPoint>,
        axis_start: CanonicalPoint,
        axis_end: CanonicalPoint,
        width: u32,
        height: u32,
    ) -> Self {
        let mask = fill_polygon(width, height, &region);
        Self {
            kind,
            region,
            mask,
            axis_start,
            axis_end,
        }
    }

    pub fn contains(&self, p: &CanonicalPoint) -> bool {
        let (x, y) = (p.x.round(), p.y.round());
        if x < 0.0 || y < 0.0 {
            return false;
        }
        let (x, y) = (x as u32, y as u32);
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] > 0
    }

    pub fn axis_length(&self) -> f32 {
        self.axis_start.distance(&self.axis_end).max(1.0)
    }

    /// Unit vector from start to end.
    pub fn axis_direction(&self) -> (f32, f32) {
        let len = self.axis_length();
        (
            (self.axis_end.x - self.axis_start.x) / len,
            (self.axis_end.y - self.axis_start.y) / len,
        )
    }

    /// Signed position of `p` along the axis, 0 at the start.
    pub fn project(&self, p: &CanonicalPoint) -> f32 {
        let (dx, dy) = self.axis_direction();
        (p.x - self.axis_start.x) * dx + (p.y - self.axis_start.y) * dy
    }

    /// Distance from `p` to the axis segment.
    pub fn distance_to_axis(&self, p: &CanonicalPoint) -> f32 {
        let t = (self.project(p) / self.axis_length()).clamp(0.0, 1.0);
        let closest = CanonicalPoint::new(
            self.axis_start.x + t * (self.axis_end.x - self.axis_start.x),
            self.axis_start.y + t * (self.axis_end.y - self.axis_start.y),
        );
        closest.distance(p)
    }
}

/// Build the life, heart and head templates for a crop of `width` x `height`.
pub fn line_templates(
    width: u32,
    height: u32,
    lm: &[CanonicalPoint; LANDMARK_COUNT],
) -> Vec<LineTemplate> {
    let f = PalmFrame::new(lm);
    let pw = f.palm_width;

    // Curves from the thumb-index web around the thumb mount down to the wrist
    let life_inner = f.center.midpoint(&f.wrist).offset(0.1 * pw, 0.0);
    let life = LineTemplate::new(
        LineKind::Life,
        vec![f.wrist, f.thumb_cmc, f.thumb_mcp, f.web, life_inner],
        f.below(&f.web, 0.1),
        f.wrist.offset(0.05 * pw, -0.05 * pw),
        width,
        height,
    );

    // Band right under the knuckles, running from the pinky side toward the index finger
    let heart = LineTemplate::new(
        LineKind::Heart,
        vec![
            f.pinky,
            f.ring,
            f.middle,
            f.index,
            f.below(&f.index, 0.35),
            f.below(&f.pinky, 0.35),
        ],
        f.below(&f.pinky, 0.18),
        f.below(&f.index.midpoint(&f.middle), 0.18),
        width,
        height,
    );

    // Band under the heart line, from the web toward the pinky edge
    let head = LineTemplate::new(
        LineKind::Head,
        vec![
            f.web,
            f.below(&f.index, 0.2),
            f.below(&f.pinky, 0.3),
            f.below(&f.pinky, 0.8),
            f.below(&f.center, 0.15),
        ],
        f.below(&f.web, 0.05),
        f.below(&f.pinky, 0.55),
        width,
        height,
    );

    vec![life, heart, head]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<CanonicalPoint> {
        vec![
            CanonicalPoint::new(2.0, 2.0),
            CanonicalPoint::new(8.0, 2.0),
            CanonicalPoint::new(8.0, 8.0),
            CanonicalPoint::new(2.0, 8.0),
        ]
    }

    #[test]
    fn test_fill_polygon_inside_outside() {
        let mask = fill_polygon(10, 10, &square());
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_fill_polygon_tolerates_closed_and_degenerate_input() {
        let mut closed = square();
        closed.push(closed[0]);
        let mask = fill_polygon(10, 10, &closed);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);

        let line = vec![CanonicalPoint::new(1.0, 1.0), CanonicalPoint::new(5.0, 5.0)];
        let mask = fill_polygon(10, 10, &line);
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_template_projection() {
        let t = LineTemplate::new(
            LineKind::Heart,
            square(),
            CanonicalPoint::new(8.0, 5.0),
            CanonicalPoint::new(2.0, 5.0),
            10,
            10,
        );
        assert!(t.contains(&CanonicalPoint::new(5.0, 5.0)));
        assert!((t.project(&CanonicalPoint::new(2.0, 5.0)) - 6.0).abs() < 1e-5);
        assert!((t.distance_to_axis(&CanonicalPoint::new(5.0, 7.0)) - 2.0).abs() < 1e-5);
        let (dx, _) = t.axis_direction();
        assert!(dx < 0.0);
    }
}
