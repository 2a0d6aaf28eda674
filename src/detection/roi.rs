use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::debug;

use crate::config::RoiConfig;
use crate::detection::landmarks::{
    Landmarks, LANDMARK_COUNT, MIDDLE_MCP, THUMB_CMC, THUMB_MCP, WRIST,
};
use crate::error::DetectionError;
use crate::models::{CanonicalPoint, ImagePoint};

/// 2x3 affine transform: `x' = a*x + b*y + c`, `y' = d*x + e*y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    m: [f32; 6],
}

impl Affine {
    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { m: [a, b, c, d, e, f] }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn apply(&self, x: f32, y: f32) -> [f32; 2] {
        let [a, b, c, d, e, f] = self.m;
        [a * x + b * y + c, d * x + e * y + f]
    }

    /// `self` after `first`.
    pub fn then_after(&self, first: &Affine) -> Affine {
        let [a1, b1, c1, d1, e1, f1] = first.m;
        let [a2, b2, c2, d2, e2, f2] = self.m;
        Affine::new(
            a2 * a1 + b2 * d1,
            a2 * b1 + b2 * e1,
            a2 * c1 + b2 * f1 + c2,
            d2 * a1 + e2 * d1,
            d2 * b1 + e2 * e1,
            d2 * c1 + e2 * f1 + f2,
        )
    }

    pub fn invert(&self) -> Option<Affine> {
        let [a, b, c, d, e, f] = self.m;
        let det = a * e - b * d;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(Affine::new(
            ia,
            ib,
            -(ia * c + ib * f),
            id,
            ie,
            -(id * c + ie * f),
        ))
    }

    pub fn to_projection(&self) -> Option<Projection> {
        let [a, b, c, d, e, f] = self.m;
        Projection::from_matrix([a, b, c, d, e, f, 0.0, 0.0, 1.0])
    }
}

/// Canonical-space affine that maps crop coordinates back to the original image.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalToImage(Affine);

impl From<Affine> for CanonicalToImage {
    fn from(affine: Affine) -> Self {
        Self(affine)
    }
}

impl CanonicalToImage {
    pub fn map(&self, p: &CanonicalPoint) -> [f32; 2] {
        self.0.apply(p.x, p.y)
    }

    /// Map and round to integer pixel coordinates.
    pub fn map_point(&self, p: &CanonicalPoint) -> ImagePoint {
        let [x, y] = self.map(p);
        ImagePoint::new(x.round() as i32, y.round() as i32)
    }
}

/// Palm crop in canonical orientation: wrist at the bottom, fingers up, thumb on the left.
pub struct NormalizedPalm {
    pub crop: GrayImage,
    pub landmarks: [CanonicalPoint; LANDMARK_COUNT],
    pub to_image: CanonicalToImage,
    /// Long side of the ROI in original pixels.
    pub palm_size: f32,
    /// ROI rectangle corners in original-image space.
    pub corners: [[f32; 2]; 4],
}

impl std::fmt::Debug for NormalizedPalm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedPalm")
            .field("crop", &self.crop.dimensions())
            .field("palm_size", &self.palm_size)
            .field("corners", &self.corners)
            .finish()
    }
}

/// Validate the detected hand and produce the canonical palm crop.
pub fn normalize(
    gray: &GrayImage,
    landmarks: Option<&Landmarks>,
    config: &RoiConfig,
) -> Result<NormalizedPalm, DetectionError> {
    let landmarks = match landmarks {
        Some(lm) if lm.detection_score >= config.min_detection_score => lm,
        Some(lm) => {
            debug!(
                "Hand score {:.2} below threshold {:.2}",
                lm.detection_score, config.min_detection_score
            );
            return Err(DetectionError::NoHandDetected);
        }
        None => return Err(DetectionError::NoHandDetected),
    };

    if !landmarks.is_palm_side() {
        debug!(
            "Back of hand: cross {:.1} for reported {:?}",
            landmarks.palm_cross(),
            landmarks.handedness
        );
        return Err(DetectionError::BackOfHand);
    }

    if !landmarks.is_open {
        return Err(DetectionError::HandNotOpen);
    }

    let (width, height) = gray.dimensions();
    let (min_x, min_y, max_x, max_y) = landmarks.bounds();
    let hand_long_side = (max_x - min_x).max(max_y - min_y);
    let ratio = hand_long_side / width.max(height).max(1) as f32;
    if ratio < config.min_hand_fraction {
        return Err(DetectionError::HandTooSmall {
            ratio,
            min: config.min_hand_fraction,
        });
    }

    // Rotate so that wrist -> middle MCP points straight up
    let [wx, wy] = landmarks.point(WRIST);
    let [mx, my] = landmarks.point(MIDDLE_MCP);
    let theta = (my - wy).atan2(mx - wx);
    let phi = -std::f32::consts::FRAC_PI_2 - theta;
    let (sin, cos) = phi.sin_cos();
    let rotation = Affine::new(cos, -sin, 0.0, sin, cos, 0.0);

    // Mirror if the thumb ended up on the right of the wrist-middle axis
    let thumb = {
        let [x1, y1] = landmarks.point(THUMB_CMC);
        let [x2, y2] = landmarks.point(THUMB_MCP);
        rotation.apply((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    };
    let wrist_rotated = rotation.apply(wx, wy);
    let linear = if thumb[0] > wrist_rotated[0] {
        Affine::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0).then_after(&rotation)
    } else {
        rotation
    };

    let rotated: Vec<[f32; 2]> = landmarks
        .points
        .iter()
        .map(|[x, y]| linear.apply(*x, *y))
        .collect();
    let (rmin_x, rmin_y, rmax_x, rmax_y) = rotated.iter().fold(
        (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        |(a, b, c, d), [x, y]| (a.min(*x), b.min(*y), c.max(*x), d.max(*y)),
    );

    let box_w = rmax_x - rmin_x;
    let box_h = rmax_y - rmin_y;
    let origin_x = rmin_x - box_w * config.margin;
    let origin_y = rmin_y - box_h * config.margin;
    let roi_w = box_w * (1.0 + 2.0 * config.margin);
    let roi_h = box_h * (1.0 + 2.0 * config.margin);
    let palm_size = roi_w.max(roi_h).max(1.0);
    let scale = config.canonical_size as f32 / palm_size;

    let to_canonical = Affine::new(scale, 0.0, -scale * origin_x, 0.0, scale, -scale * origin_y)
        .then_after(&linear);
    let to_image = to_canonical
        .invert()
        .ok_or_else(|| DetectionError::InvalidImage("degenerate hand geometry".to_string()))?;
    let projection = to_canonical
        .to_projection()
        .ok_or_else(|| DetectionError::InvalidImage("degenerate hand geometry".to_string()))?;

    let crop_w = ((roi_w * scale).round() as u32).max(1);
    let crop_h = ((roi_h * scale).round() as u32).max(1);
    let mut crop = GrayImage::new(crop_w, crop_h);
    warp_into(gray, &projection, Interpolation::Bilinear, Luma([0u8]), &mut crop);

    let mut canonical = [CanonicalPoint::default(); LANDMARK_COUNT];
    for (dst, [x, y]) in canonical.iter_mut().zip(landmarks.points.iter()) {
        let [cx, cy] = to_canonical.apply(*x, *y);
        *dst = CanonicalPoint::new(cx, cy);
    }

    let (cw, ch) = (crop_w as f32, crop_h as f32);
    let corners = [
        to_image.apply(0.0, 0.0),
        to_image.apply(cw, 0.0),
        to_image.apply(cw, ch),
        to_image.apply(0.0, ch),
    ];

    debug!(
        "ROI: rotation {:.1} deg, crop {}x{}, palm size {:.0}px",
        phi.to_degrees(),
        crop_w,
        crop_h,
        palm_size
    );

    Ok(NormalizedPalm {
        crop,
        landmarks: canonical,
        to_image: CanonicalToImage(to_image),
        palm_size,
        corners,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::landmarks::{Handedness, INDEX_MCP, PINKY_MCP};

    /// Upright open hand with the thumb on the image left.
    fn upright_landmarks() -> Landmarks {
        let mut points = [[0.0f32; 2]; LANDMARK_COUNT];
        points[WRIST] = [300.0, 500.0];
        points[THUMB_CMC] = [240.0, 460.0];
        points[THUMB_MCP] = [210.0, 410.0];
        points[3] = [190.0, 370.0];
        points[4] = [175.0, 335.0];
        points[INDEX_MCP] = [240.0, 320.0];
        points[6] = [235.0, 260.0];
        points[7] = [232.0, 225.0];
        points[8] = [230.0, 195.0];
        points[MIDDLE_MCP] = [295.0, 310.0];
        points[10] = [295.0, 245.0];
        points[11] = [295.0, 205.0];
        points[12] = [295.0, 175.0];
        points[13] = [345.0, 320.0];
        points[14] = [350.0, 260.0];
        points[15] = [352.0, 225.0];
        points[16] = [354.0, 197.0];
        points[PINKY_MCP] = [385.0, 340.0];
        points[18] = [395.0, 295.0];
        points[19] = [400.0, 268.0];
        points[20] = [404.0, 245.0];
        Landmarks {
            points,
            handedness: Handedness::Right,
            detection_score: 0.95,
            is_open: true,
        }
    }

    #[test]
    fn test_affine_invert_roundtrip() {
        let a = Affine::new(0.8, -0.6, 10.0, 0.6, 0.8, -5.0);
        let inv = a.invert().unwrap();
        let [x, y] = a.apply(12.0, 34.0);
        let [bx, by] = inv.apply(x, y);
        assert!((bx - 12.0).abs() < 1e-3);
        assert!((by - 34.0).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_missing_and_low_score() {
        let gray = GrayImage::new(600, 600);
        let cfg = RoiConfig::default();
        assert!(matches!(normalize(&gray, None, &cfg), Err(DetectionError::NoHandDetected)));

        let mut lm = upright_landmarks();
        lm.detection_score = 0.1;
        assert!(matches!(
            normalize(&gray, Some(&lm), &cfg),
            Err(DetectionError::NoHandDetected)
        ));
    }

    #[test]
    fn test_rejects_closed_hand() {
        let gray = GrayImage::new(600, 600);
        let mut lm = upright_landmarks();
        lm.is_open = false;
        assert!(matches!(
            normalize(&gray, Some(&lm), &RoiConfig::default()),
            Err(DetectionError::HandNotOpen)
        ));
    }

    #[test]
    fn test_rejects_small_hand() {
        let gray = GrayImage::new(4000, 4000);
        let lm = upright_landmarks();
        assert!(matches!(
            normalize(&gray, Some(&lm), &RoiConfig::default()),
            Err(DetectionError::HandTooSmall { .. })
        ));
    }

    #[test]
    fn test_canonical_axis_is_vertical_and_thumb_left() {
        let gray = GrayImage::new(600, 600);
        let palm = normalize(&gray, Some(&upright_landmarks()), &RoiConfig::default()).unwrap();
        let wrist = palm.landmarks[WRIST];
        let middle = palm.landmarks[MIDDLE_MCP];
        assert!((wrist.x - middle.x).abs() < 1e-2);
        assert!(middle.y < wrist.y);
        assert!(palm.landmarks[THUMB_MCP].x < wrist.x);

        let (w, h) = palm.crop.dimensions();
        assert_eq!(w.max(h), RoiConfig::default().canonical_size);
    }

    #[test]
    fn test_mirrored_hand_still_has_thumb_left() {
        let gray = GrayImage::new(600, 600);
        let mut lm = upright_landmarks();
        for p in lm.points.iter_mut() {
            p[0] = 600.0 - p[0];
        }
        lm.handedness = Handedness::Left;
        let palm = normalize(&gray, Some(&lm), &RoiConfig::default()).unwrap();
        assert!(palm.landmarks[THUMB_MCP].x < palm.landmarks[WRIST].x);
    }

    #[test]
    fn test_rejects_back_of_hand() {
        let gray = GrayImage::new(600, 600);
        // Same label, mirrored geometry: the hand shows its back
        let mut lm = upright_landmarks();
        for p in lm.points.iter_mut() {
            p[0] = 600.0 - p[0];
        }
        assert!(matches!(
            normalize(&gray, Some(&lm), &RoiConfig::default()),
            Err(DetectionError::BackOfHand)
        ));

        // Checked before openness
        lm.is_open = false;
        assert!(matches!(
            normalize(&gray, Some(&lm), &RoiConfig::default()),
            Err(DetectionError::BackOfHand)
        ));
    }

    #[test]
    fn test_inverse_maps_landmarks_back() {
        let gray = GrayImage::new(600, 600);
        let lm = upright_landmarks();
        let mut rotated = lm.clone();
        // Tilt the hand by 30 degrees around the wrist
        let (s, c) = 30f32.to_radians().sin_cos();
        let [ox, oy] = lm.point(WRIST);
        for p in rotated.points.iter_mut() {
            let (dx, dy) = (p[0] - ox, p[1] - oy);
            *p = [ox + c * dx - s * dy, oy + s * dx + c * dy];
        }
        let palm = normalize(&gray, Some(&rotated), &RoiConfig::default()).unwrap();
        for (canon, orig) in palm.landmarks.iter().zip(rotated.points.iter()) {
            let [x, y] = palm.to_image.map(canon);
            assert!((x - orig[0]).abs() < 0.05, "x {} vs {}", x, orig[0]);
            assert!((y - orig[1]).abs() < 0.05, "y {} vs {}", y, orig[1]);
        }
    }
}
