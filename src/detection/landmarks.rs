use std::path::{Path, PathBuf};

use anyhow::Context;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Number of keypoints reported per hand.
pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const INDEX_MCP: usize = 5;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const PINKY_MCP: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// One hand as reported by an external landmark detector.
///
/// Points are normalized to `[0, 1]` relative to the image size. `is_open` may be omitted,
/// in which case it is estimated from the finger geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedHand {
    pub points: Vec<[f32; 2]>,
    pub handedness: Handedness,
    pub score: f32,
    #[serde(default)]
    pub is_open: Option<bool>,
}

/// Hand landmarks in image pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    pub points: [[f32; 2]; LANDMARK_COUNT],
    pub handedness: Handedness,
    pub detection_score: f32,
    pub is_open: bool,
}

impl Landmarks {
    /// Scale a detector result to pixel coordinates of a `width` x `height` image.
    pub fn from_normalized(hand: &DetectedHand, width: u32, height: u32) -> anyhow::Result<Self> {
        if hand.points.len() != LANDMARK_COUNT {
            anyhow::bail!(
                "Expected {} landmarks, detector returned {}",
                LANDMARK_COUNT,
                hand.points.len()
            );
        }

        let mut points = [[0.0f32; 2]; LANDMARK_COUNT];
        for (dst, [x, y]) in points.iter_mut().zip(hand.points.iter()) {
            if !x.is_finite() || !y.is_finite() {
                anyhow::bail!("Detector returned a non-finite landmark");
            }
            *dst = [x * width as f32, y * height as f32];
        }

        let is_open = hand.is_open.unwrap_or_else(|| estimate_openness(&points));

        Ok(Self {
            points,
            handedness: hand.handedness,
            detection_score: hand.score,
            is_open,
        })
    }

    pub fn point(&self, index: usize) -> [f32; 2] {
        self.points[index]
    }

    /// Cross product of (index MCP - wrist) and (pinky MCP - wrist) in image coordinates.
    /// Its sign tells which face of the hand is toward the camera.
    pub fn palm_cross(&self) -> f32 {
        let [wx, wy] = self.points[WRIST];
        let [ix, iy] = self.points[INDEX_MCP];
        let [px, py] = self.points[PINKY_MCP];
        (ix - wx) * (py - wy) - (iy - wy) * (px - wx)
    }

    /// Whether the palm faces the camera, judged against the detector's reported label.
    ///
    /// Reported labels follow the convention of detectors that expect a mirrored (selfie)
    /// image: a `Left` palm winds one way, a `Right` palm the other.
    pub fn is_palm_side(&self) -> bool {
        let cross = self.palm_cross();
        match self.handedness {
            Handedness::Left => cross < 0.0,
            Handedness::Right => cross > 0.0,
        }
    }

    /// Hand label derived from the landmark geometry rather than the reported label.
    pub fn hand_label(&self) -> Handedness {
        if self.palm_cross() < 0.0 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)` of all landmarks.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), [x, y]| {
                (min_x.min(*x), min_y.min(*y), max_x.max(*x), max_y.max(*y))
            },
        )
    }
}

/// A hand is open when the middle fingertip reaches well past the middle knuckle.
pub fn estimate_openness(points: &[[f32; 2]; LANDMARK_COUNT]) -> bool {
    let dist = |a: [f32; 2], b: [f32; 2]| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
    let wrist = points[WRIST];
    let palm = dist(points[MIDDLE_MCP], wrist);
    let finger = dist(points[MIDDLE_TIP], wrist);
    finger >= palm * 1.2
}

/// Black-box hand landmark detector.
pub trait LandmarkDetector: Send + Sync {
    /// Detect a single hand, `None` when nothing is found.
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Option<DetectedHand>>;
}

/// Returns the same result for every image.
#[derive(Debug, Clone)]
pub struct StaticLandmarkDetector {
    hand: Option<DetectedHand>,
}

impl StaticLandmarkDetector {
    pub fn new(hand: Option<DetectedHand>) -> Self {
        Self { hand }
    }
}

impl LandmarkDetector for StaticLandmarkDetector {
    fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Option<DetectedHand>> {
        Ok(self.hand.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LandmarkFile {
    Many { hands: Vec<DetectedHand> },
    One(DetectedHand),
}

/// Reads landmarks exported by an external detector from a JSON file.
///
/// Accepts either a single hand object or `{"hands": [...]}`; only the first hand is used.
#[derive(Debug, Clone)]
pub struct JsonLandmarkDetector {
    path: PathBuf,
}

impl JsonLandmarkDetector {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl LandmarkDetector for JsonLandmarkDetector {
    fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Option<DetectedHand>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read landmarks {:?}", self.path))?;
        let parsed: LandmarkFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid landmarks file {:?}", self.path))?;
        Ok(match parsed {
            LandmarkFile::One(hand) => Some(hand),
            LandmarkFile::Many { hands } => hands.into_iter().next(),
        })
    }
}
