use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Point in canonical-crop space (rotated, mirrored and scaled palm crop).
///
/// Only the ROI, extraction and classification stages see this type. Anything that is
/// persisted or returned uses [`ImagePoint`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanonicalPoint {
    pub x: f32,
    pub y: f32,
}

impl CanonicalPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &CanonicalPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &CanonicalPoint) -> CanonicalPoint {
        CanonicalPoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Offset by a vector.
    pub fn offset(&self, dx: f32, dy: f32) -> CanonicalPoint {
        CanonicalPoint::new(self.x + dx, self.y + dy)
    }
}

/// Point in original-image pixel space.
///
/// Serialized as `[x, y]` so the wire shape of a segment is `[[x, y], ...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct ImagePoint {
    pub x: i32,
    pub y: i32,
}

impl ImagePoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &ImagePoint) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[i32; 2]> for ImagePoint {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<ImagePoint> for [i32; 2] {
    fn from(p: ImagePoint) -> Self {
        [p.x, p.y]
    }
}

/// The three crease lines this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LineKind {
    #[serde(rename = "life_line")]
    Life,
    #[serde(rename = "heart_line")]
    Heart,
    #[serde(rename = "head_line")]
    Head,
}

impl LineKind {
    pub const ALL: [LineKind; 3] = [LineKind::Life, LineKind::Heart, LineKind::Head];

    /// Key used at the boundary (`life_line`, `heart_line`, `head_line`).
    pub fn key(&self) -> &'static str {
        match self {
            LineKind::Life => "life_line",
            LineKind::Heart => "heart_line",
            LineKind::Head => "head_line",
        }
    }

    pub fn from_key(key: &str) -> Option<LineKind> {
        LineKind::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Overlay color (RGB) for annotated images.
    pub fn color(&self) -> [u8; 3] {
        match self {
            LineKind::Life => [255, 0, 0],
            LineKind::Heart => [0, 0, 255],
            LineKind::Head => [0, 255, 0],
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A contiguous traced curve in original-image coordinates, in path order.
///
/// Serialized as a bare array of points; deserialization rejects fewer than two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ImagePoint>", into = "Vec<ImagePoint>")]
pub struct Segment {
    points: Vec<ImagePoint>,
}

impl TryFrom<Vec<ImagePoint>> for Segment {
    type Error = String;

    fn try_from(points: Vec<ImagePoint>) -> Result<Self, Self::Error> {
        let count = points.len();
        Segment::new(points).ok_or_else(|| format!("segment needs at least 2 points, got {}", count))
    }
}

impl From<Segment> for Vec<ImagePoint> {
    fn from(segment: Segment) -> Self {
        segment.points
    }
}

impl Segment {
    /// Build a segment; `None` if it has fewer than two points.
    pub fn new(points: Vec<ImagePoint>) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[ImagePoint] {
        &self.points
    }

    pub fn first(&self) -> ImagePoint {
        self.points[0]
    }

    pub fn last(&self) -> ImagePoint {
        self.points[self.points.len() - 1]
    }

    pub fn endpoints(&self) -> [ImagePoint; 2] {
        [self.first(), self.last()]
    }

    /// Sum of the distances between consecutive points.
    pub fn path_length(&self) -> f32 {
        self.points.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }

    /// Smallest distance from `p` to any point of the segment.
    pub fn distance_to(&self, p: &ImagePoint) -> f32 {
        self.points
            .iter()
            .map(|q| q.distance(p))
            .fold(f32::INFINITY, f32::min)
    }
}

/// One classified crease line.
///
/// A line with no segments is "not detected" and always has confidence 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreaseLine {
    pub kind: LineKind,
    pub segments: Vec<Segment>,
    pub confidence: f32,
}

impl CreaseLine {
    pub fn not_detected(kind: LineKind) -> Self {
        Self {
            kind,
            segments: Vec::new(),
            confidence: 0.0,
        }
    }

    /// Build a detected line. Falls back to "not detected" when `segments` is empty so that
    /// confidence 0 and an empty segment list always go together.
    pub fn detected(kind: LineKind, segments: Vec<Segment>, confidence: f32) -> Self {
        if segments.is_empty() {
            return Self::not_detected(kind);
        }
        Self {
            kind,
            segments,
            confidence: confidence.clamp(f32::EPSILON, 1.0),
        }
    }

    pub fn is_detected(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn total_length(&self) -> f32 {
        self.segments.iter().map(Segment::path_length).sum()
    }

    /// Same points and same segment grouping.
    pub fn same_geometry(&self, other: &CreaseLine) -> bool {
        self.segments == other.segments
    }
}

/// Exactly one [`CreaseLine`] per [`LineKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSet {
    #[serde(rename = "life_line")]
    pub life: CreaseLine,
    #[serde(rename = "heart_line")]
    pub heart: CreaseLine,
    #[serde(rename = "head_line")]
    pub head: CreaseLine,
}

impl LineSet {
    pub fn empty() -> Self {
        Self {
            life: CreaseLine::not_detected(LineKind::Life),
            heart: CreaseLine::not_detected(LineKind::Heart),
            head: CreaseLine::not_detected(LineKind::Head),
        }
    }

    pub fn get(&self, kind: LineKind) -> &CreaseLine {
        match kind {
            LineKind::Life => &self.life,
            LineKind::Heart => &self.heart,
            LineKind::Head => &self.head,
        }
    }

    pub fn set(&mut self, line: CreaseLine) {
        match line.kind {
            LineKind::Life => self.life = line,
            LineKind::Heart => self.heart = line,
            LineKind::Head => self.head = line,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CreaseLine> {
        [&self.life, &self.heart, &self.head].into_iter()
    }

    /// Boundary shape: `{"life_line": [[[x, y], ...], ...], ...}`.
    pub fn segments_by_kind(&self) -> BTreeMap<LineKind, Vec<Segment>> {
        self.iter()
            .map(|line| (line.kind, line.segments.clone()))
            .collect()
    }

    pub fn confidences(&self) -> BTreeMap<LineKind, f32> {
        self.iter().map(|line| (line.kind, line.confidence)).collect()
    }

    /// Validate a correction payload into a line set.
    ///
    /// The payload must name exactly the three known lines. Every segment needs at least two
    /// points, and every coordinate must be finite and fit in `i32`. Confidence is set to 1.0
    /// for non-empty lines; the store may keep the previous value for unchanged geometry.
    pub fn from_payload(payload: &CorrectionPayload) -> Result<LineSet, String> {
        if payload.len() != LineKind::ALL.len() {
            return Err(format!(
                "expected exactly {} lines (life_line, heart_line, head_line), got {}",
                LineKind::ALL.len(),
                payload.len()
            ));
        }

        let mut set = LineSet::empty();
        for (key, raw_segments) in payload {
            let kind = LineKind::from_key(key)
                .ok_or_else(|| format!("unknown line identity '{}'", key))?;

            let mut segments = Vec::with_capacity(raw_segments.len());
            for (seg_idx, raw) in raw_segments.iter().enumerate() {
                if raw.len() < 2 {
                    return Err(format!(
                        "{} segment {} has {} point(s), at least 2 required",
                        key,
                        seg_idx,
                        raw.len()
                    ));
                }
                let mut points = Vec::with_capacity(raw.len());
                for (pt_idx, [x, y]) in raw.iter().enumerate() {
                    let x = to_pixel(*x).ok_or_else(|| {
                        format!("{} segment {} point {}: invalid x {}", key, seg_idx, pt_idx, x)
                    })?;
                    let y = to_pixel(*y).ok_or_else(|| {
                        format!("{} segment {} point {}: invalid y {}", key, seg_idx, pt_idx, y)
                    })?;
                    points.push(ImagePoint::new(x, y));
                }
                // Length was checked above
                if let Some(segment) = Segment::new(points) {
                    segments.push(segment);
                }
            }
            set.set(CreaseLine::detected(kind, segments, 1.0));
        }
        Ok(set)
    }
}

/// Correction request body: line key → segments → `[x, y]` points.
pub type CorrectionPayload = BTreeMap<String, Vec<Vec<[f64; 2]>>>;

fn to_pixel(v: f64) -> Option<i32> {
    if !v.is_finite() {
        return None;
    }
    let rounded = v.round();
    if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
        return None;
    }
    Some(rounded as i32)
}
