//! Geometric feature tagging of classified crease lines.
//!
//! Everything here is a pure function of the current line geometry, so a correction is
//! reflected the next time a hand is analyzed.

use std::fmt;

use serde::Serialize;

use crate::config::FeatureConfig;
use crate::models::{CreaseLine, LineKind, LineSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurvatureClass {
    Low,
    Medium,
    High,
}

/// One discrete tag per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureTag {
    LongForked,
    ShortForked,
    LongBroken,
    ShortBroken,
    LongCurved,
    LongUnbroken,
    ShortCurved,
    ShortUnbroken,
    NotDetected,
}

impl FeatureTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureTag::LongForked => "long/forked",
            FeatureTag::ShortForked => "short/forked",
            FeatureTag::LongBroken => "long/broken",
            FeatureTag::ShortBroken => "short/broken",
            FeatureTag::LongCurved => "long/curved",
            FeatureTag::LongUnbroken => "long/unbroken",
            FeatureTag::ShortCurved => "short/curved",
            FeatureTag::ShortUnbroken => "short/unbroken",
            FeatureTag::NotDetected => "not detected",
        }
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurements of one detected line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineMetrics {
    pub total_length: f32,
    pub segment_count: usize,
    pub forked: bool,
    /// Path length over end-to-end chord
    pub path_chord_ratio: f32,
    pub curvature: CurvatureClass,
    /// Total length relative to the palm size
    pub length_ratio: f32,
    pub long: bool,
}

impl LineMetrics {
    pub fn breaks(&self) -> usize {
        self.segment_count.saturating_sub(1)
    }

    pub fn broken(&self) -> bool {
        self.segment_count > 1
    }
}

/// Derived per-request view of a line: metrics (if detected) and the resulting tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineFeature {
    pub kind: LineKind,
    pub tag: FeatureTag,
    pub metrics: Option<LineMetrics>,
}

impl LineFeature {
    pub fn is_detected(&self) -> bool {
        self.tag != FeatureTag::NotDetected
    }

    /// Short geometric summary for prompts and logs.
    pub fn summary(&self) -> String {
        match &self.metrics {
            None => "not detected".to_string(),
            Some(m) => format!(
                "length {:.2} of palm size, {} segment(s), {} break(s), {}, curvature {:?} (path/chord {:.2})",
                m.length_ratio,
                m.segment_count,
                m.breaks(),
                if m.forked { "forked" } else { "no fork" },
                m.curvature,
                m.path_chord_ratio
            ),
        }
    }
}

type Rule = (fn(&LineMetrics) -> bool, FeatureTag);

/// Most specific first; the first matching rule wins.
const RULES: &[Rule] = &[
    (|m| m.forked && m.long, FeatureTag::LongForked),
    (|m| m.forked, FeatureTag::ShortForked),
    (|m| m.broken() && m.long, FeatureTag::LongBroken),
    (|m| m.broken(), FeatureTag::ShortBroken),
    (|m| m.long && m.curvature == CurvatureClass::High, FeatureTag::LongCurved),
    (|m| m.long, FeatureTag::LongUnbroken),
    (|m| m.curvature == CurvatureClass::High, FeatureTag::ShortCurved),
    (|_| true, FeatureTag::ShortUnbroken),
];

pub fn tag_for(metrics: &LineMetrics) -> FeatureTag {
    RULES
        .iter()
        .find(|(predicate, _)| predicate(metrics))
        .map(|(_, tag)| *tag)
        .unwrap_or(FeatureTag::ShortUnbroken)
}

fn long_threshold(kind: LineKind, config: &FeatureConfig) -> f32 {
    match kind {
        LineKind::Life => config.long_life_ratio,
        LineKind::Heart => config.long_heart_ratio,
        LineKind::Head => config.long_head_ratio,
    }
}

/// `None` for a line with no segments.
pub fn measure(line: &CreaseLine, palm_size: f32, config: &FeatureConfig) -> Option<LineMetrics> {
    let first = line.segments.first()?;
    let last = line.segments.last()?;
    let palm_size = palm_size.max(1.0);

    let total_length = line.total_length();
    let chord = first.first().distance(&last.last());
    let path_chord_ratio = if chord > f32::EPSILON {
        total_length / chord
    } else {
        f32::INFINITY
    };
    let curvature = if path_chord_ratio >= config.high_curvature_ratio {
        CurvatureClass::High
    } else if path_chord_ratio >= config.medium_curvature_ratio {
        CurvatureClass::Medium
    } else {
        CurvatureClass::Low
    };

    let radius = config.fork_radius * palm_size;
    let forked = line.segments.iter().enumerate().any(|(i, seg)| {
        seg.endpoints().iter().any(|end| {
            let near = line
                .segments
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.distance_to(end) <= radius)
                .count();
            near >= 2
        })
    });

    let length_ratio = total_length / palm_size;
    Some(LineMetrics {
        total_length,
        segment_count: line.segments.len(),
        forked,
        path_chord_ratio,
        curvature,
        length_ratio,
        long: length_ratio >= long_threshold(line.kind, config),
    })
}

pub fn analyze_line(line: &CreaseLine, palm_size: f32, config: &FeatureConfig) -> LineFeature {
    let metrics = measure(line, palm_size, config);
    let tag = metrics.as_ref().map(tag_for).unwrap_or(FeatureTag::NotDetected);
    LineFeature {
        kind: line.kind,
        tag,
        metrics,
    }
}

/// One feature per identity, in `LineKind::ALL` order.
pub fn analyze_lines(lines: &LineSet, palm_size: f32, config: &FeatureConfig) -> Vec<LineFeature> {
    LineKind::ALL
        .iter()
        .map(|kind| analyze_line(lines.get(*kind), palm_size, config))
        .collect()
}
