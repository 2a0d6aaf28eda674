use std::cmp::Ordering;

use tracing::debug;

use crate::config::ClassifierConfig;
use crate::detection::extract::RawSegment;
use crate::detection::landmarks::LANDMARK_COUNT;
use crate::detection::regions::{line_templates, LineTemplate};
use crate::detection::roi::CanonicalToImage;
use crate::models::{CanonicalPoint, CreaseLine, ImagePoint, LineKind, LineSet, Segment};

/// Per-pair (or per-chain) match factors, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchFactors {
    pub overlap: f32,
    pub orientation: f32,
    pub strength: f32,
    pub coverage: f32,
}

impl MatchFactors {
    /// Score used to rank seed candidates.
    pub fn match_score(&self) -> f32 {
        self.overlap * self.orientation
    }
}

/// Non-negative weights that sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceWeights {
    overlap: f32,
    orientation: f32,
    strength: f32,
    coverage: f32,
}

impl ConfidenceWeights {
    pub fn new(overlap: f32, orientation: f32, strength: f32, coverage: f32) -> Self {
        let raw = [overlap, orientation, strength, coverage].map(|w| {
            if w.is_finite() { w.max(0.0) } else { 0.0 }
        });
        let sum: f32 = raw.iter().sum();
        let [o, r, s, c] = if sum > 0.0 {
            raw.map(|w| w / sum)
        } else {
            [0.25; 4]
        };
        Self {
            overlap: o,
            orientation: r,
            strength: s,
            coverage: c,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.weight_overlap,
            config.weight_orientation,
            config.weight_strength,
            config.weight_coverage,
        )
    }

    pub fn confidence(&self, f: &MatchFactors) -> f32 {
        let value = self.overlap * f.overlap.clamp(0.0, 1.0)
            + self.orientation * f.orientation.clamp(0.0, 1.0)
            + self.strength * f.strength.clamp(0.0, 1.0)
            + self.coverage * f.coverage.clamp(0.0, 1.0);
        value.clamp(0.0, 1.0)
    }
}

/// A line identity with its chain of segments, still in canonical space.
#[derive(Debug, Clone)]
pub struct ClassifiedLine {
    pub kind: LineKind,
    /// Ordered along the template axis, points oriented the same way
    pub segments: Vec<RawSegment>,
    pub factors: MatchFactors,
    pub confidence: f32,
}

struct Candidate {
    template: usize,
    segment: usize,
    factors: MatchFactors,
    axis_distance: f32,
}

/// Assigns raw segments to the life, heart and head lines.
pub struct LineClassifier {
    config: ClassifierConfig,
    weights: ConfidenceWeights,
}

impl LineClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let weights = ConfidenceWeights::from_config(&config);
        Self { config, weights }
    }

    /// Classify and map the result back to original-image coordinates.
    pub fn classify(
        &self,
        segments: &[RawSegment],
        landmarks: &[CanonicalPoint; LANDMARK_COUNT],
        crop_size: (u32, u32),
        to_image: &CanonicalToImage,
    ) -> LineSet {
        let lines = self.classify_canonical(segments, landmarks, crop_size);
        to_line_set(&lines, to_image)
    }

    /// Classification in canonical space. Identities without a match, or whose confidence
    /// does not exceed `min_confidence`, are omitted.
    pub fn classify_canonical(
        &self,
        segments: &[RawSegment],
        landmarks: &[CanonicalPoint; LANDMARK_COUNT],
        (width, height): (u32, u32),
    ) -> Vec<ClassifiedLine> {
        let templates = line_templates(width, height, landmarks);

        let mut candidates = Vec::new();
        for (ti, template) in templates.iter().enumerate() {
            for (si, segment) in segments.iter().enumerate() {
                let factors = pair_factors(template, segment);
                if factors.overlap >= self.config.min_overlap
                    && factors.orientation >= self.config.min_orientation
                {
                    candidates.push(Candidate {
                        template: ti,
                        segment: si,
                        factors,
                        axis_distance: template.distance_to_axis(&segment.centroid()),
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.factors
                .match_score()
                .partial_cmp(&a.factors.match_score())
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.factors
                        .strength
                        .partial_cmp(&a.factors.strength)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| {
                    a.axis_distance
                        .partial_cmp(&b.axis_distance)
                        .unwrap_or(Ordering::Equal)
                })
        });

        // Global greedy: at most one seed per identity and one identity per segment
        let mut used = vec![false; segments.len()];
        let mut seeds: Vec<(usize, usize)> = Vec::new();
        for c in &candidates {
            if used[c.segment] || seeds.iter().any(|(t, _)| *t == c.template) {
                continue;
            }
            used[c.segment] = true;
            seeds.push((c.template, c.segment));
        }

        let link_distance = width.max(height) as f32 * self.config.chain_distance;
        let mut lines = Vec::with_capacity(seeds.len());
        for (ti, si) in seeds {
            let template = &templates[ti];
            let pool: Vec<usize> = candidates
                .iter()
                .filter(|c| c.template == ti)
                .map(|c| c.segment)
                .collect();

            let mut chain = vec![orient(template, &segments[si])];
            loop {
                let next = pool
                    .iter()
                    .filter(|&&s| !used[s])
                    .filter_map(|&s| {
                        let seg = orient(template, &segments[s]);
                        self.link_gap(&chain, &seg, link_distance)
                            .map(|(gap, at_tail)| (s, seg, gap, at_tail))
                    })
                    .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal));

                let Some((s, seg, _, at_tail)) = next else {
                    break;
                };
                used[s] = true;
                if at_tail {
                    chain.push(seg);
                } else {
                    chain.insert(0, seg);
                }
            }

            chain.sort_by(|a, b| {
                template
                    .project(&a.centroid())
                    .partial_cmp(&template.project(&b.centroid()))
                    .unwrap_or(Ordering::Equal)
            });
            let chain = join_touching(chain);

            let factors = chain_factors(template, &chain);
            let confidence = self.weights.confidence(&factors);
            if confidence <= self.config.min_confidence {
                debug!(
                    "{}: confidence {:.2} at or below {:.2}, not detected",
                    template.kind, confidence, self.config.min_confidence
                );
                continue;
            }
            debug!(
                "{}: {} segment(s), overlap {:.2}, orientation {:.2}, strength {:.2}, coverage {:.2} -> {:.2}",
                template.kind,
                chain.len(),
                factors.overlap,
                factors.orientation,
                factors.strength,
                factors.coverage,
                confidence
            );
            lines.push(ClassifiedLine {
                kind: template.kind,
                segments: chain,
                factors,
                confidence,
            });
        }

        lines.sort_by_key(|l| l.kind);
        lines
    }

    /// Gap to the chain if `seg` can extend it at the head or the tail.
    fn link_gap(
        &self,
        chain: &[RawSegment],
        seg: &RawSegment,
        max_distance: f32,
    ) -> Option<(f32, bool)> {
        let head = chain.first()?;
        let tail = chain.last()?;
        let max_angle = self.config.chain_max_angle_deg;

        let tail_gap = tail.last().distance(&seg.first());
        let head_gap = seg.last().distance(&head.first());

        let tail_ok = tail_gap <= max_distance && angle_between(tail, seg) < max_angle;
        let head_ok = head_gap <= max_distance && angle_between(seg, head) < max_angle;

        match (tail_ok, head_ok) {
            (true, true) if head_gap < tail_gap => Some((head_gap, false)),
            (true, _) => Some((tail_gap, true)),
            (false, true) => Some((head_gap, false)),
            (false, false) => None,
        }
    }
}

/// Pieces whose ends are this close (canonical pixels) were cut at a skeleton junction.
const JOIN_GAP: f32 = 2.0;

/// Merge consecutive chain pieces that touch end to start into one segment.
fn join_touching(chain: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut joined: Vec<RawSegment> = Vec::with_capacity(chain.len());
    for seg in chain {
        match joined.last_mut() {
            Some(prev) if prev.last().distance(&seg.first()) <= JOIN_GAP => {
                let total = (prev.pixel_count + seg.pixel_count).max(1) as f32;
                prev.strength = (prev.strength * prev.pixel_count as f32
                    + seg.strength * seg.pixel_count as f32)
                    / total;
                let skip = usize::from(prev.last() == seg.first());
                prev.points.extend_from_slice(&seg.points[skip..]);
                prev.pixel_count += seg.pixel_count;
            }
            _ => joined.push(seg),
        }
    }
    joined
}

/// Simplification tolerance as a fraction of the segment's path length.
const SIMPLIFY_FRACTION: f32 = 0.001;

/// Map classified lines to original-image coordinates.
///
/// Segments that collapse to fewer than two distinct pixels are dropped.
pub fn to_line_set(lines: &[ClassifiedLine], to_image: &CanonicalToImage) -> LineSet {
    let mut set = LineSet::empty();
    for line in lines {
        let segments: Vec<Segment> = line
            .segments
            .iter()
            .filter_map(|seg| {
                let mut points: Vec<ImagePoint> = Vec::with_capacity(seg.points.len());
                for p in &seg.points {
                    let q = to_image.map_point(p);
                    if points.last() != Some(&q) {
                        points.push(q);
                    }
                }
                let length: f32 = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
                Segment::new(simplify(&points, SIMPLIFY_FRACTION * length))
            })
            .collect();
        set.set(CreaseLine::detected(line.kind, segments, line.confidence));
    }
    set
}

/// Douglas-Peucker on an open polyline. Endpoints are always kept.
fn simplify(points: &[ImagePoint], epsilon: f32) -> Vec<ImagePoint> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        let (a, b) = (points[start], points[end]);
        let (dx, dy) = ((b.x - a.x) as f32, (b.y - a.y) as f32);
        let norm = (dx * dx + dy * dy).sqrt();

        let mut farthest = (0.0f32, start);
        for (i, p) in points.iter().enumerate().take(end).skip(start + 1) {
            let d = if norm <= f32::EPSILON {
                p.distance(&a)
            } else {
                (dy * (p.x - a.x) as f32 - dx * (p.y - a.y) as f32).abs() / norm
            };
            if d > farthest.0 {
                farthest = (d, i);
            }
        }

        if farthest.0 > epsilon {
            keep[farthest.1] = true;
            stack.push((start, farthest.1));
            stack.push((farthest.1, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn chord(seg: &RawSegment) -> (f32, f32) {
    let (a, b) = (seg.first(), seg.last());
    (b.x - a.x, b.y - a.y)
}

fn abs_cos(v: (f32, f32), axis: (f32, f32)) -> f32 {
    let norm = (v.0 * v.0 + v.1 * v.1).sqrt();
    if norm <= f32::EPSILON {
        return 0.0;
    }
    ((v.0 * axis.0 + v.1 * axis.1) / norm).abs().min(1.0)
}

/// Direction change in degrees from `a` to `b`.
fn angle_between(a: &RawSegment, b: &RawSegment) -> f32 {
    let (u, v) = (chord(a), chord(b));
    let nu = (u.0 * u.0 + u.1 * u.1).sqrt();
    let nv = (v.0 * v.0 + v.1 * v.1).sqrt();
    if nu <= f32::EPSILON || nv <= f32::EPSILON {
        return 0.0;
    }
    let cos = ((u.0 * v.0 + u.1 * v.1) / (nu * nv)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Reverse `seg` if it runs against the template axis.
fn orient(template: &LineTemplate, seg: &RawSegment) -> RawSegment {
    if template.project(&seg.last()) < template.project(&seg.first()) {
        seg.reversed()
    } else {
        seg.clone()
    }
}

fn projected_coverage<'a>(
    template: &LineTemplate,
    points: impl Iterator<Item = &'a CanonicalPoint>,
) -> f32 {
    let (lo, hi) = points.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
        let t = template.project(p);
        (lo.min(t), hi.max(t))
    });
    if hi < lo {
        return 0.0;
    }
    ((hi - lo) / template.axis_length()).clamp(0.0, 1.0)
}

fn overlap(template: &LineTemplate, seg: &RawSegment) -> f32 {
    if seg.points.is_empty() {
        return 0.0;
    }
    let inside = seg.points.iter().filter(|p| template.contains(p)).count();
    inside as f32 / seg.points.len() as f32
}

fn pair_factors(template: &LineTemplate, seg: &RawSegment) -> MatchFactors {
    MatchFactors {
        overlap: overlap(template, seg),
        orientation: abs_cos(chord(seg), template.axis_direction()),
        strength: seg.strength.clamp(0.0, 1.0),
        coverage: projected_coverage(template, seg.points.iter()),
    }
}

/// Length-weighted overlap and strength; orientation and coverage over the whole chain.
fn chain_factors(template: &LineTemplate, chain: &[RawSegment]) -> MatchFactors {
    let (Some(first), Some(last)) = (chain.first(), chain.last()) else {
        return MatchFactors::default();
    };

    let lengths: Vec<f32> = chain.iter().map(|s| s.path_length().max(1.0)).collect();
    let total: f32 = lengths.iter().sum();
    let weighted = |f: &dyn Fn(&RawSegment) -> f32| -> f32 {
        chain.iter().zip(&lengths).map(|(s, l)| f(s) * l).sum::<f32>() / total
    };

    let (a, b) = (first.first(), last.last());
    MatchFactors {
        overlap: weighted(&|s| overlap(template, s)),
        orientation: abs_cos((b.x - a.x, b.y - a.y), template.axis_direction()),
        strength: weighted(&|s| s.strength.clamp(0.0, 1.0)),
        coverage: projected_coverage(template, chain.iter().flat_map(|s| s.points.iter())),
    }
}
