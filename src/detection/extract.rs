use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::detection::regions::palm_mask;
use crate::detection::roi::NormalizedPalm;
use crate::detection::skeleton::trace_branches;
use crate::detection::steps::*;
use crate::models::CanonicalPoint;
use crate::pipeline::{Pipeline, PipelineData};

/// Candidate crease before an identity is assigned. Canonical coordinates only.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub points: Vec<CanonicalPoint>,
    /// Skeleton pixels supporting the segment
    pub pixel_count: u32,
    /// Mean ridge response along the path, in [0, 1]
    pub strength: f32,
}

impl RawSegment {
    pub fn first(&self) -> CanonicalPoint {
        self.points[0]
    }

    pub fn last(&self) -> CanonicalPoint {
        self.points[self.points.len() - 1]
    }

    pub fn path_length(&self) -> f32 {
        self.points.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }

    pub fn centroid(&self) -> CanonicalPoint {
        let n = self.points.len().max(1) as f32;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        CanonicalPoint::new(sx / n, sy / n)
    }

    pub fn reversed(&self) -> RawSegment {
        let mut points = self.points.clone();
        points.reverse();
        RawSegment {
            points,
            ..self.clone()
        }
    }
}

/// Finds thin dark ridges inside the palm and traces them into ordered segments.
pub struct CreaseExtractor {
    config: ExtractionConfig,
    verbose: bool,
    debug_dir: Option<PathBuf>,
}

impl CreaseExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            verbose: false,
            debug_dir: None,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Write every stage image into `dir` (must be empty or missing).
    pub fn with_debug(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    /// The stage pipeline for a crop of the given width.
    pub fn build_pipeline(&self, crop_width: u32) -> Result<Pipeline> {
        let radius = (crop_width as f32 * self.config.blackhat_radius_fraction)
            .round()
            .clamp(1.0, 255.0) as u8;

        let mut pipeline = Pipeline::new()
            .with_verbose(self.verbose)
            .add_step(Arc::new(ContrastStep {
                sigma: self.config.blur_sigma,
            }))
            .add_step(Arc::new(BlackHatStep { radius }))
            .add_step(Arc::new(RidgeThresholdStep {
                threshold: self.config.ridge_threshold,
            }))
            .add_step(Arc::new(CleanupStep {
                close_radius: self.config.close_radius,
            }))
            .add_step(Arc::new(ThinningStep));

        if let Some(dir) = &self.debug_dir {
            pipeline = pipeline.with_debug(dir.clone())?;
        }
        Ok(pipeline)
    }

    /// Extract raw candidate segments from a canonical palm crop.
    pub fn extract(&self, palm: &NormalizedPalm) -> Result<Vec<RawSegment>> {
        let (width, height) = palm.crop.dimensions();
        let mask = palm_mask(width, height, &palm.landmarks);
        let pipeline = self.build_pipeline(width)?;

        let output = pipeline.run(PipelineData::new(palm.crop.clone(), mask))?;
        let response = output
            .layer(RIDGE_RESPONSE)
            .ok_or_else(|| anyhow::anyhow!("Ridge response layer missing"))?;

        let min_length = width.max(height) as f32 * self.config.min_length_fraction;
        let branches = trace_branches(&output.image);
        let total = branches.len();

        let segments: Vec<RawSegment> = branches
            .into_iter()
            .filter(|c| c.pixel_count() >= self.config.min_pixels && c.path_length() >= min_length)
            .map(|c| {
                let sum: f32 = c
                    .path
                    .iter()
                    .map(|&(x, y)| response.get_pixel(x, y)[0] as f32)
                    .sum();
                let mean = sum / c.path.len().max(1) as f32;
                let strength = (mean / self.config.strength_reference.max(1.0)).clamp(0.0, 1.0);
                RawSegment {
                    points: c
                        .path
                        .iter()
                        .map(|&(x, y)| CanonicalPoint::new(x as f32, y as f32))
                        .collect(),
                    pixel_count: c.pixel_count(),
                    strength,
                }
            })
            .collect();

        debug!(
            "Crease extraction: {} skeleton branches, {} kept (min length {:.0}px)",
            total,
            segments.len(),
            min_length
        );
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_segment_helpers() {
        let seg = RawSegment {
            points: vec![CanonicalPoint::new(0.0, 0.0), CanonicalPoint::new(4.0, 0.0)],
            pixel_count: 5,
            strength: 0.5,
        };
        assert_eq!(seg.path_length(), 4.0);
        assert_eq!(seg.centroid(), CanonicalPoint::new(2.0, 0.0));
        assert_eq!(seg.reversed().first(), CanonicalPoint::new(4.0, 0.0));
    }

    #[test]
    fn test_pipeline_has_all_stages() {
        let extractor = CreaseExtractor::new(ExtractionConfig::default());
        let pipeline = extractor.build_pipeline(512).unwrap();
        assert_eq!(
            pipeline.step_names(),
            vec!["Contrast Enhancement", "Black Hat", "Ridge Threshold", "Cleanup", "Thinning"]
        );
    }
}
