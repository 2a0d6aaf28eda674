pub mod classify;
pub mod extract;
pub mod landmarks;
pub mod preprocessing;
pub mod regions;
pub mod roi;
pub mod skeleton;
pub mod steps;

use std::path::PathBuf;

use image::DynamicImage;
use tracing::{debug, info};

use crate::config::PalmConfig;
use crate::error::ServiceError;
use crate::models::LineSet;
use classify::LineClassifier;
use extract::CreaseExtractor;
use landmarks::Landmarks;

/// Result of one detection run, in original-image coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub lines: LineSet,
    /// Long side of the ROI in original pixels
    pub palm_size: f32,
    /// ROI rectangle in original-image space
    pub corners: [[f32; 2]; 4],
}

/// Main detection pipeline orchestrator: ROI, crease extraction, line classification.
pub struct PalmDetector {
    config: PalmConfig,
    verbose: bool,
    debug_dir: Option<PathBuf>,
}

impl PalmDetector {
    pub fn new(config: PalmConfig) -> Self {
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

    /// Save the intermediate extraction images into `dir`.
    pub fn with_debug(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    /// Run the full detection pipeline on the working image.
    pub fn detect(
        &self,
        img: &DynamicImage,
        landmarks: Option<&Landmarks>,
    ) -> Result<Detection, ServiceError> {
        let gray = img.to_luma8();
        let palm = roi::normalize(&gray, landmarks, &self.config.roi)?;
        debug!("Normalized palm: {:?}", palm);

        let mut extractor =
            CreaseExtractor::new(self.config.extraction.clone()).with_verbose(self.verbose);
        if let Some(dir) = &self.debug_dir {
            extractor = extractor.with_debug(dir.clone());
        }
        let raw = extractor.extract(&palm)?;

        let classifier = LineClassifier::new(self.config.classifier.clone());
        let lines = classifier.classify(
            &raw,
            &palm.landmarks,
            palm.crop.dimensions(),
            &palm.to_image,
        );

        if self.verbose {
            for line in lines.iter() {
                info!(
                    "{}: {} segment(s), confidence {:.2}",
                    line.kind,
                    line.segments.len(),
                    line.confidence
                );
            }
        }

        Ok(Detection {
            lines,
            palm_size: palm.palm_size,
            corners: palm.corners,
        })
    }
}
