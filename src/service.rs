//! The three boundary operations: detect, analyze a hand, correct its lines.
//!
//! Any transport (HTTP, CLI) binds these methods; errors carry a stable code and a
//! suggestion through [`ServiceError::to_body`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::features::analyze_lines;
use crate::analysis::interpret::{HandReading, InterpretationEngine};
use crate::analysis::llm::LanguageModel;
use crate::config::PalmConfig;
use crate::core::store::{
    DataId, DetectionRecord, DetectionRepository, HandInfo, ImageVault, NewDetection, StoreError,
};
use crate::detection::PalmDetector;
use crate::detection::landmarks::{LandmarkDetector, Landmarks};
use crate::detection::preprocessing::{decode_oriented, resize_to_height};
use crate::error::{DetectionError, ServiceError};
use crate::models::{CorrectionPayload, LineKind, LineSet, Segment};
use crate::render::render_annotated;

/// Successful detection, as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub data_id: DataId,
    pub hand_info: HandInfo,
    pub lines: BTreeMap<LineKind, Vec<Segment>>,
    pub confidences: BTreeMap<LineKind, f32>,
    pub image_url: String,
    pub clean_image_url: String,
}

impl From<&DetectionRecord> for DetectionResult {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            data_id: record.data_id,
            hand_info: record.hand_info,
            lines: record.lines.segments_by_kind(),
            confidences: record.lines.confidences(),
            image_url: record.annotated_image.url.clone(),
            clean_image_url: record.clean_image.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectionAck {
    pub status: &'static str,
}

impl CorrectionAck {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

pub struct PalmService<R, M> {
    config: Arc<PalmConfig>,
    landmark_detector: Arc<dyn LandmarkDetector>,
    store: Arc<R>,
    vault: Arc<ImageVault>,
    engine: InterpretationEngine<M>,
    verbose: bool,
    debug_dir: Option<PathBuf>,
}

impl<R, M> PalmService<R, M>
where
    R: DetectionRepository + 'static,
    M: LanguageModel,
{
    pub fn new(
        config: PalmConfig,
        landmark_detector: Arc<dyn LandmarkDetector>,
        store: Arc<R>,
        vault: Arc<ImageVault>,
        model: Option<M>,
    ) -> Self {
        let engine = InterpretationEngine::new(model, &config.interpretation);
        Self {
            config: Arc::new(config),
            landmark_detector,
            store,
            vault,
            engine,
            verbose: false,
            debug_dir: None,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Write the intermediate extraction images of the next detection into `dir`.
    pub fn with_debug(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    pub fn vault(&self) -> &Arc<ImageVault> {
        &self.vault
    }

    pub async fn record(&self, data_id: &DataId) -> Result<DetectionRecord, ServiceError> {
        Ok(self.store.get(data_id).await?)
    }

    /// Detect the hand and its lines, persist the images and the record.
    pub async fn detect(&self, image_bytes: Vec<u8>) -> Result<DetectionResult, ServiceError> {
        let job = DetectionJob {
            config: self.config.clone(),
            landmark_detector: self.landmark_detector.clone(),
            vault: self.vault.clone(),
            verbose: self.verbose,
            debug_dir: self.debug_dir.clone(),
        };
        let new_detection = tokio::task::spawn_blocking(move || job.run(&image_bytes))
            .await
            .map_err(|e| anyhow::anyhow!("Detection task failed: {}", e))??;

        let record = self.store.create(new_detection).await?;
        info!(
            "Detection {}: {}",
            record.data_id,
            record
                .lines
                .iter()
                .map(|l| format!("{} {:.2}", l.kind, l.confidence))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(DetectionResult::from(&record))
    }

    /// Features and readings for the current (possibly corrected) lines.
    pub async fn analyze_hand(&self, data_id: &DataId) -> Result<HandReading, ServiceError> {
        // The record is a clone; no store lock is held during the remote call
        let record = self.store.get(data_id).await?;
        let features = analyze_lines(&record.lines, record.palm_size, &self.config.features);
        for f in &features {
            debug!("{} {}: {}", data_id, f.kind, f.summary());
        }
        Ok(self.engine.interpret(data_id, &features).await)
    }

    /// Replace the stored lines with a human correction.
    pub async fn correct(
        &self,
        data_id: &DataId,
        payload: &CorrectionPayload,
    ) -> Result<CorrectionAck, ServiceError> {
        let lines = LineSet::from_payload(payload).map_err(StoreError::Validation)?;
        self.store.update_lines(data_id, lines).await?;
        info!("Detection {} corrected", data_id);
        Ok(CorrectionAck::ok())
    }
}

/// Everything one detection needs on the blocking pool.
struct DetectionJob {
    config: Arc<PalmConfig>,
    landmark_detector: Arc<dyn LandmarkDetector>,
    vault: Arc<ImageVault>,
    verbose: bool,
    debug_dir: Option<PathBuf>,
}

impl DetectionJob {
    fn run(&self, image_bytes: &[u8]) -> Result<NewDetection, ServiceError> {
        let original = decode_oriented(image_bytes)
            .map_err(|e| DetectionError::InvalidImage(format!("{:#}", e)))?;
        let working = resize_to_height(&original, self.config.roi.working_height);
        let (width, height) = (working.width(), working.height());
        debug!("Working image {}x{}", width, height);

        let landmarks = self
            .landmark_detector
            .detect(&working)?
            .map(|hand| Landmarks::from_normalized(&hand, width, height))
            .transpose()?;

        let mut detector = PalmDetector::new((*self.config).clone()).with_verbose(self.verbose);
        if let Some(dir) = &self.debug_dir {
            detector = detector.with_debug(dir.clone());
        }
        let detection = detector.detect(&working, landmarks.as_ref())?;

        let hand_info = landmarks
            .as_ref()
            .map(|lm| HandInfo {
                label: lm.hand_label(),
                score: lm.detection_score,
                is_open: lm.is_open,
            })
            .ok_or(DetectionError::NoHandDetected)?;

        let clean = working.to_rgb8();
        let annotated = render_annotated(&clean, &detection.lines, Some(&detection.corners));

        let source_image = self.vault.store_bytes(image_bytes)?;
        let clean_image = self.vault.store_image(&DynamicImage::ImageRgb8(clean), "_clean")?;
        let annotated_image = self.vault.store_image(&DynamicImage::ImageRgb8(annotated), "_annotated")?;

        Ok(NewDetection {
            source_image,
            clean_image,
            annotated_image,
            hand_info,
            palm_size: detection.palm_size,
            lines: detection.lines,
        })
    }
}
