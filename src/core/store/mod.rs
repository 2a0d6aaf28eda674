mod images;
mod memory;
mod sqlite;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::detection::landmarks::Handedness;
use crate::models::{CreaseLine, LineSet};

pub use images::{ImageRef, ImageVault};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Identifier of one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(Uuid);

impl DataId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DataId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DataId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandInfo {
    pub label: Handedness,
    pub score: f32,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub data_id: DataId,
    pub source_image: ImageRef,
    pub clean_image: ImageRef,
    pub annotated_image: ImageRef,
    pub hand_info: HandInfo,
    /// Length scale for feature analysis, in original pixels
    pub palm_size: f32,
    pub lines: LineSet,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDetection {
    pub source_image: ImageRef,
    pub clean_image: ImageRef,
    pub annotated_image: ImageRef,
    pub hand_info: HandInfo,
    pub palm_size: f32,
    pub lines: LineSet,
}

impl NewDetection {
    /// Assign an id and timestamps.
    pub(crate) fn into_record(self) -> DetectionRecord {
        let now = OffsetDateTime::now_utc();
        DetectionRecord {
            data_id: DataId::new(),
            source_image: self.source_image,
            clean_image: self.clean_image,
            annotated_image: self.annotated_image,
            hand_info: self.hand_info,
            palm_size: self.palm_size,
            lines: self.lines,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Detection {0} not found")]
    NotFound(DataId),

    #[error("Invalid correction: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub trait DetectionRepository: Send + Sync {
    fn create(
        &self,
        detection: NewDetection,
    ) -> impl Future<Output = Result<DetectionRecord, StoreError>> + Send;

    fn get(&self, id: &DataId) -> impl Future<Output = Result<DetectionRecord, StoreError>> + Send;

    /// Replace the line mapping of a record. Image references and hand info are untouched.
    fn update_lines(
        &self,
        id: &DataId,
        lines: LineSet,
    ) -> impl Future<Output = Result<DetectionRecord, StoreError>> + Send;
}

/// Confidence of corrected lines: unchanged geometry keeps the stored value, anything else
/// non-empty is human-verified (1.0), empty lines are not detected (0).
pub fn merge_corrected(previous: &LineSet, corrected: LineSet) -> LineSet {
    let mut merged = LineSet::empty();
    for line in corrected.iter() {
        let old = previous.get(line.kind);
        let confidence = if line.is_detected() && line.same_geometry(old) {
            old.confidence
        } else {
            1.0
        };
        merged.set(CreaseLine::detected(line.kind, line.segments.clone(), confidence));
    }
    merged
}
