pub mod analysis;
pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod service;

pub use config::PalmConfig;
pub use core::store::{DataId, DetectionRecord, DetectionRepository, MemoryStore, SqliteStore};
pub use detection::PalmDetector;
pub use error::{DetectionError, ErrorBody, ServiceError};
pub use models::{CorrectionPayload, CreaseLine, ImagePoint, LineKind, LineSet, Segment};
pub use pipeline::{Pipeline, PipelineData, PipelineStep};
pub use service::{CorrectionAck, DetectionResult, PalmService};
