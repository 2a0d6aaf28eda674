mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from palmread for tests
pub use palmread::analysis::interpret::{HandReading, InterpretationMode, LineReading, local_reading};
pub use palmread::analysis::{FeatureTag, LanguageModel};
pub use palmread::core::store::{DataId, DetectionRepository, ImageVault, MemoryStore, SqliteStore};
pub use palmread::detection::landmarks::{DetectedHand, Handedness, StaticLandmarkDetector};
pub use palmread::{CorrectionPayload, LineKind, PalmConfig, PalmService, ServiceError};
