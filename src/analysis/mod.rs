//! Feature analysis of detected lines and their interpretation.

pub mod features;
pub mod interpret;
pub mod llm;

pub use features::{FeatureTag, LineFeature, analyze_lines};
pub use interpret::{HandReading, InterpretationEngine, InterpretationMode, LineReading};
pub use llm::{ChatCompletionsClient, LanguageModel};
