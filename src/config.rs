//! Tunable parameters.
//!
//! Every numeric default here is a starting point to be calibrated against labelled palm
//! images, not a measured optimum.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PalmConfig {
    pub roi: RoiConfig,
    pub extraction: ExtractionConfig,
    pub classifier: ClassifierConfig,
    pub features: FeatureConfig,
    pub interpretation: InterpretationConfig,
    pub storage: StorageConfig,
}

impl PalmConfig {
    /// Load from a JSON file. Missing sections and fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {:?}", path))?;
        Ok(config)
    }

    /// Apply `PALMREAD_*` / `DEEPSEEK_API_KEY` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = env("PALMREAD_API_KEY").or_else(|| env("DEEPSEEK_API_KEY")) {
            self.interpretation.api_key = Some(key);
        }
        if let Some(base) = env("PALMREAD_API_BASE") {
            self.interpretation.api_base = base;
        }
        if let Some(model) = env("PALMREAD_MODEL") {
            self.interpretation.model = model;
        }
        if let Some(secs) = env("PALMREAD_REMOTE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.interpretation.remote_timeout_secs = secs;
        }
        self
    }

    pub fn with_image_dir(mut self, dir: PathBuf) -> Self {
        self.storage.image_dir = Some(dir);
        self
    }
}

/// ROI normalization and the rejection thresholds applied before it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    /// Input images are resized to this height before detection.
    pub working_height: u32,
    pub min_detection_score: f32,
    /// Minimum landmark bounding-box long side, as a fraction of the image long side.
    pub min_hand_fraction: f32,
    /// Margin around the rotated landmark box, as a fraction of its size.
    pub margin: f32,
    /// Long side of the canonical crop, in pixels.
    pub canonical_size: u32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            working_height: 1080,
            min_detection_score: 0.5,
            min_hand_fraction: 0.15,
            margin: 0.2,
            canonical_size: 512,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub blur_sigma: f32,
    /// Black-hat radius as a fraction of the crop width.
    pub blackhat_radius_fraction: f32,
    /// Minimum black-hat response for a ridge pixel.
    pub ridge_threshold: u8,
    /// Closing radius used to bridge small gaps after binarization.
    pub close_radius: u8,
    /// Minimum traced path length as a fraction of the crop long side.
    pub min_length_fraction: f32,
    pub min_pixels: u32,
    /// Black-hat response that maps to strength 1.0.
    pub strength_reference: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.2,
            blackhat_radius_fraction: 0.02,
            ridge_threshold: 15,
            close_radius: 2,
            min_length_fraction: 0.08,
            min_pixels: 12,
            strength_reference: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_overlap: f32,
    pub min_orientation: f32,
    /// Endpoint distance for chaining broken segments, as a fraction of the crop long side.
    pub chain_distance: f32,
    pub chain_max_angle_deg: f32,
    pub weight_overlap: f32,
    pub weight_orientation: f32,
    pub weight_strength: f32,
    pub weight_coverage: f32,
    /// Lines at or below this confidence are reported as not detected.
    pub min_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_overlap: 0.5,
            min_orientation: 0.35,
            chain_distance: 0.15,
            chain_max_angle_deg: 60.0,
            weight_overlap: 0.3,
            weight_orientation: 0.2,
            weight_strength: 0.2,
            weight_coverage: 0.3,
            min_confidence: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub long_life_ratio: f32,
    pub long_heart_ratio: f32,
    pub long_head_ratio: f32,
    /// Fork radius as a fraction of the palm size.
    pub fork_radius: f32,
    pub high_curvature_ratio: f32,
    pub medium_curvature_ratio: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            long_life_ratio: 0.6,
            long_heart_ratio: 0.6,
            long_head_ratio: 0.5,
            fork_radius: 0.04,
            high_curvature_ratio: 1.25,
            medium_curvature_ratio: 1.08,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpretationConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub remote_timeout_secs: u64,
    /// After a remote failure, stay local for this long before trying remote again.
    pub remote_cooldown_secs: u64,
}

impl InterpretationConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn remote_cooldown(&self) -> Duration {
        Duration::from_secs(self.remote_cooldown_secs)
    }
}

impl Default for InterpretationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 1.3,
            remote_timeout_secs: 20,
            remote_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where uploaded and annotated images live; a temporary directory when unset.
    pub image_dir: Option<PathBuf>,
    /// URL prefix for stored images.
    pub image_url_prefix: Option<String>,
}

impl StorageConfig {
    pub fn url_prefix(&self) -> &str {
        self.image_url_prefix.as_deref().unwrap_or("/images")
    }
}
