use image::GrayImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Result;
use tracing::debug;

/// Data that flows through the ridge-extraction pipeline
#[derive(Clone)]
pub struct PipelineData {
    /// The current working image
    pub image: GrayImage,

    /// Palm region mask (255 = inside), same size as the crop
    pub mask: Arc<GrayImage>,

    /// Named intermediate images later steps or the caller need (e.g. the ridge response)
    pub layers: HashMap<String, GrayImage>,
}

impl PipelineData {
    /// Start from a canonical crop and its palm mask
    pub fn new(crop: GrayImage, mask: GrayImage) -> Self {
        Self {
            image: crop,
            mask: Arc::new(mask),
            layers: HashMap::new(),
        }
    }

    /// Replace the working image
    pub fn with_image(mut self, image: GrayImage) -> Self {
        self.image = image;
        self
    }

    /// Keep a copy of an intermediate image under `key`
    pub fn with_layer(mut self, key: impl Into<String>, layer: GrayImage) -> Self {
        self.layers.insert(key.into(), layer);
        self
    }

    pub fn layer(&self, key: &str) -> Option<&GrayImage> {
        self.layers.get(key)
    }
}

/// Context available to all pipeline steps
#[derive(Clone, Default)]
pub struct PipelineContext {
    pub verbose: bool,
    /// Where intermediate images are written, if anywhere
    pub debug_dir: Option<PathBuf>,
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Transform the data
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData>;

    /// Human-readable name for this step (used in logs and debug file names)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext::default(),
        }
    }

    /// Enable verbose output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.context.verbose = verbose;
        self
    }

    /// Write every intermediate image to `output_dir`, which must be empty or missing
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug_dir = Some(output_dir);

        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run all steps in order
    pub fn run(&self, input: PipelineData) -> Result<PipelineData> {
        self.save_debug_image(0, "input", &input.image)?;

        let mut data = input;
        for (step_idx, step) in self.steps.iter().enumerate() {
            if self.context.verbose {
                debug!("Running step: {}", step.name());
            }
            data = step.process(data, &self.context)?;
            self.save_debug_image(step_idx + 1, step.name(), &data.image)?;
        }

        Ok(data)
    }

    fn save_debug_image(&self, index: usize, step_name: &str, image: &GrayImage) -> Result<()> {
        let Some(dir) = &self.context.debug_dir else {
            return Ok(());
        };

        let filename = format!(
            "{:02}_{}.png",
            index,
            step_name.to_lowercase().replace(' ', "_")
        );
        let output_path = dir.join(&filename);
        image
            .save(&output_path)
            .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;

        if self.context.verbose {
            debug!("Debug: saved {}", filename);
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
