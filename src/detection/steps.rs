use crate::pipeline::{PipelineData, PipelineStep, PipelineContext};
use crate::detection::{preprocessing, skeleton};
use anyhow::Result;
use image::{GrayImage, Luma};

/// Layer key under which the black-hat ridge response is kept for strength scoring
pub const RIDGE_RESPONSE: &str = "ridge_response";

/// Equalize the histogram and blur lightly to even out lighting across the palm
pub struct ContrastStep {
    pub sigma: f32,
}

impl PipelineStep for ContrastStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let enhanced = preprocessing::enhance_contrast(&data.image, self.sigma);
        Ok(data.with_image(enhanced))
    }

    fn name(&self) -> &str {
        "Contrast Enhancement"
    }
}

/// Morphological black-hat: closing minus image, keeps thin dark ridges
pub struct BlackHatStep {
    pub radius: u8,
}

impl PipelineStep for BlackHatStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let response = preprocessing::black_hat(&data.image, self.radius);
        Ok(data
            .with_layer(RIDGE_RESPONSE, response.clone())
            .with_image(response))
    }

    fn name(&self) -> &str {
        "Black Hat"
    }
}

/// Binarize the ridge response inside the palm mask
pub struct RidgeThresholdStep {
    pub threshold: u8,
}

impl PipelineStep for RidgeThresholdStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let mask = data.mask.clone();
        let (width, height) = data.image.dimensions();
        if mask.dimensions() != (width, height) {
            anyhow::bail!(
                "Palm mask is {:?}, image is {:?}",
                mask.dimensions(),
                (width, height)
            );
        }

        let binary = GrayImage::from_fn(width, height, |x, y| {
            let inside = mask.get_pixel(x, y)[0] > 0;
            let ridge = data.image.get_pixel(x, y)[0] >= self.threshold;
            Luma([if inside && ridge { 255 } else { 0 }])
        });
        Ok(data.with_image(binary))
    }

    fn name(&self) -> &str {
        "Ridge Threshold"
    }
}

/// Remove speckle with an opening, then bridge small gaps with a closing
pub struct CleanupStep {
    pub close_radius: u8,
}

impl PipelineStep for CleanupStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let cleaned = preprocessing::open_close(&data.image, self.close_radius);

        // Closing can grow past the palm outline
        let mask = data.mask.clone();
        let clipped = GrayImage::from_fn(cleaned.width(), cleaned.height(), |x, y| {
            if mask.get_pixel(x, y)[0] > 0 {
                *cleaned.get_pixel(x, y)
            } else {
                Luma([0])
            }
        });
        Ok(data.with_image(clipped))
    }

    fn name(&self) -> &str {
        "Cleanup"
    }
}

/// Thin ridges to 1-pixel-wide skeletons
pub struct ThinningStep;

impl PipelineStep for ThinningStep {
    fn process(&self, data: PipelineData, _context: &PipelineContext) -> Result<PipelineData> {
        let skeleton = skeleton::thin(&data.image);
        Ok(data.with_image(skeleton))
    }

    fn name(&self) -> &str {
        "Thinning"
    }
}
