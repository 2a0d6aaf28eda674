use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_ellipse_mut};
use palmread::analysis::LanguageModel;
use palmread::core::store::{ImageVault, MemoryStore};
use palmread::detection::landmarks::{DetectedHand, Handedness, StaticLandmarkDetector};
use palmread::{CorrectionPayload, PalmConfig, PalmService};

pub const IMAGE_WIDTH: u32 = 600;
pub const IMAGE_HEIGHT: u32 = 800;

const SKIN: Rgb<u8> = Rgb([224, 180, 150]);
const CREASE: Rgb<u8> = Rgb([140, 95, 80]);
const BACKGROUND: Rgb<u8> = Rgb([245, 245, 245]);

/// Upright open hand, thumb on the image left, palm toward the camera, normalized to the
/// image size. Reported as `Right` by the detector.
const OPEN_HAND: [[f32; 2]; 21] = [
    [0.50, 0.92],
    [0.36, 0.85],
    [0.28, 0.75],
    [0.22, 0.66],
    [0.18, 0.58],
    [0.38, 0.50],
    [0.36, 0.38],
    [0.35, 0.30],
    [0.34, 0.22],
    [0.50, 0.48],
    [0.50, 0.34],
    [0.50, 0.25],
    [0.50, 0.16],
    [0.61, 0.50],
    [0.63, 0.37],
    [0.64, 0.29],
    [0.65, 0.22],
    [0.70, 0.55],
    [0.74, 0.46],
    [0.76, 0.40],
    [0.78, 0.34],
];

pub fn open_hand() -> DetectedHand {
    DetectedHand {
        points: OPEN_HAND.to_vec(),
        handedness: Handedness::Right,
        score: 0.95,
        is_open: Some(true),
    }
}

/// Same pose, reported as closed.
pub fn fist() -> DetectedHand {
    DetectedHand {
        is_open: Some(false),
        ..open_hand()
    }
}

/// The open hand flipped left to right under the same reported label: the back of the hand.
pub fn back_of_hand() -> DetectedHand {
    DetectedHand {
        points: OPEN_HAND.iter().map(|[x, y]| [1.0 - x, *y]).collect(),
        ..open_hand()
    }
}

/// The open hand shrunk into a corner of the frame.
pub fn tiny_hand() -> DetectedHand {
    DetectedHand {
        points: OPEN_HAND.iter().map(|[x, y]| [x * 0.1, y * 0.1]).collect(),
        ..open_hand()
    }
}

fn draw_crease(img: &mut RgbImage, points: &[[f32; 2]]) {
    for pair in points.windows(2) {
        let [x1, y1] = [pair[0][0] * IMAGE_WIDTH as f32, pair[0][1] * IMAGE_HEIGHT as f32];
        let [x2, y2] = [pair[1][0] * IMAGE_WIDTH as f32, pair[1][1] * IMAGE_HEIGHT as f32];
        let steps = ((x2 - x1).hypot(y2 - y1).ceil() as i32).max(1);
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let x = x1 + t * (x2 - x1);
            let y = y1 + t * (y2 - y1);
            draw_filled_circle_mut(img, (x.round() as i32, y.round() as i32), 2, CREASE);
        }
    }
}

const HEART: [[f32; 2]; 4] = [[0.70, 0.60], [0.60, 0.575], [0.50, 0.565], [0.40, 0.56]];
/// The heart line with a gap between x = 0.53 and x = 0.57.
const BROKEN_HEART: [&[[f32; 2]]; 2] = [
    &[[0.70, 0.60], [0.60, 0.575], [0.57, 0.572]],
    &[[0.53, 0.568], [0.50, 0.565], [0.40, 0.56]],
];
/// Head and life lines leave the same point between thumb and index finger.
const HEAD: [[f32; 2]; 4] = [[0.37, 0.63], [0.48, 0.655], [0.58, 0.68], [0.66, 0.71]];
const LIFE: [[f32; 2]; 4] = [[0.38, 0.64], [0.36, 0.72], [0.38, 0.80], [0.45, 0.88]];

/// A flat palm with three dark creases roughly where the heart, head and life lines sit.
pub fn palm_image() -> RgbImage {
    draw_palm(&[&HEART])
}

/// Same palm, heart line interrupted in the middle.
pub fn broken_heart_image() -> RgbImage {
    draw_palm(&BROKEN_HEART)
}

fn draw_palm(heart: &[&[[f32; 2]]]) -> RgbImage {
    let mut img = RgbImage::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, BACKGROUND);
    draw_filled_ellipse_mut(
        &mut img,
        ((0.52 * IMAGE_WIDTH as f32) as i32, (0.68 * IMAGE_HEIGHT as f32) as i32),
        (0.24 * IMAGE_WIDTH as f32) as i32,
        (0.24 * IMAGE_HEIGHT as f32) as i32,
        SKIN,
    );
    for piece in heart {
        draw_crease(&mut img, piece);
    }
    draw_crease(&mut img, &HEAD);
    draw_crease(&mut img, &LIFE);
    img
}

pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes.into_inner()
}

pub fn palm_png() -> Vec<u8> {
    encode_png(&palm_image())
}

/// Config for the synthetic image: no resize and no remote credentials.
pub fn test_config() -> PalmConfig {
    let mut config = PalmConfig::default();
    config.roi.working_height = IMAGE_HEIGHT;
    config.interpretation.api_key = None;
    config.interpretation.remote_timeout_secs = 2;
    config
}

/// What the mock language model does when called.
#[derive(Clone)]
pub enum MockBehavior {
    Reply(String),
    Fail,
}

#[derive(Clone)]
pub struct MockModel {
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LanguageModel for MockModel {
    async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Reply(reply) => Ok(reply.clone()),
            MockBehavior::Fail => anyhow::bail!("connection refused"),
        }
    }
}

pub type TestService = PalmService<MemoryStore, MockModel>;

/// Service over an in-memory store and a temporary image vault.
pub fn make_service(hand: Option<DetectedHand>, model: Option<MockModel>) -> TestService {
    let vault = ImageVault::temporary("/images").expect("Failed to create image vault");
    PalmService::new(
        test_config(),
        Arc::new(StaticLandmarkDetector::new(hand)),
        Arc::new(MemoryStore::new()),
        Arc::new(vault),
        model,
    )
}

pub fn payload(entries: &[(&str, Vec<Vec<[f64; 2]>>)]) -> CorrectionPayload {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Hand-drawn lines: one long life line, a heart line in two short pieces, no head line.
pub fn corrected_lines() -> CorrectionPayload {
    payload(&[
        (
            "life_line",
            vec![vec![[228.0, 512.0], [216.0, 576.0], [228.0, 640.0], [270.0, 704.0]]],
        ),
        (
            "heart_line",
            vec![
                vec![[420.0, 480.0], [405.0, 478.0]],
                vec![[330.0, 452.0], [315.0, 450.0]],
            ],
        ),
        ("head_line", vec![]),
    ])
}
