use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, grayscale_close, open, Mask};

/// Decode image bytes and apply the EXIF orientation, if any
pub fn decode_oriented(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Resize so the image is `target_height` pixels tall, keeping the aspect ratio
pub fn resize_to_height(img: &DynamicImage, target_height: u32) -> DynamicImage {
    if img.height() == target_height || img.height() == 0 {
        return img.clone();
    }
    let scale = target_height as f32 / img.height() as f32;
    let new_width = ((img.width() as f32 * scale).round() as u32).max(1);
    // Downscaling wants an area-like filter, upscaling a smooth one
    let filter = if scale < 1.0 {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    };
    img.resize_exact(new_width, target_height, filter)
}

/// Histogram equalization followed by a Gaussian blur
pub fn enhance_contrast(img: &GrayImage, sigma: f32) -> GrayImage {
    let equalized = equalize_histogram(img);
    if sigma > 0.0 {
        gaussian_blur_f32(&equalized, sigma)
    } else {
        equalized
    }
}

/// Grayscale closing minus the image: bright where thin dark structures are
pub fn black_hat(img: &GrayImage, radius: u8) -> GrayImage {
    let closed = grayscale_close(img, &Mask::square(radius.max(1)));
    let mut out = GrayImage::new(img.width(), img.height());
    for ((dst, c), o) in out.pixels_mut().zip(closed.pixels()).zip(img.pixels()) {
        dst[0] = c[0].saturating_sub(o[0]);
    }
    out
}

/// Binary opening (radius 1) then closing (`close_radius`)
pub fn open_close(binary: &GrayImage, close_radius: u8) -> GrayImage {
    let opened = open(binary, Norm::LInf, 1);
    if close_radius == 0 {
        return opened;
    }
    close(&opened, Norm::LInf, close_radius)
}
