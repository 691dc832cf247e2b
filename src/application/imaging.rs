use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};

use crate::domain::errors::{DomainError, DomainResult};

/// Target size after fitting `width`x`height` into the max box, or `None` if it already fits.
/// Aspect ratio is preserved and frames are never upscaled.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return None;
    }
    let scale = (f64::from(max_width) / f64::from(width)).min(f64::from(max_height) / f64::from(height));
    let w = ((f64::from(width) * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((f64::from(height) * scale).round() as u32).clamp(1, max_height.max(1));
    Some((w, h))
}

pub fn downscale_to_fit(frame: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    match fit_within(frame.width(), frame.height(), max_width, max_height) {
        Some((w, h)) => image::imageops::resize(&frame, w, h, FilterType::Triangle),
        None => frame,
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> DomainResult<Vec<u8>> {
    let mut jpeg = Vec::with_capacity(frame.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(frame)
        .map_err(|e| DomainError::OperationFailed(format!("JPEG encode failed: {e}")))?;
    Ok(jpeg)
}
