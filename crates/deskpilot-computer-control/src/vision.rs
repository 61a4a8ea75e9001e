//! Screenshot sizing for vision models.
//!
//! Vision APIs downscale large images server-side, which silently breaks any
//! pixel coordinates the model reports back. Screenshots are therefore
//! resized locally with [`fit_for_vision`], and the coordinate mapper calls
//! the same function to recover the size of the image the model actually saw.

use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::types::Screenshot;
use crate::AutomationError;

/// Size ceiling for images sent to a vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionLimits {
    /// Longest edge in pixels
    pub max_edge: u32,
    /// Total pixel count
    pub max_pixels: u64,
}

impl Default for VisionLimits {
    fn default() -> Self {
        Self {
            max_edge: 1568,
            max_pixels: 1_150_000,
        }
    }
}

impl VisionLimits {
    pub fn with_max_edge(max_edge: u32) -> Self {
        Self {
            max_edge,
            ..Self::default()
        }
    }
}

/// Dimensions an image of `width`×`height` is resized to before upload.
/// Aspect ratio is kept; images already inside the limits are unchanged.
pub fn fit_for_vision(width: u32, height: u32, limits: VisionLimits) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let (w, h) = (width as f64, height as f64);
    let mut scale = 1.0_f64;

    let long_edge = w.max(h);
    if long_edge > limits.max_edge as f64 {
        scale = limits.max_edge as f64 / long_edge;
    }

    let pixels = w * h * scale * scale;
    if pixels > limits.max_pixels as f64 {
        scale *= (limits.max_pixels as f64 / pixels).sqrt();
    }

    if scale >= 1.0 {
        return (width, height);
    }

    (
        ((w * scale).floor() as u32).max(1),
        ((h * scale).floor() as u32).max(1),
    )
}

/// Decode a raw capture, resize it with [`fit_for_vision`] and encode it as
/// base64 JPEG.
pub fn prepare_for_vision(bytes: &[u8], limits: VisionLimits) -> Result<Screenshot, AutomationError> {
    let img = image::load_from_memory(bytes).map_err(|e| AutomationError::Image(e.to_string()))?;
    let (original_width, original_height) = img.dimensions();
    let (width, height) = fit_for_vision(original_width, original_height, limits);

    let resized = if (width, height) == (original_width, original_height) {
        img
    } else {
        tracing::debug!(
            "Resizing screenshot {}x{} -> {}x{}",
            original_width,
            original_height,
            width,
            height
        );
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut encoded = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Jpeg(80))
        .map_err(|e| AutomationError::Image(e.to_string()))?;

    Ok(Screenshot {
        data: base64::engine::general_purpose::STANDARD.encode(&encoded),
        media_type: "image/jpeg".to_string(),
        width,
        height,
        original_width,
        original_height,
        region: None,
    })
}
