//! Decoding, resizing and encoding page images.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView as _, ImageFormat, imageops::FilterType};

use crate::{error::OcrError, prelude::*};

/// The longest side we send to a vision model.
pub const MAX_IMAGE_SIZE: u32 = 1024;

/// Decode image bytes into an RGB image.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, OcrError> {
    let image = image::load_from_memory(data)
        .map_err(|err| OcrError::ImageDecoding(err.to_string()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Compute the dimensions of `(width, height)` after shrinking the longest
/// side to `max_size`. Images that already fit are returned unchanged.
pub fn fit_dimensions(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width <= max_size && height <= max_size {
        return (width, height);
    }
    let scale = |side: u32, longest: u32| {
        let scaled = u64::from(side) * u64::from(max_size) / u64::from(longest);
        u32::try_from(scaled).unwrap_or(max_size).max(1)
    };
    if width > height {
        (max_size, scale(height, width))
    } else {
        (scale(width, height), max_size)
    }
}

/// Shrink an image so its longest side is at most `max_size`, preserving the
/// aspect ratio.
pub fn resize_to_max(image: &DynamicImage, max_size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = fit_dimensions(width, height, max_size);
    if (new_width, new_height) == (width, height) {
        return image.clone();
    }
    trace!(width, height, new_width, new_height, "Resizing image");
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Encode an image as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("failed to encode image as PNG")?;
    Ok(buf)
}
