//! Pre-validation of uploaded images against the remote service's limits.
//!
//! Images inside the limits pass through untouched. Images that are too large
//! (in pixels or bytes) are downscaled with aspect ratio preserved and
//! re-encoded as JPEG, stepping the quality down until the file fits.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use thiserror::Error;

// --- Limits of the remote detect endpoint ---
pub const MIN_DIMENSION: u32 = 48;
pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_FILE_SIZE: usize = 2 * 1024 * 1024;

/// First re-encode attempt; if it does not fit, the step-down below follows.
const INITIAL_JPEG_QUALITY: u8 = 85;
const STEP_DOWN_START_QUALITY: u8 = 70;
const STEP_DOWN_MIN_QUALITY: u8 = 20;
const STEP_DOWN_QUALITY_STEP: u8 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("empty image")]
    Empty,
    #[error("invalid image format or corrupted image file: {0}")]
    UnsupportedFormat(String),
    #[error("image dimensions too small: {width}x{height}, minimum is {min}x{min} pixels")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("unable to compress image below {max} bytes (smallest attempt was {size} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("failed to re-encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub max_file_size: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            min_dimension: MIN_DIMENSION,
            max_dimension: MAX_DIMENSION,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

/// An image ready to send to the detect endpoint.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// JPEG quality used if the image had to be re-encoded.
    pub reencoded_quality: Option<u8>,
}

/// Validate `data` against `limits`, resizing and recompressing if needed.
pub fn validate_image(data: &[u8], limits: &ImageLimits) -> Result<ValidatedImage, ImageError> {
    if data.is_empty() {
        return Err(ImageError::Empty);
    }

    let (width, height) = reader(data)?
        .into_dimensions()
        .map_err(|e| ImageError::UnsupportedFormat(e.to_string()))?;
    check_min(width, height, limits.min_dimension)?;

    let oversized = width > limits.max_dimension || height > limits.max_dimension;
    if !oversized && data.len() <= limits.max_file_size {
        return Ok(ValidatedImage {
            bytes: data.to_vec(),
            width,
            height,
            reencoded_quality: None,
        });
    }

    let mut img = reader(data)?
        .decode()
        .map_err(|e| ImageError::UnsupportedFormat(e.to_string()))?;

    if oversized {
        img = img.resize(limits.max_dimension, limits.max_dimension, FilterType::Lanczos3);
        tracing::debug!(
            from_width = width,
            from_height = height,
            to_width = img.width(),
            to_height = img.height(),
            "downscaled oversized image"
        );
        // An extreme aspect ratio can push the short side under the minimum.
        check_min(img.width(), img.height(), limits.min_dimension)?;
    }

    let (bytes, quality) = compress_to_fit(&img, limits.max_file_size)?;
    tracing::debug!(size = bytes.len(), quality, "re-encoded image as JPEG");

    Ok(ValidatedImage {
        bytes,
        width: img.width(),
        height: img.height(),
        reencoded_quality: Some(quality),
    })
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ImageError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageError::UnsupportedFormat(e.to_string()))
}

fn check_min(width: u32, height: u32, min: u32) -> Result<(), ImageError> {
    if width < min || height < min {
        return Err(ImageError::TooSmall { width, height, min });
    }
    Ok(())
}

/// Quality ladder: 85, then 70, 60, ..., 20.
fn quality_steps() -> impl Iterator<Item = u8> {
    std::iter::once(INITIAL_JPEG_QUALITY).chain(
        (STEP_DOWN_MIN_QUALITY..=STEP_DOWN_START_QUALITY)
            .rev()
            .step_by(STEP_DOWN_QUALITY_STEP as usize),
    )
}

fn compress_to_fit(img: &DynamicImage, max_size: usize) -> Result<(Vec<u8>, u8), ImageError> {
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut smallest = usize::MAX;

    for quality in quality_steps() {
        let mut buf = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        if buf.len() <= max_size {
            return Ok((buf, quality));
        }
        smallest = smallest.min(buf.len());
    }

    Err(ImageError::TooLarge {
        size: smallest,
        max: max_size,
    })
}
