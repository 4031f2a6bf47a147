//! Image decoding for verification inputs
//!
//! Uploads, base64 payloads and the self-test file all end up here. Size, emptiness and
//! content type are checked before decoding; EXIF orientation is applied after.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::prelude::*;
use image::DynamicImage;
use thiserror::Error;

pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unsupported content type: {content_type}")]
    UnsupportedType { content_type: String },

    #[error("Empty file")]
    Empty,

    #[error("File too large (>{limit} bytes)")]
    TooLarge { limit: usize },

    #[error("Invalid base64 image")]
    InvalidBase64,

    #[error("Cannot decode image: {reason}")]
    Decode { reason: String },

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode an uploaded file after checking its declared type and size
pub fn decode_upload(data: &[u8], content_type: Option<&str>, limit: usize) -> Result<DynamicImage, ImageError> {
    check_content_type(content_type.unwrap_or(""))?;
    check_size(data, limit)?;
    decode_image(data)
}

/// Decode raw base64 or a `data:image/...;base64,` URL
pub fn decode_base64(text: &str, limit: usize) -> Result<DynamicImage, ImageError> {
    let text = text.trim();
    let payload = match parse_data_url(text) {
        Some((mime, payload)) => {
            check_content_type(mime)?;
            payload
        }
        None => text,
    };

    let data = BASE64_STANDARD
        .decode(payload)
        .map_err(|_| ImageError::InvalidBase64)?;
    check_size(&data, limit)?;
    decode_image(&data)
}

/// Decode an image from disk
pub fn decode_file(path: &Path) -> Result<DynamicImage, ImageError> {
    let data = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(ImageError::Empty);
    }
    decode_image(&data)
}

/// Decode image from bytes with EXIF orientation handling
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, ImageError> {
    let image = image::load_from_memory(data).map_err(|e| ImageError::Decode {
        reason: e.to_string(),
    })?;
    Ok(apply_orientation(image, exif_orientation(data)))
}

fn check_content_type(content_type: &str) -> Result<(), ImageError> {
    let normalized = content_type.trim().to_ascii_lowercase();
    if ALLOWED_CONTENT_TYPES.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(ImageError::UnsupportedType {
            content_type: content_type.to_string(),
        })
    }
}

fn check_size(data: &[u8], limit: usize) -> Result<(), ImageError> {
    if data.is_empty() {
        return Err(ImageError::Empty);
    }
    if data.len() > limit {
        return Err(ImageError::TooLarge { limit });
    }
    Ok(())
}

/// Split `data:<mime>;base64,<payload>` (scheme is case-insensitive)
fn parse_data_url(text: &str) -> Option<(&str, &str)> {
    let scheme = text.get(..5)?;
    if !scheme.eq_ignore_ascii_case("data:") {
        return None;
    }
    let (header, payload) = text[5..].split_once(',')?;
    let (mime, encoding) = header.split_once(';')?;
    if !encoding.eq_ignore_ascii_case("base64") || payload.is_empty() {
        return None;
    }
    Some((mime, payload))
}

fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Undo the EXIF orientation tag (1..=8; anything else is left as-is)
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
