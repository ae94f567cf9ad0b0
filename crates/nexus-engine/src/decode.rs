use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use nexus_contracts::RawImagePayload;
use thiserror::Error;

pub const DEFAULT_DOWNLOAD_PREFIX: &str = "nexus_ai_image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Normalization,
    Decode,
}

/// Why one item of a batch could not be shown. Never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemFailure {
    #[error("no image data in response item")]
    NoImageData,
    #[error("image payload is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("image payload is not a supported raster format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to re-encode image as PNG: {0}")]
    ReencodeFailed(String),
}

impl ItemFailure {
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::NoImageData => FailureStage::Normalization,
            Self::InvalidEncoding(_) | Self::UnsupportedFormat(_) | Self::ReencodeFailed(_) => {
                FailureStage::Decode
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoImageData => "no_image_data",
            Self::InvalidEncoding(_) => "invalid_encoding",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::ReencodeFailed(_) => "reencode_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBitmap {
    pub pixels: DynamicImage,
    /// PNG re-encoding of `pixels`, whatever the backend sent.
    pub encoded_png: Vec<u8>,
    pub source_format: ImageFormat,
}

impl DecodedBitmap {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Decoded(DecodedBitmap),
    DeferredUrl { url: String },
    Failed(ItemFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayImage {
    pub index: usize,
    pub outcome: ImageOutcome,
}

impl DisplayImage {
    pub fn bitmap(&self) -> Option<&DecodedBitmap> {
        match &self.outcome {
            ImageOutcome::Decoded(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    pub fn deferred_url(&self) -> Option<&str> {
        match &self.outcome {
            ImageOutcome::DeferredUrl { url } => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match &self.outcome {
            ImageOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// File name for the PNG download, only for decoded images.
    pub fn download_filename(&self, prefix: &str) -> Option<String> {
        self.bitmap().map(|_| download_filename(prefix, self.index))
    }
}

/// `{prefix}_{n}.png` with a 1-based ordinal.
pub fn download_filename(prefix: &str, index: usize) -> String {
    format!("{prefix}_{}.png", index + 1)
}

pub fn decode(payload: &RawImagePayload, index: usize) -> DisplayImage {
    let outcome = match payload {
        RawImagePayload::InlineBase64 { data } => match decode_inline(data) {
            Ok(bitmap) => ImageOutcome::Decoded(bitmap),
            Err(failure) => ImageOutcome::Failed(failure),
        },
        RawImagePayload::RemoteUrl { url } => ImageOutcome::DeferredUrl { url: url.clone() },
        RawImagePayload::Unrecognized => ImageOutcome::Failed(ItemFailure::NoImageData),
    };
    if let ImageOutcome::Failed(failure) = &outcome {
        tracing::debug!(index, code = failure.code(), "image item failed: {failure}");
    }
    DisplayImage { index, outcome }
}

fn decode_inline(data: &str) -> Result<DecodedBitmap, ItemFailure> {
    let bytes = BASE64
        .decode(base64_body(data))
        .map_err(|err| ItemFailure::InvalidEncoding(err.to_string()))?;
    let source_format =
        image::guess_format(&bytes).map_err(|err| ItemFailure::UnsupportedFormat(err.to_string()))?;
    let pixels = image::load_from_memory_with_format(&bytes, source_format)
        .map_err(|err| ItemFailure::UnsupportedFormat(err.to_string()))?;
    let encoded_png = encode_png(&pixels)?;
    Ok(DecodedBitmap {
        pixels,
        encoded_png,
        source_format,
    })
}

/// Drops a `data:<mime>;base64,` prefix and any line wrapping.
fn base64_body(data: &str) -> String {
    let trimmed = data.trim();
    let body = match trimmed.split_once(',') {
        Some((header, body)) if header.starts_with("data:") && header.ends_with(";base64") => body,
        _ => trimmed,
    };
    body.chars().filter(|ch| !ch.is_ascii_whitespace()).collect()
}

fn encode_png(pixels: &DynamicImage) -> Result<Vec<u8>, ItemFailure> {
    let mut buffer = Cursor::new(Vec::new());
    let written = match pixels {
        // PNG has no float channels.
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(pixels.to_rgba8()).write_to(&mut buffer, ImageFormat::Png)
        }
        _ => pixels.write_to(&mut buffer, ImageFormat::Png),
    };
    written.map_err(|err| ItemFailure::ReencodeFailed(err.to_string()))?;
    Ok(buffer.into_inner())
}
