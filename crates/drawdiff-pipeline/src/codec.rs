//! Image codec: transport strings and encoded bytes to in-memory rasters
//! and back.
//!
//! Decoding accepts whatever the `image` crate recognises (PNG, JPEG,
//! BMP, WebP). Transport payloads are base64, optionally wrapped in a
//! data URL (`data:image/png;base64,<payload>`). Encoding defaults to
//! PNG, which is lossless and deterministic.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};

use crate::types::PipelineError;

/// Decode raw image bytes, preserving the source colour type.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    Ok(image::load_from_memory(bytes)?)
}

/// Strip an optional data-URL prefix and base64-decode the payload.
///
/// Everything up to and including the first `,` is treated as the prefix.
///
/// # Errors
///
/// Returns [`PipelineError::Base64`] if the payload is not valid base64.
pub fn decode_base64(transport: &str) -> Result<Vec<u8>, PipelineError> {
    let payload = transport
        .split_once(',')
        .map_or(transport, |(_, payload)| payload);
    let compact: String = payload.split_whitespace().collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode a transport-encoded (base64 / data URL) image.
///
/// # Errors
///
/// Propagates [`decode_base64`] and [`decode`] failures.
pub fn decode_transport(transport: &str) -> Result<DynamicImage, PipelineError> {
    let bytes = decode_base64(transport)?;
    decode(&bytes)
}

/// Encode an image into the given container format.
///
/// # Errors
///
/// Returns [`PipelineError::ImageEncode`] if the format cannot represent
/// the image's colour type or the encoder fails.
pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(PipelineError::ImageEncode)?;
    Ok(buf.into_inner())
}

/// Encode an image as PNG.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    encode(image, ImageFormat::Png)
}

/// Encode an image as a PNG data URL.
///
/// # Errors
///
/// See [`encode`].
pub fn to_data_url(image: &DynamicImage) -> Result<String, PipelineError> {
    let png = encode_png(image)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
