/// Tile payload encoding
///
/// A stored tile is its PNG bytes wrapped in standard base64 text so it can
/// live inside the JSON record. Encoding has a second method to fall back
/// on; decoding reuses the two-tier raster decode.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use log::warn;
use std::io::Cursor;

use crate::error::{OverlayError, Result};
use crate::tiles::raster::decode_rgba;

/// Encode an RGBA tile as PNG bytes. Tries the best-compression encoder
/// first and the default PNG writer second.
pub fn encode_png(tile: &RgbaImage) -> Result<Vec<u8>> {
    let mut primary = Vec::new();
    let primary_err = match PngEncoder::new_with_quality(
        &mut primary,
        CompressionType::Best,
        FilterType::Adaptive,
    )
    .write_image(tile.as_raw(), tile.width(), tile.height(), ExtendedColorType::Rgba8)
    {
        Ok(()) => return Ok(primary),
        Err(e) => e,
    };

    warn!("Best-compression PNG encode failed ({}), retrying with defaults", primary_err);
    let mut fallback = Vec::new();
    DynamicImage::ImageRgba8(tile.clone())
        .write_to(&mut Cursor::new(&mut fallback), ImageFormat::Png)
        .map_err(|e| {
            OverlayError::Encode(format!(
                "primary encode failed ({}); fallback encode failed ({})",
                primary_err, e
            ))
        })?;
    Ok(fallback)
}

/// Serialize a tile for the persisted record
pub fn encode_tile(tile: &RgbaImage) -> Result<String> {
    let png = encode_png(tile)?;
    Ok(STANDARD.encode(png))
}

/// Reverse of `encode_tile`
pub fn decode_tile(payload: &str) -> Result<RgbaImage> {
    let png = STANDARD.decode(payload.trim())?;
    decode_rgba(&png)
}
