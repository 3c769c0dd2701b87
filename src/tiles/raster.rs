/// Decoded rasters and the two-tier decode path
///
/// Source images and live tiles arrive as encoded bytes. Decoding is tried
/// in two tiers, like the tiered thumbnail extraction it grew out of:
/// - Tier 1: the PNG decoder (what the canvas service and uploads use)
/// - Tier 2: format sniffing over every codec `image` was built with
///
/// Whichever tier succeeds decides the `SourceRaster` variant once; callers
/// only ever see `width`, `height` and `draw_into`.

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, RgbaImage};
use log::{debug, warn};
use std::io::Cursor;

use crate::error::{OverlayError, Result};

/// Axis-aligned rectangle in pixel units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A decoded image, whichever decode tier produced it
#[derive(Debug, Clone)]
pub enum SourceRaster {
    /// Tier 1: kept in the decoder's native pixel layout
    Decoded(DynamicImage),
    /// Tier 2: normalised to a flat RGBA8 buffer
    Buffer(RgbaImage),
}

impl SourceRaster {
    pub fn width(&self) -> u32 {
        match self {
            SourceRaster::Decoded(img) => img.width(),
            SourceRaster::Buffer(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            SourceRaster::Decoded(img) => img.height(),
            SourceRaster::Buffer(img) => img.height(),
        }
    }

    /// Copy `src` from this raster into `dst` of `target`, scaling with
    /// nearest-neighbour sampling. Pixels falling outside either image are
    /// skipped.
    pub fn draw_into(&self, target: &mut RgbaImage, src: Rect, dst: Rect) {
        if src.is_empty() || dst.is_empty() {
            return;
        }

        let (tw, th) = target.dimensions();
        let (sw, sh) = (self.width(), self.height());

        for dy in 0..dst.height {
            let ty = dst.y + dy;
            if ty >= th {
                break;
            }
            let sy = src.y + (dy as u64 * src.height as u64 / dst.height as u64) as u32;
            if sy >= sh {
                continue;
            }

            for dx in 0..dst.width {
                let tx = dst.x + dx;
                if tx >= tw {
                    break;
                }
                let sx = src.x + (dx as u64 * src.width as u64 / dst.width as u64) as u32;
                if sx >= sw {
                    continue;
                }
                target.put_pixel(tx, ty, self.pixel(sx, sy));
            }
        }
    }

    fn pixel(&self, x: u32, y: u32) -> image::Rgba<u8> {
        match self {
            SourceRaster::Decoded(img) => img.get_pixel(x, y),
            SourceRaster::Buffer(img) => *img.get_pixel(x, y),
        }
    }

    /// Flatten into an owned RGBA8 buffer
    pub fn into_rgba(self) -> RgbaImage {
        match self {
            SourceRaster::Decoded(img) => img.into_rgba8(),
            SourceRaster::Buffer(img) => img,
        }
    }
}

/// Decode image bytes, trying the PNG decoder first and format sniffing
/// second. Fails only when both tiers fail.
pub fn decode_raster(bytes: &[u8]) -> Result<SourceRaster> {
    if bytes.is_empty() {
        return Err(OverlayError::Decode("empty image data".into()));
    }

    // Tier 1: PNG decoder
    let primary_err = match image::load_from_memory_with_format(bytes, ImageFormat::Png) {
        Ok(img) => {
            debug!("Decoded {}x{} raster with the PNG decoder", img.width(), img.height());
            return Ok(SourceRaster::Decoded(img));
        }
        Err(e) => e,
    };

    // Tier 2: sniff the format
    warn!("PNG decode failed ({}), falling back to format detection", primary_err);
    let fallback = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| OverlayError::Decode(format!("format detection failed: {}", e)))?
        .decode()
        .map_err(|e| {
            OverlayError::Decode(format!(
                "primary decode failed ({}); fallback decode failed ({})",
                primary_err, e
            ))
        })?;

    debug!("Decoded {}x{} raster via format detection", fallback.width(), fallback.height());
    Ok(SourceRaster::Buffer(fallback.into_rgba8()))
}

/// Decode straight to RGBA8, for consumers that only need pixels
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    decode_raster(bytes).map(SourceRaster::into_rgba)
}
