/// Crosshair overlay
///
/// Marks the transparent cells around every enhanced center pixel that is
/// not painted correctly yet, so the missing pixel stands out on the canvas:
/// - orthogonal neighbours get the configured crosshair color
/// - diagonal neighbours get the fixed corner color when borders are on
///
/// Cells over already painted canvas pixels are never marked.

use image::{Rgba, RgbaImage};
use log::{debug, info};
use std::collections::HashMap;

use crate::analysis::progress::{classify_pixel, live_pixel, validate_chunk, PixelClassification};
use crate::color::{ColorFilter, ColorKey, EnhancedMode, LOW_ALPHA_THRESHOLD};
use crate::error::Result;
use crate::tiles::generator::{is_sentinel_mark, TileGeometry};
use crate::tiles::key::TileKey;

/// Corner marks used when the border option is enabled
pub const CORNER_HIGHLIGHT: Rgba<u8> = Rgba([255, 255, 255, 160]);

/// Above this many enhanced pixels in one chunk the pass is skipped
pub const MAX_ENHANCED_PIXELS: usize = 23_000;

/// Above this many the pass yields to the runtime between batches
pub const CHUNKED_ENHANCED_PIXELS: usize = 5_000;

pub const YIELD_BATCH_SIZE: usize = 1_000;

/// How marks are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrosshairStyle {
    pub color: Rgba<u8>,
    pub border: bool,
    /// Two-cell arms instead of one
    pub enhanced_size: bool,
}

impl Default for CrosshairStyle {
    fn default() -> Self {
        Self {
            color: Rgba([255, 0, 0, 255]),
            border: false,
            enhanced_size: false,
        }
    }
}

/// Enhanced center pixel, in block coordinates of its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedCenter {
    pub bx: u32,
    pub by: u32,
    pub color: ColorKey,
}

/// Marks for one chunk, same size as the chunk
#[derive(Debug, Clone)]
pub struct CrosshairOverlay {
    pub image: RgbaImage,
    pub marked: usize,
}

/// Renders overlays and caches the enhanced-center scan per chunk. The cache
/// depends on the enhanced set, the disabled set and the style; callers must
/// `invalidate` it whenever one of those changes.
#[derive(Debug, Default)]
pub struct CrosshairRenderer {
    centers: HashMap<TileKey, Vec<EnhancedCenter>>,
}

impl CrosshairRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        if !self.centers.is_empty() {
            debug!("Crosshair cache cleared ({} chunks)", self.centers.len());
        }
        self.centers.clear();
    }

    pub fn invalidate_tile(&mut self, key: &TileKey) {
        self.centers.remove(key);
    }

    pub fn cached_chunks(&self) -> usize {
        self.centers.len()
    }

    fn enhanced_centers(
        &mut self,
        key: &TileKey,
        chunk: &RgbaImage,
        geometry: TileGeometry,
        filter: &ColorFilter,
        mode: EnhancedMode<'_>,
    ) -> &[EnhancedCenter] {
        self.centers
            .entry(*key)
            .or_insert_with(|| scan_enhanced_centers(chunk, geometry, filter, mode))
    }

    /// Build the overlay for one chunk. Returns `None` when the chunk has
    /// too many enhanced pixels to process in one pass.
    pub async fn render(
        &mut self,
        key: &TileKey,
        chunk: &RgbaImage,
        live: &RgbaImage,
        geometry: TileGeometry,
        filter: &ColorFilter,
        mode: EnhancedMode<'_>,
        style: CrosshairStyle,
    ) -> Result<Option<CrosshairOverlay>> {
        validate_chunk(key, chunk, live, geometry)?;

        let centers = self.enhanced_centers(key, chunk, geometry, filter, mode).to_vec();
        if centers.len() > MAX_ENHANCED_PIXELS {
            info!(
                "Skipping crosshair for {}: {} enhanced pixels exceeds {}",
                key,
                centers.len(),
                MAX_ENHANCED_PIXELS
            );
            return Ok(None);
        }

        let cooperative = centers.len() > CHUNKED_ENHANCED_PIXELS;
        let mut overlay = CrosshairOverlay {
            image: RgbaImage::new(chunk.width(), chunk.height()),
            marked: 0,
        };

        for (i, batch) in centers.chunks(YIELD_BATCH_SIZE).enumerate() {
            if cooperative && i > 0 {
                tokio::task::yield_now().await;
            }
            for center in batch {
                mark_center(&mut overlay, key, chunk, live, geometry, filter, center, style);
            }
        }

        debug!("Crosshair for {}: {} cells marked", key, overlay.marked);
        Ok(Some(overlay))
    }
}

/// Centers that are required and enhanced
pub fn scan_enhanced_centers(
    chunk: &RgbaImage,
    geometry: TileGeometry,
    filter: &ColorFilter,
    mode: EnhancedMode<'_>,
) -> Vec<EnhancedCenter> {
    let m = geometry.magnification;
    let c = geometry.center();
    let mut centers = Vec::new();

    for by in 0..chunk.height() / m {
        for bx in 0..chunk.width() / m {
            let pixel = chunk.get_pixel(bx * m + c, by * m + c);
            if pixel[3] < LOW_ALPHA_THRESHOLD || is_sentinel_mark(pixel) {
                continue;
            }
            let color = ColorKey::from_rgba(&pixel.0);
            if color.is_sentinel() || filter.is_disabled(&color) || !mode.includes(&color) {
                continue;
            }
            centers.push(EnhancedCenter { bx, by, color });
        }
    }

    centers
}

#[allow(clippy::too_many_arguments)]
fn mark_center(
    overlay: &mut CrosshairOverlay,
    key: &TileKey,
    chunk: &RgbaImage,
    live: &RgbaImage,
    geometry: TileGeometry,
    filter: &ColorFilter,
    center: &EnhancedCenter,
    style: CrosshairStyle,
) {
    let m = geometry.magnification;
    let c = geometry.center();
    let cx = (center.bx * m + c) as i64;
    let cy = (center.by * m + c) as i64;

    let template_pixel = chunk.get_pixel(cx as u32, cy as u32);
    match classify_pixel(template_pixel, live_pixel(live, key, center.bx, center.by), filter) {
        PixelClassification::Unpainted | PixelClassification::Wrong => {}
        PixelClassification::Correct | PixelClassification::NotRequired => return,
    }

    let reach: i64 = if style.enhanced_size { 2 } else { 1 };
    let center_color = Rgba([style.color[0], style.color[1], style.color[2], 255]);

    for d in 1..=reach {
        for (dx, dy) in [(-d, 0), (d, 0), (0, -d), (0, d)] {
            if let Some((x, y)) = markable_cell(key, chunk, live, m, cx + dx, cy + dy) {
                let cell = overlay.image.get_pixel_mut(x, y);
                if cell[3] == 0 {
                    overlay.marked += 1;
                }
                *cell = center_color;
            }
        }
    }

    if style.border {
        for (dx, dy) in [(-1, -1), (1, -1), (-1, 1), (1, 1)] {
            if let Some((x, y)) = markable_cell(key, chunk, live, m, cx + dx, cy + dy) {
                let cell = overlay.image.get_pixel_mut(x, y);
                // Orthogonal marks win over corners
                if cell[3] == 0 {
                    *cell = CORNER_HIGHLIGHT;
                    overlay.marked += 1;
                }
            }
        }
    }
}

/// A cell can be marked when it is inside the chunk, transparent in the
/// template and sits over an unpainted canvas pixel
fn markable_cell(key: &TileKey, chunk: &RgbaImage, live: &RgbaImage, m: u32, x: i64, y: i64) -> Option<(u32, u32)> {
    if x < 0 || y < 0 || x >= chunk.width() as i64 || y >= chunk.height() as i64 {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    if chunk.get_pixel(x, y)[3] != 0 {
        return None;
    }
    if let Some(p) = live_pixel(live, key, x / m, y / m) {
        if p[3] >= LOW_ALPHA_THRESHOLD {
            return None;
        }
    }
    Some((x, y))
}
