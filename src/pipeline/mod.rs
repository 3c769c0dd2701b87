/// Live tile compositing
///
/// For every live tile the host fetches:
/// - decode the raw bytes once
/// - upscale the live tile onto a magnified canvas
/// - draw each enabled template's chunks in priority order
/// - analyse those chunks against the live pixels
/// - draw crosshair overlays on top of everything
/// - encode the canvas as PNG (the tile cache stores the result)

pub mod cache;

pub use cache::{FreezeState, TileCache};

use image::imageops;
use image::RgbaImage;
use log::{debug, warn};

use crate::analysis::crosshair::{CrosshairOverlay, CrosshairRenderer, CrosshairStyle};
use crate::analysis::progress::ProgressTracker;
use crate::error::Result;
use crate::state::template::Template;
use crate::tiles::generator::TileGeometry;
use crate::tiles::key::{TileCoords, TileKey};
use crate::tiles::raster::decode_rgba;

/// A live tile decoded from the bytes the host fetched
#[derive(Debug, Clone)]
pub struct LiveTile {
    pub coords: TileCoords,
    pub image: RgbaImage,
}

impl LiveTile {
    pub fn decode(coords: TileCoords, bytes: &[u8]) -> Result<Self> {
        let image = decode_rgba(bytes)?;
        debug!("Decoded live tile {} ({}x{})", coords, image.width(), image.height());
        Ok(Self { coords, image })
    }
}

/// Canvas under construction for one live tile
pub struct Composite {
    pub coords: TileCoords,
    pub canvas: RgbaImage,
    overlays: Vec<(TileKey, CrosshairOverlay)>,
    chunks_drawn: usize,
}

impl Composite {
    /// Start from the live tile scaled up by the magnification
    pub fn new(live: &LiveTile, geometry: TileGeometry) -> Self {
        let size = geometry.tile_size * geometry.magnification;
        Self {
            coords: live.coords,
            canvas: upscale(&live.image, geometry.magnification, size),
            overlays: Vec::new(),
            chunks_drawn: 0,
        }
    }

    pub fn chunks_drawn(&self) -> usize {
        self.chunks_drawn
    }

    /// Draw one template's chunks for this tile, analyse them and queue
    /// their crosshair overlays. A chunk that fails analysis is still drawn.
    pub async fn add_template(
        &mut self,
        template: &Template,
        live: &LiveTile,
        progress: &mut ProgressTracker,
        crosshair: &mut CrosshairRenderer,
        style: CrosshairStyle,
    ) {
        let geometry = template.geometry;

        for (key, chunk) in template.tiles_on(live.coords) {
            draw_at(&mut self.canvas, key, chunk, geometry);
            self.chunks_drawn += 1;

            progress.analyze(*key, chunk, &live.image, geometry, template.filter());

            match crosshair
                .render(key, chunk, &live.image, geometry, template.filter(), template.enhanced_mode(), style)
                .await
            {
                Ok(Some(overlay)) if overlay.marked > 0 => self.overlays.push((*key, overlay)),
                Ok(_) => {}
                Err(e) => warn!("⚠️  No crosshair for {} of {}: {}", key, template.id, e),
            }
        }
    }

    /// Put the queued crosshairs on top and hand back the finished canvas
    pub fn finish(mut self, geometry: TileGeometry) -> RgbaImage {
        for (key, overlay) in &self.overlays {
            draw_at(&mut self.canvas, key, &overlay.image, geometry);
        }
        debug!(
            "Composited tile {}: {} chunks, {} crosshair overlays",
            self.coords,
            self.chunks_drawn,
            self.overlays.len()
        );
        self.canvas
    }
}

/// Nearest-neighbour upscale of the live tile onto a `size` square canvas
fn upscale(live: &RgbaImage, m: u32, size: u32) -> RgbaImage {
    let mut canvas = RgbaImage::new(size, size);
    let width = (live.width() * m).min(size);
    let height = (live.height() * m).min(size);
    for y in 0..height {
        for x in 0..width {
            canvas.put_pixel(x, y, *live.get_pixel(x / m, y / m));
        }
    }
    canvas
}

/// Alpha-blend `image` onto the canvas at the chunk's magnified offset
fn draw_at(canvas: &mut RgbaImage, key: &TileKey, image: &RgbaImage, geometry: TileGeometry) {
    let m = geometry.magnification as i64;
    imageops::overlay(canvas, image, key.pixel_x as i64 * m, key.pixel_y as i64 * m);
}
