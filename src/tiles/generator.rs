/// Tile generation
///
/// Cuts a source raster into tile-aligned chunks, magnifies every source
/// pixel into an M×M block and keeps only the block's center cell visible.
/// The result is a sparse map of chunks keyed by `TileKey`.

use image::{Rgba, RgbaImage};
use log::{debug, info};
use std::collections::BTreeMap;

use crate::color::{ColorFilter, ColorKey, LOW_ALPHA_THRESHOLD};
use crate::error::{OverlayError, Result};
use crate::tiles::key::{TemplateCoords, TileKey};
use crate::tiles::raster::{Rect, SourceRaster};

/// Checkerboard cells drawn in place of sentinel pixels
pub const SENTINEL_MARK_DARK: Rgba<u8> = Rgba([0, 0, 0, 128]);
pub const SENTINEL_MARK_LIGHT: Rgba<u8> = Rgba([255, 255, 255, 128]);

pub type TileMap = BTreeMap<TileKey, RgbaImage>;

/// Tile edge length and magnification shared by generation, analysis and
/// compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub tile_size: u32,
    pub magnification: u32,
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self { tile_size: 1000, magnification: 3 }
    }
}

impl TileGeometry {
    pub fn new(tile_size: u32, magnification: u32) -> Result<Self> {
        let geometry = Self { tile_size, magnification };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<()> {
        if self.magnification == 0 || self.magnification % 2 == 0 {
            return Err(OverlayError::InvalidMagnification(self.magnification));
        }
        if self.tile_size == 0 {
            return Err(OverlayError::InvalidCoords("tile size must be positive".into()));
        }
        Ok(())
    }

    /// Local offset of the visible cell inside each M×M block
    pub fn center(&self) -> u32 {
        self.magnification / 2
    }

    pub fn is_center(&self, x: u32, y: u32) -> bool {
        let c = self.center();
        x % self.magnification == c && y % self.magnification == c
    }
}

/// Output of one generation run
#[derive(Debug, Clone)]
pub struct GeneratedTiles {
    pub tiles: TileMap,
    /// Bounding-box area of the source image
    pub pixel_count: u64,
}

/// True for the checkerboard cells that stand in for sentinel pixels
pub fn is_sentinel_mark(pixel: &Rgba<u8>) -> bool {
    *pixel == SENTINEL_MARK_DARK || *pixel == SENTINEL_MARK_LIGHT
}

/// Split `source` into magnified tiles anchored at `coords`
pub fn generate_tiles(
    source: &SourceRaster,
    coords: TemplateCoords,
    geometry: TileGeometry,
    filter: &ColorFilter,
) -> Result<GeneratedTiles> {
    geometry.validate()?;
    coords.validate(geometry.tile_size)?;

    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(OverlayError::Decode("source image has no pixels".into()));
    }

    let t = geometry.tile_size;
    let m = geometry.magnification;
    let mut tiles = TileMap::new();

    let mut offset_y = 0;
    while offset_y < height {
        let local_y = coords.pixel_y + offset_y;
        let draw_h = (t - local_y % t).min(height - offset_y);

        let mut offset_x = 0;
        while offset_x < width {
            let local_x = coords.pixel_x + offset_x;
            let draw_w = (t - local_x % t).min(width - offset_x);

            let mut tile = RgbaImage::new(draw_w * m, draw_h * m);
            source.draw_into(
                &mut tile,
                Rect::new(offset_x, offset_y, draw_w, draw_h),
                Rect::new(0, 0, draw_w * m, draw_h * m),
            );
            mask_tile(&mut tile, geometry, filter, offset_x, offset_y);

            let key = TileKey::new(
                coords.tile_x + local_x / t,
                coords.tile_y + local_y / t,
                local_x % t,
                local_y % t,
            );
            debug!("Generated chunk {} ({}x{} source pixels)", key, draw_w, draw_h);
            tiles.insert(key, tile);

            offset_x += draw_w;
        }
        offset_y += draw_h;
    }

    info!("🧩 Generated {} tiles for a {}x{} template at {}", tiles.len(), width, height, coords);

    Ok(GeneratedTiles {
        tiles,
        pixel_count: width as u64 * height as u64,
    })
}

/// Hide every non-center cell and near-transparent centers, swap sentinel
/// pixels for the checkerboard, hide disabled colors and make the remaining
/// centers opaque. `origin_*` is the source-pixel offset of the chunk,
/// used for checkerboard parity.
fn mask_tile(tile: &mut RgbaImage, geometry: TileGeometry, filter: &ColorFilter, origin_x: u32, origin_y: u32) {
    let m = geometry.magnification;

    for (x, y, pixel) in tile.enumerate_pixels_mut() {
        if !geometry.is_center(x, y) {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        if pixel[3] < LOW_ALPHA_THRESHOLD {
            pixel[3] = 0;
            continue;
        }

        let color = ColorKey::from_rgba(&pixel.0);
        if color.is_sentinel() {
            let parity = (origin_x + x / m + origin_y + y / m) % 2;
            *pixel = if parity == 0 { SENTINEL_MARK_DARK } else { SENTINEL_MARK_LIGHT };
        } else if filter.is_disabled(&color) {
            pixel[3] = 0;
        } else {
            // Visible centers are opaque, so only sentinel marks carry alpha 128
            pixel[3] = 255;
        }
    }
}

/// Re-apply the disabled set to tiles that were generated earlier. Only
/// center cells are touched. Re-enabling a color afterwards cannot bring it
/// back; that needs a regeneration from the source image.
pub fn reapply_disabled_filter(tiles: &mut TileMap, geometry: TileGeometry, filter: &ColorFilter) -> u64 {
    let m = geometry.magnification;
    let c = geometry.center();
    let mut hidden = 0;

    for tile in tiles.values_mut() {
        let (w, h) = tile.dimensions();
        for by in 0..h / m {
            for bx in 0..w / m {
                let pixel = tile.get_pixel_mut(bx * m + c, by * m + c);
                if pixel[3] == 0 || is_sentinel_mark(pixel) {
                    continue;
                }
                if filter.is_disabled(&ColorKey::from_rgba(&pixel.0)) {
                    pixel[3] = 0;
                    hidden += 1;
                }
            }
        }
    }

    hidden
}

/// Number of center cells across all tiles, whatever their alpha. For tiles
/// covering a whole source image this equals its bounding-box area.
pub fn count_center_cells(tiles: &TileMap, geometry: TileGeometry) -> u64 {
    let m = geometry.magnification as u64;
    tiles
        .values()
        .map(|t| (t.width() as u64 / m) * (t.height() as u64 / m))
        .sum()
}

/// Number of center cells that count toward progress: opaque enough, not a
/// sentinel mark and not a disabled color
pub fn count_required_centers(tiles: &TileMap, geometry: TileGeometry, filter: &ColorFilter) -> u64 {
    let m = geometry.magnification;
    let c = geometry.center();
    let mut count = 0;

    for tile in tiles.values() {
        let (w, h) = tile.dimensions();
        for by in 0..h / m {
            for bx in 0..w / m {
                let pixel = tile.get_pixel(bx * m + c, by * m + c);
                if pixel[3] < LOW_ALPHA_THRESHOLD || is_sentinel_mark(pixel) {
                    continue;
                }
                if !filter.is_disabled(&ColorKey::from_rgba(&pixel.0)) {
                    count += 1;
                }
            }
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::SENTINEL_COLOR;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> SourceRaster {
        SourceRaster::Buffer(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_geometry_rejects_even_magnification() {
        assert!(TileGeometry::new(1000, 3).is_ok());
        assert!(matches!(TileGeometry::new(1000, 2), Err(OverlayError::InvalidMagnification(2))));
        assert!(TileGeometry::new(1000, 0).is_err());
        assert!(TileGeometry::new(0, 3).is_err());
    }

    #[test]
    fn test_boundary_crossing_template() {
        // 5x5 image at pixel (998, 998) spans four tiles
        let source = solid(5, 5, [255, 0, 0, 255]);
        let coords = TemplateCoords::new(0, 0, 998, 998);
        let out = generate_tiles(&source, coords, TileGeometry::default(), &ColorFilter::new()).unwrap();

        let keys: Vec<String> = out.tiles.keys().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["0000,0000,998,998", "0000,0001,998,000", "0001,0000,000,998", "0001,0001,000,000"]
        );

        let dims: Vec<(u32, u32)> = out.tiles.values().map(|t| t.dimensions()).collect();
        assert_eq!(dims, vec![(6, 6), (6, 9), (9, 6), (9, 9)]);

        let geometry = TileGeometry::default();
        assert_eq!(count_required_centers(&out.tiles, geometry, &ColorFilter::new()), 25);
        assert_eq!(out.pixel_count, 25);
        assert_eq!(count_center_cells(&out.tiles, geometry), 25);
    }

    #[test]
    fn test_partial_tiles_on_trailing_edges() {
        let geometry = TileGeometry::new(10, 3).unwrap();
        let source = solid(25, 12, [1, 2, 3, 255]);
        let out = generate_tiles(&source, TemplateCoords::new(4, 5, 0, 0), geometry, &ColorFilter::new()).unwrap();

        let sizes: Vec<(String, (u32, u32))> = out
            .tiles
            .iter()
            .map(|(k, t)| (k.to_string(), (t.width() / 3, t.height() / 3)))
            .collect();
        assert_eq!(
            sizes,
            vec![
                ("0004,0005,000,000".to_string(), (10, 10)),
                ("0004,0006,000,000".to_string(), (10, 2)),
                ("0005,0005,000,000".to_string(), (10, 10)),
                ("0005,0006,000,000".to_string(), (10, 2)),
                ("0006,0005,000,000".to_string(), (5, 10)),
                ("0006,0006,000,000".to_string(), (5, 2)),
            ]
        );
    }

    #[test]
    fn test_only_center_cells_are_visible() {
        let geometry = TileGeometry::new(50, 5).unwrap();
        let source = solid(7, 4, [9, 9, 9, 255]);
        let out = generate_tiles(&source, TemplateCoords::new(0, 0, 3, 3), geometry, &ColorFilter::new()).unwrap();

        for tile in out.tiles.values() {
            for (x, y, p) in tile.enumerate_pixels() {
                if p[3] > 0 {
                    assert_eq!((x % 5, y % 5), (2, 2));
                }
            }
        }
    }

    #[test]
    fn test_sentinel_becomes_checkerboard_and_is_not_required() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([10, 10, 10, 255]));
        img.put_pixel(1, 0, Rgba([SENTINEL_COLOR[0], SENTINEL_COLOR[1], SENTINEL_COLOR[2], 255]));
        let geometry = TileGeometry::default();
        let out = generate_tiles(&SourceRaster::Buffer(img), TemplateCoords::new(0, 0, 0, 0), geometry, &ColorFilter::new()).unwrap();

        let tile = out.tiles.values().next().unwrap();
        assert!(is_sentinel_mark(tile.get_pixel(4, 1)));
        assert_eq!(count_required_centers(&out.tiles, geometry, &ColorFilter::new()), 1);
    }

    #[test]
    fn test_translucent_pixels_are_not_sentinel_marks() {
        let geometry = TileGeometry::default();
        let mut img = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 128]));
        img.put_pixel(1, 0, Rgba([255, 255, 255, 128]));
        img.put_pixel(2, 0, Rgba([5, 5, 5, 40]));
        let out = generate_tiles(&SourceRaster::Buffer(img), TemplateCoords::new(0, 0, 0, 0), geometry, &ColorFilter::new()).unwrap();

        let tile = out.tiles.values().next().unwrap();
        assert_eq!(*tile.get_pixel(1, 1), Rgba([0, 0, 0, 255]));
        assert_eq!(*tile.get_pixel(4, 1), Rgba([255, 255, 255, 255]));
        assert_eq!(tile.get_pixel(7, 1)[3], 0);
        assert!(!is_sentinel_mark(tile.get_pixel(1, 1)));
        assert_eq!(count_required_centers(&out.tiles, geometry, &ColorFilter::new()), 2);
    }

    #[test]
    fn test_disabled_colors_are_hidden_at_generation() {
        let mut filter = ColorFilter::new();
        let _ = filter.disable(ColorKey::new(255, 0, 0));
        let out = generate_tiles(&solid(3, 3, [255, 0, 0, 255]), TemplateCoords::new(0, 0, 0, 0), TileGeometry::default(), &filter).unwrap();
        assert!(out.tiles.values().all(|t| t.pixels().all(|p| p[3] == 0)));
        assert_eq!(out.pixel_count, 9);
    }

    #[test]
    fn test_reapply_disabled_filter() {
        let geometry = TileGeometry::default();
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let mut out = generate_tiles(&SourceRaster::Buffer(img), TemplateCoords::new(0, 0, 0, 0), geometry, &ColorFilter::new()).unwrap();

        let mut filter = ColorFilter::new();
        let _ = filter.disable(ColorKey::new(255, 0, 0));
        assert_eq!(reapply_disabled_filter(&mut out.tiles, geometry, &filter), 1);
        assert_eq!(count_required_centers(&out.tiles, geometry, &filter), 3);

        // Enabling again does not restore the hidden pixel
        let _ = filter.enable(ColorKey::new(255, 0, 0));
        assert_eq!(count_required_centers(&out.tiles, geometry, &filter), 3);
    }

    #[test]
    fn test_generation_is_idempotent() {
        let geometry = TileGeometry::new(8, 3).unwrap();
        let mut img = RgbaImage::new(11, 9);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgba([(x * 20) as u8, (y * 20) as u8, 7, if (x + y) % 3 == 0 { 0 } else { 255 }]);
        }
        let source = SourceRaster::Buffer(img);
        let coords = TemplateCoords::new(2, 2, 5, 6);

        let a = generate_tiles(&source, coords, geometry, &ColorFilter::new()).unwrap();
        let b = generate_tiles(&source, coords, geometry, &ColorFilter::new()).unwrap();
        assert_eq!(a.tiles, b.tiles);
    }
}
