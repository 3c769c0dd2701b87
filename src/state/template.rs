/// Template entity
///
/// A template owns its generated chunks and its color filter. Every filter
/// mutation goes through the template so the chunks stay in sync, and
/// hands back an `Invalidation` the owner forwards to the caches.

use image::RgbaImage;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::color::{ColorFilter, ColorKey, EnhancedMode, Invalidation, LOW_ALPHA_THRESHOLD};
use crate::error::{OverlayError, Result};
use crate::state::record::TemplateRecord;
use crate::tiles::codec::{decode_tile, encode_tile};
use crate::tiles::generator::{
    count_center_cells, count_required_centers, generate_tiles, is_sentinel_mark, reapply_disabled_filter,
    TileGeometry, TileMap,
};
use crate::tiles::key::{TemplateCoords, TileCoords, TileKey};
use crate::tiles::raster::{decode_raster, SourceRaster};

/// Record key of a template: sort priority plus author tag, `"<sortID> <authorID>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId {
    pub sort_id: u32,
    pub author_id: String,
}

impl TemplateId {
    pub fn new(sort_id: u32, author_id: impl Into<String>) -> Self {
        Self { sort_id, author_id: author_id.into() }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sort_id, self.author_id)
    }
}

impl FromStr for TemplateId {
    type Err = OverlayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (sort, author) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| OverlayError::TemplateNotFound(s.to_string()))?;
        let sort_id = sort
            .parse::<u32>()
            .map_err(|_| OverlayError::TemplateNotFound(s.to_string()))?;
        Ok(TemplateId::new(sort_id, author.trim()))
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub coords: TemplateCoords,
    pub geometry: TileGeometry,
    /// Bounding-box area of the source image
    pub pixel_count: u64,
    pub enabled: bool,
    filter: ColorFilter,
    tiles: TileMap,
    /// Kept only for templates created in this session, so re-enabling a
    /// color can regenerate the chunks
    source: Option<SourceRaster>,
}

impl Template {
    /// Create a template from uploaded image bytes
    pub fn from_image(
        id: TemplateId,
        name: impl Into<String>,
        coords: TemplateCoords,
        geometry: TileGeometry,
        image_bytes: &[u8],
    ) -> Result<Self> {
        let source = decode_raster(image_bytes)?;
        Self::from_source(id, name, coords, geometry, source, ColorFilter::new())
    }

    /// Create a template from an already decoded raster
    pub fn from_source(
        id: TemplateId,
        name: impl Into<String>,
        coords: TemplateCoords,
        geometry: TileGeometry,
        source: SourceRaster,
        filter: ColorFilter,
    ) -> Result<Self> {
        let generated = generate_tiles(&source, coords, geometry, &filter)?;
        let name = name.into();
        info!("📌 Created template '{}' ({}) with {} tiles", name, id, generated.tiles.len());

        Ok(Self {
            id,
            name,
            coords,
            geometry,
            pixel_count: generated.pixel_count,
            enabled: true,
            filter,
            tiles: generated.tiles,
            source: Some(source),
        })
    }

    /// Rebuild a template from its persisted form. Tiles that fail to decode
    /// are dropped with an error log; the rest of the template survives.
    pub fn from_record(id: TemplateId, record: &TemplateRecord, geometry: TileGeometry) -> Result<Self> {
        geometry.validate()?;
        record.coords.validate(geometry.tile_size)?;

        let mut filter = ColorFilter::new();
        let _ = filter.set_disabled_colors(record.disabled_colors.iter().copied());
        let _ = filter.set_enhanced_colors(record.enhanced_colors.iter().copied());

        let mut tiles = TileMap::new();
        for (key, payload) in &record.tiles {
            let parsed = key.parse::<TileKey>().and_then(|k| decode_tile(payload).map(|t| (k, t)));
            match parsed {
                Ok((key, tile)) => {
                    tiles.insert(key, tile);
                }
                Err(e) => error!("❌ Dropping tile {} of template {}: {}", key, id, e),
            }
        }

        let pixel_count = count_center_cells(&tiles, geometry);
        info!("📂 Loaded template '{}' ({}) with {} tiles", record.name, id, tiles.len());

        Ok(Self {
            id,
            name: record.name.clone(),
            coords: record.coords,
            geometry,
            pixel_count,
            enabled: record.enabled,
            filter,
            tiles,
            source: None,
        })
    }

    /// Persisted form. Tiles that fail to encode are left out.
    pub fn to_record(&self) -> TemplateRecord {
        let mut tiles = BTreeMap::new();
        for (key, tile) in &self.tiles {
            match encode_tile(tile) {
                Ok(payload) => {
                    tiles.insert(key.to_string(), payload);
                }
                Err(e) => warn!("⚠️  Tile {} of template {} not saved: {}", key, self.id, e),
            }
        }

        TemplateRecord {
            name: self.name.clone(),
            coords: self.coords,
            enabled: self.enabled,
            disabled_colors: self.filter.disabled_colors(),
            enhanced_colors: self.filter.enhanced_colors(),
            tiles,
        }
    }

    // ---- tiles --------------------------------------------------------------

    pub fn tiles(&self) -> &TileMap {
        &self.tiles
    }

    /// Chunks that land on one live tile
    pub fn tiles_on(&self, tile: TileCoords) -> impl Iterator<Item = (&TileKey, &RgbaImage)> {
        self.tiles.iter().filter(move |(k, _)| k.tile() == tile)
    }

    pub fn covers(&self, tile: TileCoords) -> bool {
        self.tiles.keys().any(|k| k.tile() == tile)
    }

    /// Distinct live tiles this template touches
    pub fn live_tiles(&self) -> Vec<TileCoords> {
        let mut tiles: Vec<TileCoords> = self.tiles.keys().map(|k| k.tile()).collect();
        tiles.sort();
        tiles.dedup();
        tiles
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Center pixels that count toward progress
    pub fn required_pixel_count(&self) -> u64 {
        count_required_centers(&self.tiles, self.geometry, &self.filter)
    }

    /// Required pixels per visible color, for the host's color list
    pub fn color_counts(&self) -> BTreeMap<ColorKey, u64> {
        let m = self.geometry.magnification;
        let c = self.geometry.center();
        let mut counts = BTreeMap::new();

        for tile in self.tiles.values() {
            for by in 0..tile.height() / m {
                for bx in 0..tile.width() / m {
                    let pixel = tile.get_pixel(bx * m + c, by * m + c);
                    if pixel[3] < LOW_ALPHA_THRESHOLD || is_sentinel_mark(pixel) {
                        continue;
                    }
                    *counts.entry(ColorKey::from_rgba(&pixel.0)).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    // ---- color filter -------------------------------------------------------

    pub fn filter(&self) -> &ColorFilter {
        &self.filter
    }

    pub fn enhanced_mode(&self) -> EnhancedMode<'_> {
        self.filter.enhanced_mode()
    }

    pub fn disable_color(&mut self, color: ColorKey) -> Invalidation {
        let token = self.filter.disable(color);
        if token.changed {
            self.refilter();
        }
        token
    }

    pub fn enable_color(&mut self, color: ColorKey) -> Invalidation {
        let token = self.filter.enable(color);
        if token.changed {
            self.refilter();
        }
        token
    }

    pub fn enhance_color(&mut self, color: ColorKey) -> Invalidation {
        self.filter.enable_enhanced(color)
    }

    pub fn unenhance_color(&mut self, color: ColorKey) -> Invalidation {
        self.filter.disable_enhanced(color)
    }

    pub fn clear_enhanced(&mut self) -> Invalidation {
        self.filter.clear_enhanced()
    }

    /// Bring the chunks in line with the disabled set: regenerate when the
    /// source is still around, otherwise hide disabled centers in place
    fn refilter(&mut self) {
        if let Some(source) = &self.source {
            match generate_tiles(source, self.coords, self.geometry, &self.filter) {
                Ok(generated) => {
                    self.tiles = generated.tiles;
                    return;
                }
                Err(e) => warn!("⚠️  Regenerating {} failed, filtering in place: {}", self.id, e),
            }
        }
        let hidden = reapply_disabled_filter(&mut self.tiles, self.geometry, &self.filter);
        if hidden > 0 {
            info!("Hid {} pixels of disabled colors in {}", hidden, self.id);
        }
    }
}
