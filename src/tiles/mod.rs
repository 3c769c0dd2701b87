/// Tiling module
///
/// This module handles:
/// - Addressing templates, live tiles and generated chunks (key.rs)
/// - Decoding source images and live tiles with a fallback tier (raster.rs)
/// - Cutting a source image into magnified, center-only chunks (generator.rs)
/// - Encoding chunks for the persisted record (codec.rs)

pub mod codec;
pub mod generator;
pub mod key;
pub mod raster;

pub use generator::{GeneratedTiles, TileGeometry, TileMap};
pub use key::{TemplateCoords, TileCoords, TileKey};
pub use raster::{Rect, SourceRaster};
