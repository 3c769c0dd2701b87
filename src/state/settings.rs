/// User settings and engine configuration
///
/// `Settings` are the user-facing knobs the core reads but never computes
/// (crosshair color, border, enhanced size). They are serialized to JSON and
/// stored next to the template record.
///
/// `EngineConfig` is process configuration read from the environment.

use image::Rgba;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::analysis::crosshair::CrosshairStyle;
use crate::error::Result;
use crate::tiles::generator::TileGeometry;

/// Crosshair settings supplied by the host
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Crosshair color as [R, G, B, A]
    /// - RGB is used for the center marks, which are always drawn opaque
    /// - A is kept for the host's own rendering of the color swatch
    pub crosshair_color: [u8; 4],

    /// Draw corner marks on the diagonals as well
    pub border_enabled: bool,

    /// Two-cell crosshair arms instead of one
    pub enhanced_size: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crosshair_color: [255, 0, 0, 255],
            border_enabled: false,
            enhanced_size: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn crosshair_style(&self) -> CrosshairStyle {
        CrosshairStyle {
            color: Rgba(self.crosshair_color),
            border: self.border_enabled,
            enhanced_size: self.enhanced_size,
        }
    }
}

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub tile_size: u32,
    pub magnification: u32,
    /// Composite tiles kept by the tile cache
    pub cache_capacity: usize,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: 1000,
            magnification: 3,
            cache_capacity: 100,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Read `OVERLAY_*` variables, falling back to defaults for anything
    /// unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tile_size: env::var("OVERLAY_TILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tile_size),
            magnification: env::var("OVERLAY_MAGNIFICATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.magnification),
            cache_capacity: env::var("OVERLAY_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_capacity),
            data_dir: env::var("OVERLAY_DATA_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn geometry(&self) -> Result<TileGeometry> {
        TileGeometry::new(self.tile_size, self.magnification)
    }

    /// Where the record store lives
    /// - Linux: ~/.local/share/template-overlay
    /// - macOS: ~/Library/Application Support/template-overlay
    /// - Windows: %APPDATA%\template-overlay
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("template-overlay");
        path
    }
}
