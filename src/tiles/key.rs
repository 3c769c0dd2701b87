/// Grid addressing: template origins, live tile coordinates and chunk keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OverlayError, Result};

/// Origin of a template on the shared canvas: tile plus pixel offset inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct TemplateCoords {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl TemplateCoords {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self { tile_x, tile_y, pixel_x, pixel_y }
    }

    /// The pixel offset must land inside the origin tile
    pub fn validate(&self, tile_size: u32) -> Result<()> {
        if tile_size == 0 {
            return Err(OverlayError::InvalidCoords("tile size must be positive".into()));
        }
        if self.pixel_x >= tile_size || self.pixel_y >= tile_size {
            return Err(OverlayError::InvalidCoords(format!(
                "pixel offset ({}, {}) outside tile of size {}",
                self.pixel_x, self.pixel_y, tile_size
            )));
        }
        Ok(())
    }
}

impl From<[u32; 4]> for TemplateCoords {
    fn from(v: [u32; 4]) -> Self {
        TemplateCoords::new(v[0], v[1], v[2], v[3])
    }
}

impl From<TemplateCoords> for [u32; 4] {
    fn from(c: TemplateCoords) -> Self {
        [c.tile_x, c.tile_y, c.pixel_x, c.pixel_y]
    }
}

impl FromStr for TemplateCoords {
    type Err = OverlayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let values = parse_numbers(s, 4).ok_or_else(|| OverlayError::InvalidCoords(s.to_string()))?;
        Ok(TemplateCoords::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for TemplateCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}, {}", self.tile_x, self.tile_y, self.pixel_x, self.pixel_y)
    }
}

/// Identity of one live tile served by the remote canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoords {
    pub x: u32,
    pub y: u32,
}

impl TileCoords {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04},{:04}", self.x, self.y)
    }
}

impl FromStr for TileCoords {
    type Err = OverlayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let values = parse_numbers(s, 2).ok_or_else(|| OverlayError::InvalidCoords(s.to_string()))?;
        Ok(TileCoords::new(values[0], values[1]))
    }
}

/// Key of one generated chunk: the tile it belongs to and where inside that
/// tile its top-left corner sits. Formats as `"0001,0002,010,010"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl TileKey {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self { tile_x, tile_y, pixel_x, pixel_y }
    }

    pub fn tile(&self) -> TileCoords {
        TileCoords::new(self.tile_x, self.tile_y)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04},{:04},{:03},{:03}",
            self.tile_x, self.tile_y, self.pixel_x, self.pixel_y
        )
    }
}

impl FromStr for TileKey {
    type Err = OverlayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let values = parse_numbers(s, 4).ok_or_else(|| OverlayError::InvalidTileKey(s.to_string()))?;
        Ok(TileKey::new(values[0], values[1], values[2], values[3]))
    }
}

fn parse_numbers(s: &str, expected: usize) -> Option<Vec<u32>> {
    let values: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    (values.len() == expected).then_some(values)
}
