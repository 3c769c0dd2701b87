/// Color-filter model
///
/// This module holds the per-template color state every other stage reads:
/// - `ColorKey`: canonical "r,g,b" identity of a color (alpha ignored)
/// - `ColorFilter`: the disabled and enhanced color sets
/// - `Invalidation`: token returned by every mutation so caches can be cleared
/// - `EnhancedMode`: which colors the crosshair pass should highlight

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::OverlayError;

/// Reserved "intentionally blank" color. Pixels of this color are drawn as a
/// checkerboard and never count as required.
pub const SENTINEL_COLOR: [u8; 3] = [222, 250, 206];

/// Anything below this alpha is treated as transparent, both in templates
/// and in the live canvas.
pub const LOW_ALPHA_THRESHOLD: u8 = 64;

/// Canonical color identity used as the key of every color set and statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColorKey(pub [u8; 3]);

impl ColorKey {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        ColorKey([r, g, b])
    }

    /// Build a key from an RGBA pixel, dropping alpha
    pub fn from_rgba(pixel: &[u8; 4]) -> Self {
        ColorKey([pixel[0], pixel[1], pixel[2]])
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL_COLOR
    }
}

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for ColorKey {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 3 {
            return Err(OverlayError::InvalidColor(s.to_string()));
        }

        let mut rgb = [0u8; 3];
        for (channel, part) in rgb.iter_mut().zip(parts) {
            *channel = part
                .parse::<u8>()
                .map_err(|_| OverlayError::InvalidColor(s.to_string()))?;
        }
        Ok(ColorKey(rgb))
    }
}

impl TryFrom<String> for ColorKey {
    type Error = OverlayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColorKey> for String {
    fn from(key: ColorKey) -> Self {
        key.to_string()
    }
}

/// Proof that a filter mutation happened. Dependent caches must be
/// invalidated before they are read again when `changed` is true.
#[must_use = "filter changes must be forwarded to the dependent caches"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    /// Filter revision after the mutation
    pub revision: u64,
    /// False when the mutation was a no-op (idempotent repeat)
    pub changed: bool,
}

/// Which center pixels take part in the crosshair pass
#[derive(Debug, Clone, Copy)]
pub enum EnhancedMode<'a> {
    /// No color is enhanced explicitly, so every color is
    All,
    /// Only the listed colors
    Only(&'a BTreeSet<ColorKey>),
}

impl EnhancedMode<'_> {
    pub fn includes(&self, color: &ColorKey) -> bool {
        match self {
            EnhancedMode::All => true,
            EnhancedMode::Only(set) => set.contains(color),
        }
    }
}

/// Disabled and enhanced color sets for one template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorFilter {
    disabled: BTreeSet<ColorKey>,
    enhanced: BTreeSet<ColorKey>,
    revision: u64,
}

impl ColorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self, changed: bool) -> Invalidation {
        if changed {
            self.revision += 1;
        }
        Invalidation { revision: self.revision, changed }
    }

    // ---- disabled colors ----------------------------------------------------

    pub fn disable(&mut self, color: ColorKey) -> Invalidation {
        let changed = self.disabled.insert(color);
        self.bump(changed)
    }

    pub fn enable(&mut self, color: ColorKey) -> Invalidation {
        let changed = self.disabled.remove(&color);
        self.bump(changed)
    }

    pub fn is_disabled(&self, color: &ColorKey) -> bool {
        self.disabled.contains(color)
    }

    // ---- enhanced colors ----------------------------------------------------

    pub fn enable_enhanced(&mut self, color: ColorKey) -> Invalidation {
        let changed = self.enhanced.insert(color);
        self.bump(changed)
    }

    pub fn disable_enhanced(&mut self, color: ColorKey) -> Invalidation {
        let changed = self.enhanced.remove(&color);
        self.bump(changed)
    }

    pub fn is_enhanced(&self, color: &ColorKey) -> bool {
        self.enhanced.contains(color)
    }

    pub fn clear_enhanced(&mut self) -> Invalidation {
        let changed = !self.enhanced.is_empty();
        self.enhanced.clear();
        self.bump(changed)
    }

    /// Enhanced selection for the crosshair pass. An empty set means every
    /// color is implicitly enhanced.
    pub fn enhanced_mode(&self) -> EnhancedMode<'_> {
        if self.enhanced.is_empty() {
            EnhancedMode::All
        } else {
            EnhancedMode::Only(&self.enhanced)
        }
    }

    // ---- bulk access for persistence ----------------------------------------

    pub fn disabled_colors(&self) -> Vec<ColorKey> {
        self.disabled.iter().copied().collect()
    }

    pub fn enhanced_colors(&self) -> Vec<ColorKey> {
        self.enhanced.iter().copied().collect()
    }

    pub fn set_disabled_colors<I: IntoIterator<Item = ColorKey>>(&mut self, colors: I) -> Invalidation {
        let next: BTreeSet<ColorKey> = colors.into_iter().collect();
        let changed = next != self.disabled;
        self.disabled = next;
        self.bump(changed)
    }

    pub fn set_enhanced_colors<I: IntoIterator<Item = ColorKey>>(&mut self, colors: I) -> Invalidation {
        let next: BTreeSet<ColorKey> = colors.into_iter().collect();
        let changed = next != self.enhanced;
        self.enhanced = next;
        self.bump(changed)
    }
}
