/// Pixel-progress analysis
///
/// Compares a template chunk against the live canvas tile it sits on. Only
/// the center cell of each M×M block is inspected; every required center is
/// classified as unpainted, correct or wrong, and the counts are tallied per
/// tile and per color in the same pass.

use image::{Rgba, RgbaImage};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;

use crate::color::{ColorFilter, ColorKey, LOW_ALPHA_THRESHOLD};
use crate::error::{OverlayError, Result};
use crate::tiles::generator::{is_sentinel_mark, TileGeometry};
use crate::tiles::key::TileKey;

/// Verdict for one center pixel. Computed per pass, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClassification {
    NotRequired,
    Unpainted,
    Correct,
    Wrong,
}

/// Counts for one template chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileProgress {
    pub painted: u64,
    pub required: u64,
    pub wrong: u64,
}

impl AddAssign for TileProgress {
    fn add_assign(&mut self, other: Self) {
        self.painted += other.painted;
        self.required += other.required;
        self.wrong += other.wrong;
    }
}

/// Exact per-color counts gathered during classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorTally {
    pub required: u64,
    pub painted: u64,
}

/// Per-color summary handed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorStats {
    pub color: ColorKey,
    pub total_required: u64,
    pub painted: u64,
    pub needs_crosshair: u64,
    pub percentage: f64,
}

impl ColorStats {
    fn from_tally(color: ColorKey, tally: ColorTally) -> Self {
        Self {
            color,
            total_required: tally.required,
            painted: tally.painted,
            needs_crosshair: tally.required.saturating_sub(tally.painted),
            percentage: percentage(tally.painted, tally.required),
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Result of analysing one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileAnalysis {
    pub progress: TileProgress,
    pub colors: BTreeMap<ColorKey, ColorTally>,
}

/// Classify one template center pixel against the live pixel at the same
/// canvas position. `live` is `None` when that position lies outside the
/// live tile.
pub fn classify_pixel(template: &Rgba<u8>, live: Option<&Rgba<u8>>, filter: &ColorFilter) -> PixelClassification {
    if template[3] < LOW_ALPHA_THRESHOLD || is_sentinel_mark(template) {
        return PixelClassification::NotRequired;
    }
    let color = ColorKey::from_rgba(&template.0);
    if color.is_sentinel() || filter.is_disabled(&color) {
        return PixelClassification::NotRequired;
    }

    match live {
        None => PixelClassification::Unpainted,
        Some(p) if p[3] < LOW_ALPHA_THRESHOLD => PixelClassification::Unpainted,
        Some(p) if p[0] == template[0] && p[1] == template[1] && p[2] == template[2] => {
            PixelClassification::Correct
        }
        Some(_) => PixelClassification::Wrong,
    }
}

/// Live pixel under block `(bx, by)` of the chunk at `key`
pub fn live_pixel<'a>(live: &'a RgbaImage, key: &TileKey, bx: u32, by: u32) -> Option<&'a Rgba<u8>> {
    let x = key.pixel_x + bx;
    let y = key.pixel_y + by;
    (x < live.width() && y < live.height()).then(|| live.get_pixel(x, y))
}

/// Reject chunks that cannot have come out of the generator
pub fn validate_chunk(key: &TileKey, template: &RgbaImage, live: &RgbaImage, geometry: TileGeometry) -> Result<()> {
    let m = geometry.magnification;
    let (w, h) = template.dimensions();
    if w == 0 || h == 0 || w % m != 0 || h % m != 0 {
        return Err(OverlayError::Analysis {
            key: key.to_string(),
            reason: format!("chunk size {}x{} is not a multiple of magnification {}", w, h, m),
        });
    }
    if live.width() == 0 || live.height() == 0 {
        return Err(OverlayError::Analysis {
            key: key.to_string(),
            reason: "live tile has no pixels".into(),
        });
    }
    Ok(())
}

/// Classify every center of one chunk and tally the results
pub fn analyze_tile(
    key: &TileKey,
    template: &RgbaImage,
    live: &RgbaImage,
    geometry: TileGeometry,
    filter: &ColorFilter,
) -> Result<TileAnalysis> {
    validate_chunk(key, template, live, geometry)?;

    let m = geometry.magnification;
    let c = geometry.center();
    let mut analysis = TileAnalysis::default();

    for by in 0..template.height() / m {
        for bx in 0..template.width() / m {
            let center = template.get_pixel(bx * m + c, by * m + c);
            let class = classify_pixel(center, live_pixel(live, key, bx, by), filter);
            if class == PixelClassification::NotRequired {
                continue;
            }

            let tally = analysis.colors.entry(ColorKey::from_rgba(&center.0)).or_default();
            tally.required += 1;
            analysis.progress.required += 1;

            match class {
                PixelClassification::Correct => {
                    tally.painted += 1;
                    analysis.progress.painted += 1;
                }
                PixelClassification::Wrong => analysis.progress.wrong += 1,
                _ => {}
            }
        }
    }

    debug!(
        "Analyzed {}: {}/{} painted, {} wrong",
        key, analysis.progress.painted, analysis.progress.required, analysis.progress.wrong
    );
    Ok(analysis)
}

/// Aggregated progress for one template
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub totals: TileProgress,
    pub tiles_analyzed: usize,
    pub completion: f64,
    pub colors: Vec<ColorStats>,
}

/// Latest analysis of every chunk of a template. Re-analysing a chunk
/// replaces its earlier contribution, so totals never double count.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    tiles: BTreeMap<TileKey, TileAnalysis>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: TileKey, analysis: TileAnalysis) {
        self.tiles.insert(key, analysis);
    }

    /// A failed chunk contributes nothing until it analyses cleanly again
    pub fn record_failure(&mut self, key: TileKey, error: &OverlayError) {
        warn!("⚠️  Skipping {} in progress totals: {}", key, error);
        self.tiles.remove(&key);
    }

    /// Analyse and record in one step, isolating failures to this chunk
    pub fn analyze(
        &mut self,
        key: TileKey,
        template: &RgbaImage,
        live: &RgbaImage,
        geometry: TileGeometry,
        filter: &ColorFilter,
    ) -> Option<TileProgress> {
        match analyze_tile(&key, template, live, geometry, filter) {
            Ok(analysis) => {
                let progress = analysis.progress;
                self.record(key, analysis);
                Some(progress)
            }
            Err(e) => {
                self.record_failure(key, &e);
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.tiles.clear();
    }

    pub fn remove_tile(&mut self, key: &TileKey) {
        self.tiles.remove(key);
    }

    pub fn tile_progress(&self, key: &TileKey) -> TileProgress {
        self.tiles.get(key).map(|a| a.progress).unwrap_or_default()
    }

    pub fn tile_keys(&self) -> impl Iterator<Item = &TileKey> {
        self.tiles.keys()
    }

    pub fn totals(&self) -> TileProgress {
        let mut totals = TileProgress::default();
        for analysis in self.tiles.values() {
            totals += analysis.progress;
        }
        totals
    }

    fn color_tallies(&self) -> BTreeMap<ColorKey, ColorTally> {
        let mut merged: BTreeMap<ColorKey, ColorTally> = BTreeMap::new();
        for analysis in self.tiles.values() {
            for (color, tally) in &analysis.colors {
                let entry = merged.entry(*color).or_default();
                entry.required += tally.required;
                entry.painted += tally.painted;
            }
        }
        merged
    }

    /// Stats for one color; zeros when the color is not required anywhere
    pub fn color_stat(&self, color: &ColorKey) -> ColorStats {
        let tally = self.color_tallies().get(color).copied().unwrap_or_default();
        ColorStats::from_tally(*color, tally)
    }

    /// All colors, most remaining work first
    pub fn color_stats(&self) -> Vec<ColorStats> {
        let mut stats: Vec<ColorStats> = self
            .color_tallies()
            .into_iter()
            .map(|(color, tally)| ColorStats::from_tally(color, tally))
            .collect();
        stats.sort_by(|a, b| b.needs_crosshair.cmp(&a.needs_crosshair).then(a.color.cmp(&b.color)));
        stats
    }

    pub fn report(&self) -> ProgressReport {
        let totals = self.totals();
        ProgressReport {
            totals,
            tiles_analyzed: self.tiles.len(),
            completion: percentage(totals.painted, totals.required),
            colors: self.color_stats(),
        }
    }
}
