/// Analysis module
///
/// - Per-pixel classification and progress tallies (progress.rs)
/// - Crosshair highlights around enhanced pixels still missing (crosshair.rs)

pub mod crosshair;
pub mod progress;

pub use crosshair::{CrosshairOverlay, CrosshairRenderer, CrosshairStyle};
pub use progress::{ColorStats, PixelClassification, ProgressReport, ProgressTracker, TileProgress};
