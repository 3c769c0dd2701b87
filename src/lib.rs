//! Template overlay engine
//!
//! Cuts a template image into magnified, tile-aligned chunks, composites them
//! over live canvas tiles, tracks painting progress per color and highlights
//! what is still missing.

pub mod analysis;
pub mod color;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod tiles;

pub use color::{ColorFilter, ColorKey, EnhancedMode, Invalidation};
pub use error::{OverlayError, Result};
pub use state::library::TemplateLibrary;
pub use state::settings::{EngineConfig, Settings};
pub use state::template::{Template, TemplateId};
