/// Error types for the overlay engine
///
/// Every fallible operation in the crate returns `Result<T>` with
/// `OverlayError`. Only storage and decode failures are meant to reach
/// the user; everything else is recovered locally by the caller.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode tile: {0}")]
    Encode(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoords(String),

    #[error("Magnification must be an odd number >= 1, got {0}")]
    InvalidMagnification(u32),

    #[error("Invalid color key: {0}")]
    InvalidColor(String),

    #[error("Invalid tile key: {0}")]
    InvalidTileKey(String),

    #[error("Tile analysis failed for {key}: {reason}")]
    Analysis { key: String, reason: String },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("All storage backends failed: {0}")]
    Storage(String),

    #[error("Template record is read-only: {0}")]
    RecordLocked(String),

    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl OverlayError {
    /// Whether this error must be surfaced to the user instead of being
    /// logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OverlayError::Storage(_) | OverlayError::RecordLocked(_) | OverlayError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
