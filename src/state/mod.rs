/// State management module
///
/// This module handles everything that outlives a single tile fetch:
/// - The template entity and its color filter (template.rs)
/// - The library of templates and their derived caches (library.rs)
/// - The persisted record layout (record.rs)
/// - Record stores: SQLite, JSON file and the fallback pair (storage.rs)
/// - User settings and engine configuration (settings.rs)

pub mod library;
pub mod record;
pub mod settings;
pub mod storage;
pub mod template;
