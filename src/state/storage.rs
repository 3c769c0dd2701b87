use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{OverlayError, Result};

/// Record key of the template document
pub const RECORD_KEY: &str = "overlay";
/// Record key of the user settings
pub const SETTINGS_KEY: &str = "settings";

/// Key-value store for serialized JSON documents
pub trait RecordStore {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, json: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    /// Short label for log lines
    fn name(&self) -> &str;
}

/// SQLite-backed store.
///
/// The database file lives in the engine data directory:
/// - Linux: ~/.local/share/template-overlay/overlay.db
/// - macOS: ~/Library/Application Support/template-overlay/overlay.db
/// - Windows: %APPDATA%\template-overlay\overlay.db
pub struct SqliteStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        info!("📁 Database opened at: {}", db_path.display());

        let store = SqliteStore { conn, db_path: Some(db_path) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = SqliteStore {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates the records table if it doesn't exist
    fn init_schema(&self) -> Result<()> {
        // One row per document, the payload is the raw JSON text
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                key             TEXT PRIMARY KEY,
                json            TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Unix time of the last write to `key`
    pub fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        let ts = self
            .conn
            .query_row("SELECT updated_at FROM records WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(ts)
    }
}

impl RecordStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let json = self
            .conn
            .query_row("SELECT json FROM records WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(json)
    }

    fn save(&self, key: &str, json: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO records (key, json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at",
            params![key, json, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM records WHERE key = ?1", [key])?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("db_path", &self.db_path).finish()
    }
}

/// Plain JSON file holding every document as `{key: json}`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn write_all(&self, documents: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(documents)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn save(&self, key: &str, json: &str) -> Result<()> {
        let mut documents = self.read_all()?;
        documents.insert(key.to_string(), json.to_string());
        self.write_all(&documents)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut documents = self.read_all()?;
        if documents.remove(key).is_some() {
            self.write_all(&documents)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Primary store with a secondary behind it.
/// - Reads prefer the primary and fall through when it is empty or failing
/// - Writes go to both and succeed when at least one does
/// - Both failing is an `OverlayError::Storage`
pub struct FallbackStore {
    primary: Box<dyn RecordStore>,
    secondary: Box<dyn RecordStore>,
}

impl FallbackStore {
    pub fn new(primary: Box<dyn RecordStore>, secondary: Box<dyn RecordStore>) -> Self {
        Self { primary, secondary }
    }
}

impl RecordStore for FallbackStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let primary_err = match self.primary.load(key) {
            Ok(Some(json)) => return Ok(Some(json)),
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️  {} load of '{}' failed, trying {}: {}", self.primary.name(), key, self.secondary.name(), e);
                Some(e)
            }
        };

        match (self.secondary.load(key), primary_err) {
            (Ok(found), _) => Ok(found),
            (Err(e), None) => {
                warn!("⚠️  {} load of '{}' failed: {}", self.secondary.name(), key, e);
                Ok(None)
            }
            (Err(secondary), Some(primary)) => Err(OverlayError::Storage(format!(
                "both stores failed to load '{}': {}; {}",
                key, primary, secondary
            ))),
        }
    }

    fn save(&self, key: &str, json: &str) -> Result<()> {
        let primary = self.primary.save(key, json);
        let secondary = self.secondary.save(key, json);

        match (primary, secondary) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                warn!("⚠️  {} save of '{}' failed: {}", self.primary.name(), key, e);
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!("⚠️  {} save of '{}' failed: {}", self.secondary.name(), key, e);
                Ok(())
            }
            (Err(p), Err(s)) => Err(OverlayError::Storage(format!(
                "both stores failed to save '{}': {}; {}",
                key, p, s
            ))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let primary = self.primary.delete(key);
        let secondary = self.secondary.delete(key);
        match (primary, secondary) {
            (Err(p), Err(s)) => Err(OverlayError::Storage(format!(
                "both stores failed to delete '{}': {}; {}",
                key, p, s
            ))),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}
