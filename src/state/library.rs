use log::{error, info, warn};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::analysis::crosshair::CrosshairRenderer;
use crate::analysis::progress::{ProgressReport, ProgressTracker, TileProgress};
use crate::color::{ColorKey, Invalidation};
use crate::error::{OverlayError, Result};
use crate::pipeline::{Composite, FreezeState, LiveTile, TileCache};
use crate::state::record::{OverlayRecord, TemplateRecord};
use crate::state::settings::{EngineConfig, Settings};
use crate::state::storage::{RecordStore, RECORD_KEY, SETTINGS_KEY};
use crate::state::template::{Template, TemplateId};
use crate::tiles::codec::encode_png;
use crate::tiles::generator::TileGeometry;
use crate::tiles::key::{TemplateCoords, TileCoords};

/// A template plus the runtime state derived from it
#[derive(Debug)]
pub struct TemplateEntry {
    pub template: Template,
    progress: ProgressTracker,
    crosshair: CrosshairRenderer,
}

impl TemplateEntry {
    fn new(template: Template) -> Self {
        Self {
            template,
            progress: ProgressTracker::new(),
            crosshair: CrosshairRenderer::new(),
        }
    }
}

/// The TemplateLibrary owns every template, the composite tile cache and the
/// record store. All filter and settings changes go through it so the
/// derived caches are cleared before anything reads them again.
pub struct TemplateLibrary {
    identity_tag: String,
    geometry: TileGeometry,
    settings: Settings,
    /// Ordered by sort priority, lowest drawn first
    templates: BTreeMap<TemplateId, TemplateEntry>,
    /// Stored templates that failed to load, written back untouched
    unloaded: BTreeMap<String, TemplateRecord>,
    /// Set when the stored record can't be read by this version; the
    /// record is never overwritten while this holds
    locked: Option<String>,
    cache: TileCache,
    store: Box<dyn RecordStore>,
}

impl TemplateLibrary {
    /// Open the library and load whatever the store holds.
    ///
    /// - A missing record starts an empty library with a fresh identity tag
    /// - A record that doesn't parse, or comes from another major schema
    ///   version, opens the library locked: nothing is loaded and every write
    ///   to the record fails until `delete_all` discards it
    /// - A template that fails to load is logged and kept as stored
    pub fn open(config: &EngineConfig, store: Box<dyn RecordStore>) -> Result<Self> {
        let geometry = config.geometry()?;

        let settings = match store.load(SETTINGS_KEY)? {
            Some(json) => Settings::from_json(&json).unwrap_or_else(|e| {
                warn!("⚠️  Stored settings unreadable, using defaults: {}", e);
                Settings::default()
            }),
            None => Settings::default(),
        };

        let stored = store.load(RECORD_KEY)?;

        let mut library = TemplateLibrary {
            identity_tag: String::new(),
            geometry,
            settings,
            templates: BTreeMap::new(),
            unloaded: BTreeMap::new(),
            locked: None,
            cache: TileCache::new(config.cache_capacity),
            store,
        };

        match stored {
            Some(json) => match OverlayRecord::from_json(&json) {
                Ok(record) => library.restore(record),
                Err(e) => {
                    library.identity_tag = stored_identity_tag(&json).unwrap_or_else(|| Uuid::new_v4().to_string());
                    library.lock(format!("stored record is unreadable: {}", e));
                }
            },
            None => {
                library.identity_tag = Uuid::new_v4().to_string();
                info!("🆔 New identity tag {}", library.identity_tag);
                library.save()?;
            }
        }

        Ok(library)
    }

    fn restore(&mut self, record: OverlayRecord) {
        self.identity_tag = record.identity_tag.clone();

        if !record.is_compatible() {
            self.lock(format!(
                "stored record has schema {}, this version writes {}",
                record.schema_version,
                crate::state::record::SCHEMA_VERSION
            ));
            return;
        }

        for (key, template_record) in record.templates {
            let loaded = key
                .parse::<TemplateId>()
                .and_then(|id| Template::from_record(id, &template_record, self.geometry));
            match loaded {
                Ok(template) => {
                    self.templates.insert(template.id.clone(), TemplateEntry::new(template));
                }
                Err(e) => {
                    error!("❌ Template '{}' not loaded, keeping it as stored: {}", key, e);
                    self.unloaded.insert(key, template_record);
                }
            }
        }

        info!("✅ Loaded {} templates (record v{})", self.templates.len(), record.script_version);
    }

    fn lock(&mut self, reason: String) {
        error!("🔒 Template record is read-only: {}", reason);
        self.locked = Some(reason);
    }

    /// Why the stored record can't be written, if it can't
    pub fn locked_reason(&self) -> Option<&str> {
        self.locked.as_deref()
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.locked {
            Some(reason) => Err(OverlayError::RecordLocked(reason.clone())),
            None => Ok(()),
        }
    }

    /// Write the template record. Both stores failing is fatal.
    pub fn save(&self) -> Result<()> {
        self.ensure_writable()?;
        let mut record = OverlayRecord::new(self.identity_tag.clone());
        record.templates = self.unloaded.clone();
        for (id, entry) in &self.templates {
            record.templates.insert(id.to_string(), entry.template.to_record());
        }
        self.store.save(RECORD_KEY, &record.to_json()?)
    }

    pub fn identity_tag(&self) -> &str {
        &self.identity_tag
    }

    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    // ---- templates ----------------------------------------------------------

    /// Templates in draw order
    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values().map(|e| &e.template)
    }

    pub fn template(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id).map(|e| &e.template)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Keys of stored templates that failed to load
    pub fn unloaded_templates(&self) -> impl Iterator<Item = &str> {
        self.unloaded.keys().map(String::as_str)
    }

    fn next_sort_id(&self) -> u32 {
        let loaded = self.templates.keys().map(|id| id.sort_id);
        let unloaded = self
            .unloaded
            .keys()
            .filter_map(|key| key.split_once(' ').and_then(|(sort, _)| sort.parse::<u32>().ok()));
        loaded.chain(unloaded).map(|sort_id| sort_id + 1).max().unwrap_or(0)
    }

    /// Create a template from uploaded image bytes and persist it.
    /// It is drawn after every existing template.
    pub fn create_template(&mut self, name: &str, coords: TemplateCoords, image_bytes: &[u8]) -> Result<TemplateId> {
        self.ensure_writable()?;
        let id = TemplateId::new(self.next_sort_id(), self.identity_tag.clone());
        let template = Template::from_image(id.clone(), name, coords, self.geometry, image_bytes)?;
        self.insert_template(template)?;
        Ok(id)
    }

    /// Add or replace a template and persist
    pub fn insert_template(&mut self, template: Template) -> Result<()> {
        self.ensure_writable()?;
        let id = template.id.clone();
        for tile in template.live_tiles() {
            self.cache.remove_tile(&tile);
        }
        self.unloaded.remove(&id.to_string());
        if let Some(old) = self.templates.insert(id.clone(), TemplateEntry::new(template)) {
            self.purge(&old);
        }
        self.save()
    }

    pub fn delete_template(&mut self, id: &TemplateId) -> Result<()> {
        self.ensure_writable()?;
        match self.templates.remove(id) {
            Some(entry) => {
                self.purge(&entry);
                info!("🗑️  Deleted template '{}' ({})", entry.template.name, id);
            }
            None => {
                let stored = self
                    .unloaded
                    .remove(&id.to_string())
                    .ok_or_else(|| OverlayError::TemplateNotFound(id.to_string()))?;
                info!("🗑️  Deleted unloaded template '{}' ({})", stored.name, id);
            }
        }
        self.save()
    }

    /// Delete every template, including ones that failed to load. This is
    /// also how a locked record gets discarded.
    pub fn delete_all(&mut self) -> Result<()> {
        let count = self.templates.len() + self.unloaded.len();
        self.templates.clear();
        self.unloaded.clear();
        self.cache.clear();
        if let Some(reason) = self.locked.take() {
            warn!("⚠️  Discarding the locked record ({})", reason);
        }
        info!("🗑️  Deleted all {} templates", count);
        self.save()
    }

    /// Drop cached composites that include this template
    fn purge(&mut self, entry: &TemplateEntry) {
        for tile in entry.template.live_tiles() {
            self.cache.remove_tile(&tile);
        }
    }

    pub fn set_enabled(&mut self, id: &TemplateId, enabled: bool) -> Result<()> {
        self.ensure_writable()?;
        let entry = self.entry_mut(id)?;
        if entry.template.enabled == enabled {
            return Ok(());
        }
        entry.template.enabled = enabled;
        let tiles = entry.template.live_tiles();
        for tile in tiles {
            self.cache.remove_tile(&tile);
        }
        self.save()
    }

    fn entry_mut(&mut self, id: &TemplateId) -> Result<&mut TemplateEntry> {
        self.templates
            .get_mut(id)
            .ok_or_else(|| OverlayError::TemplateNotFound(id.to_string()))
    }

    // ---- color filter -------------------------------------------------------

    pub fn disable_color(&mut self, id: &TemplateId, color: ColorKey) -> Result<Invalidation> {
        self.ensure_writable()?;
        let token = self.entry_mut(id)?.template.disable_color(color);
        self.consume(id, token)
    }

    pub fn enable_color(&mut self, id: &TemplateId, color: ColorKey) -> Result<Invalidation> {
        self.ensure_writable()?;
        let token = self.entry_mut(id)?.template.enable_color(color);
        self.consume(id, token)
    }

    pub fn enhance_color(&mut self, id: &TemplateId, color: ColorKey) -> Result<Invalidation> {
        self.ensure_writable()?;
        let token = self.entry_mut(id)?.template.enhance_color(color);
        self.consume(id, token)
    }

    pub fn unenhance_color(&mut self, id: &TemplateId, color: ColorKey) -> Result<Invalidation> {
        self.ensure_writable()?;
        let token = self.entry_mut(id)?.template.unenhance_color(color);
        self.consume(id, token)
    }

    pub fn clear_enhanced(&mut self, id: &TemplateId) -> Result<Invalidation> {
        self.ensure_writable()?;
        let token = self.entry_mut(id)?.template.clear_enhanced();
        self.consume(id, token)
    }

    /// Clear everything derived from the template's filter, then persist
    fn consume(&mut self, id: &TemplateId, token: Invalidation) -> Result<Invalidation> {
        if !token.changed {
            return Ok(token);
        }

        let entry = self.entry_mut(id)?;
        entry.crosshair.invalidate();
        entry.progress.reset();
        let tiles = entry.template.live_tiles();
        for tile in tiles {
            self.cache.remove_tile(&tile);
        }

        info!("🎨 Filter of {} now at revision {}", id, token.revision);
        self.save()?;
        Ok(token)
    }

    // ---- settings -----------------------------------------------------------

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) -> Result<()> {
        if settings == self.settings {
            return Ok(());
        }
        self.settings = settings;
        for entry in self.templates.values_mut() {
            entry.crosshair.invalidate();
        }
        self.cache.clear();
        self.store.save(SETTINGS_KEY, &self.settings.to_json()?)
    }

    // ---- progress -----------------------------------------------------------

    pub fn progress(&self, id: &TemplateId) -> Result<ProgressReport> {
        self.templates
            .get(id)
            .map(|e| e.progress.report())
            .ok_or_else(|| OverlayError::TemplateNotFound(id.to_string()))
    }

    /// Sum over every enabled template
    pub fn total_progress(&self) -> TileProgress {
        let mut totals = TileProgress::default();
        for entry in self.templates.values().filter(|e| e.template.enabled) {
            totals += entry.progress.totals();
        }
        totals
    }

    // ---- live tiles ---------------------------------------------------------

    pub fn tile_cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn freeze(&mut self) {
        self.cache.freeze();
    }

    pub fn unfreeze(&mut self) {
        self.cache.unfreeze();
    }

    pub fn toggle_freeze(&mut self) -> FreezeState {
        self.cache.toggle()
    }

    /// Turn the raw bytes of a fetched live tile into what the host should
    /// display.
    ///
    /// - Frozen: the cached composite, or the raw bytes when nothing is cached
    /// - No enabled template on this tile: the raw bytes
    /// - Otherwise: the composite PNG, which is also cached
    pub async fn handle_tile_fetch(&mut self, tile: TileCoords, raw: &[u8]) -> Result<Vec<u8>> {
        if self.cache.is_frozen() {
            return Ok(self.cache.get(&tile).unwrap_or(raw).to_vec());
        }

        let covered = self
            .templates
            .values()
            .any(|e| e.template.enabled && e.template.covers(tile));
        if !covered {
            return Ok(raw.to_vec());
        }

        let live = LiveTile::decode(tile, raw)?;
        let style = self.settings.crosshair_style();
        let mut composite = Composite::new(&live, self.geometry);

        for entry in self.templates.values_mut().filter(|e| e.template.enabled) {
            composite
                .add_template(&entry.template, &live, &mut entry.progress, &mut entry.crosshair, style)
                .await;
        }

        let canvas = composite.finish(self.geometry);
        match encode_png(&canvas) {
            Ok(png) => {
                self.cache.insert(tile, png.clone());
                Ok(png)
            }
            Err(e) => {
                error!("❌ Composite for tile {} not encoded, serving raw tile: {}", tile, e);
                Ok(raw.to_vec())
            }
        }
    }
}

/// Identity tag of a record that doesn't otherwise parse
fn stored_identity_tag(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value.get("identityTag")?.as_str().map(str::to_string)
}

impl std::fmt::Debug for TemplateLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateLibrary")
            .field("identity_tag", &self.identity_tag)
            .field("templates", &self.templates.len())
            .field("locked", &self.locked)
            .field("store", &self.store.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::storage::{JsonFileStore, SqliteStore};
    use crate::tiles::key::TileKey;
    use crate::tiles::raster::decode_rgba;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn config() -> EngineConfig {
        EngineConfig {
            tile_size: 20,
            magnification: 3,
            cache_capacity: 10,
            data_dir: None,
        }
    }

    fn png(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(width, height, pixel)).unwrap()
    }

    fn two_color_png() -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(2, 2, RED);
        img.put_pixel(0, 0, BLUE);
        encode_png(&img).unwrap()
    }

    fn memory_library() -> TemplateLibrary {
        TemplateLibrary::open(&config(), Box::new(SqliteStore::open_in_memory().unwrap())).unwrap()
    }

    fn json_store(path: &Path) -> Box<dyn RecordStore> {
        Box::new(JsonFileStore::new(path))
    }

    /// Raw record JSON as the store holds it
    fn stored_record(path: &Path) -> serde_json::Value {
        let json = JsonFileStore::new(path).load(RECORD_KEY).unwrap().unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_create_assigns_increasing_priority() {
        let mut library = memory_library();
        let a = library
            .create_template("a", TemplateCoords::new(0, 0, 0, 0), &two_color_png())
            .unwrap();
        let b = library
            .create_template("b", TemplateCoords::new(0, 0, 5, 5), &two_color_png())
            .unwrap();

        assert_eq!(a.sort_id, 0);
        assert_eq!(b.sort_id, 1);
        assert_eq!(a.author_id, library.identity_tag());
        let names: Vec<&str> = library.templates().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_bad_image_is_rejected() {
        let mut library = memory_library();
        let result = library.create_template("bad", TemplateCoords::new(0, 0, 0, 0), b"junk");
        assert!(matches!(result, Err(OverlayError::Decode(_))));
        assert!(library.is_empty());
    }

    #[test]
    fn test_delete_and_delete_all() {
        let mut library = memory_library();
        let a = library
            .create_template("a", TemplateCoords::new(0, 0, 0, 0), &two_color_png())
            .unwrap();
        library
            .create_template("b", TemplateCoords::new(0, 0, 0, 0), &two_color_png())
            .unwrap();

        library.delete_template(&a).unwrap();
        assert_eq!(library.len(), 1);
        assert!(matches!(
            library.delete_template(&a),
            Err(OverlayError::TemplateNotFound(_))
        ));

        library.delete_all().unwrap();
        assert!(library.is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        let open = || TemplateLibrary::open(&config(), json_store(&path)).unwrap();

        let (tag, id) = {
            let mut library = open();
            let id = library
                .create_template("flag", TemplateCoords::new(1, 2, 10, 10), &two_color_png())
                .unwrap();
            let _ = library.enhance_color(&id, ColorKey::new(255, 0, 0)).unwrap();
            library
                .set_settings(Settings { border_enabled: true, ..Settings::default() })
                .unwrap();
            (library.identity_tag().to_string(), id)
        };

        let library = open();
        assert_eq!(library.identity_tag(), tag);
        assert!(library.settings().border_enabled);
        let template = library.template(&id).unwrap();
        assert_eq!(template.name, "flag");
        assert_eq!(template.pixel_count, 4);
        assert!(template.filter().is_enhanced(&ColorKey::new(255, 0, 0)));
    }

    #[test]
    fn test_unreadable_record_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        let original = r#"{"identityTag":"me","templates":{}}"#;
        JsonFileStore::new(&path).save(RECORD_KEY, original).unwrap();

        let mut library = TemplateLibrary::open(&config(), json_store(&path)).unwrap();
        assert!(library.locked_reason().is_some());
        assert_eq!(library.identity_tag(), "me");

        let result = library.create_template("new", TemplateCoords::new(0, 0, 0, 0), &two_color_png());
        assert!(matches!(result, Err(OverlayError::RecordLocked(_))));
        assert!(library.is_empty());
        assert_eq!(
            JsonFileStore::new(&path).load(RECORD_KEY).unwrap().as_deref(),
            Some(original)
        );

        // Deleting everything is the explicit way out
        library.delete_all().unwrap();
        assert!(library.locked_reason().is_none());
        let stored = stored_record(&path);
        assert_eq!(stored["identityTag"], "me");
        assert_eq!(stored["schemaVersion"], crate::state::record::SCHEMA_VERSION);
    }

    #[test]
    fn test_incompatible_record_is_kept_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        let mut record = OverlayRecord::new("me");
        record.schema_version = "2.0.0".into();
        record.templates.insert(
            "0 me".into(),
            TemplateRecord {
                name: "keepme".into(),
                coords: TemplateCoords::new(0, 0, 0, 0),
                enabled: true,
                disabled_colors: vec![],
                enhanced_colors: vec![],
                tiles: BTreeMap::new(),
            },
        );
        JsonFileStore::new(&path).save(RECORD_KEY, &record.to_json().unwrap()).unwrap();

        let mut library = TemplateLibrary::open(&config(), json_store(&path)).unwrap();
        assert_eq!(library.identity_tag(), "me");
        assert!(library.is_empty());

        let result = library.create_template("new", TemplateCoords::new(0, 0, 0, 0), &two_color_png());
        assert!(matches!(result, Err(OverlayError::RecordLocked(_))));
        assert!(result.unwrap_err().is_fatal());
        assert!(library.disable_color(&TemplateId::new(0, "me"), ColorKey::new(0, 0, 0)).is_err());

        let stored = stored_record(&path);
        assert_eq!(stored["schemaVersion"], "2.0.0");
        assert_eq!(stored["templates"]["0 me"]["name"], "keepme");
    }

    #[test]
    fn test_template_that_fails_to_load_is_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        let mut record = OverlayRecord::new("me");
        // Pixel offset 50 does not fit a 20 pixel tile
        record.templates.insert(
            "0 me".into(),
            TemplateRecord {
                name: "broken".into(),
                coords: TemplateCoords::new(0, 0, 50, 0),
                enabled: true,
                disabled_colors: vec![],
                enhanced_colors: vec![],
                tiles: BTreeMap::new(),
            },
        );
        JsonFileStore::new(&path).save(RECORD_KEY, &record.to_json().unwrap()).unwrap();

        let mut library = TemplateLibrary::open(&config(), json_store(&path)).unwrap();
        assert!(library.locked_reason().is_none());
        assert!(library.is_empty());
        assert_eq!(library.unloaded_templates().collect::<Vec<_>>(), vec!["0 me"]);

        let id = library
            .create_template("new", TemplateCoords::new(0, 0, 0, 0), &two_color_png())
            .unwrap();
        assert_eq!(id.sort_id, 1);

        let stored = stored_record(&path);
        assert_eq!(stored["templates"]["0 me"]["name"], "broken");
        assert_eq!(stored["templates"]["1 me"]["name"], "new");

        library.delete_template(&TemplateId::new(0, "me")).unwrap();
        assert!(stored_record(&path)["templates"].get("0 me").is_none());
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_color_ops_on_unknown_template() {
        let mut library = memory_library();
        let missing = TemplateId::new(42, "nobody");
        assert!(library.disable_color(&missing, ColorKey::new(0, 0, 0)).is_err());
        assert!(library.progress(&missing).is_err());
    }

    #[tokio::test]
    async fn test_tile_fetch_composites_and_tracks_progress() {
        let mut library = memory_library();
        let id = library
            .create_template("flag", TemplateCoords::new(1, 2, 10, 10), &two_color_png())
            .unwrap();
        let tile = TileCoords::new(1, 2);

        let out = library
            .handle_tile_fetch(tile, &png(20, 20, Rgba([0, 0, 0, 0])))
            .await
            .unwrap();
        let composite = decode_rgba(&out).unwrap();
        assert_eq!(composite.dimensions(), (60, 60));
        assert_eq!(*composite.get_pixel(31, 31), BLUE);
        assert_eq!(*composite.get_pixel(34, 31), RED);

        let report = library.progress(&id).unwrap();
        assert_eq!(report.totals.required, 4);
        assert_eq!(report.totals.painted, 0);
        assert_eq!(library.tile_cache().len(), 1);

        // Untouched tile passes through
        let raw = png(20, 20, RED);
        let passthrough = library.handle_tile_fetch(TileCoords::new(7, 7), &raw).await.unwrap();
        assert_eq!(passthrough, raw);
    }

    #[tokio::test]
    async fn test_disabling_only_color_clears_requirement() {
        let mut library = memory_library();
        let id = library
            .create_template("solid", TemplateCoords::new(0, 0, 0, 0), &png(3, 3, RED))
            .unwrap();
        let tile = TileCoords::new(0, 0);
        let live = png(20, 20, Rgba([0, 0, 0, 0]));

        library.handle_tile_fetch(tile, &live).await.unwrap();
        assert_eq!(library.progress(&id).unwrap().totals.required, 9);

        let token = library.disable_color(&id, ColorKey::new(255, 0, 0)).unwrap();
        assert!(token.changed);
        assert!(library.tile_cache().is_empty());
        assert_eq!(library.progress(&id).unwrap().totals.required, 0);

        library.handle_tile_fetch(tile, &live).await.unwrap();
        let report = library.progress(&id).unwrap();
        assert_eq!(report.totals.required, 0);
        assert_eq!(library.template(&id).unwrap().required_pixel_count(), 0);

        // Repeating the change is a no-op
        assert!(!library.disable_color(&id, ColorKey::new(255, 0, 0)).unwrap().changed);
    }

    #[tokio::test]
    async fn test_settings_change_clears_caches() {
        let mut library = memory_library();
        library
            .create_template("flag", TemplateCoords::new(1, 2, 10, 10), &two_color_png())
            .unwrap();
        let tile = TileCoords::new(1, 2);
        let live = png(20, 20, Rgba([0, 0, 0, 0]));

        let before = decode_rgba(&library.handle_tile_fetch(tile, &live).await.unwrap()).unwrap();
        // Diagonal of the center at (31, 31) carries no corner mark yet
        assert_eq!(before.get_pixel(30, 30)[3], 0);
        assert_eq!(library.tile_cache().len(), 1);
        assert!(library.templates.values().all(|e| e.crosshair.cached_chunks() > 0));

        library
            .set_settings(Settings { border_enabled: true, ..Settings::default() })
            .unwrap();
        assert!(library.tile_cache().is_empty());
        assert!(library.templates.values().all(|e| e.crosshair.cached_chunks() == 0));

        let after = decode_rgba(&library.handle_tile_fetch(tile, &live).await.unwrap()).unwrap();
        assert!(after.get_pixel(30, 30)[3] > 0);
    }

    #[tokio::test]
    async fn test_frozen_tile_is_served_from_cache() {
        let mut library = memory_library();
        library
            .create_template("flag", TemplateCoords::new(1, 2, 10, 10), &two_color_png())
            .unwrap();
        let key: TileKey = "0001,0002,010,010".parse().unwrap();
        assert!(library.templates().next().unwrap().tiles().contains_key(&key));

        let composite_x = library
            .handle_tile_fetch(key.tile(), &png(20, 20, Rgba([0, 0, 0, 0])))
            .await
            .unwrap();

        library.freeze();
        let raw_y = png(20, 20, RED);
        let served = library.handle_tile_fetch(key.tile(), &raw_y).await.unwrap();
        assert_eq!(served, composite_x);

        // Nothing cached for this tile, so the raw bytes come back
        let other = library.handle_tile_fetch(TileCoords::new(3, 3), &raw_y).await.unwrap();
        assert_eq!(other, raw_y);

        assert_eq!(library.toggle_freeze(), FreezeState::Live);
        let fresh = library.handle_tile_fetch(key.tile(), &raw_y).await.unwrap();
        assert_ne!(fresh, composite_x);
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces() {
        let mut library = memory_library();
        library
            .create_template("flag", TemplateCoords::new(0, 0, 0, 0), &two_color_png())
            .unwrap();
        let result = library.handle_tile_fetch(TileCoords::new(0, 0), b"garbage").await;
        assert!(matches!(result, Err(OverlayError::Decode(_))));
    }
}
