/// Persisted record layout
///
/// Everything the store keeps is one JSON document:
/// `{identityTag, scriptVersion, schemaVersion, templates: {"<sortID> <authorID>": {...}}}`
/// Tiles inside a template are base64 PNG payloads keyed by tile key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::color::ColorKey;
use crate::tiles::key::TemplateCoords;

pub const SCHEMA_VERSION: &str = "1.0.0";
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRecord {
    pub identity_tag: String,
    pub script_version: String,
    pub schema_version: String,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub name: String,
    pub coords: TemplateCoords,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled_colors: Vec<ColorKey>,
    #[serde(default)]
    pub enhanced_colors: Vec<ColorKey>,
    #[serde(default)]
    pub tiles: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl OverlayRecord {
    pub fn new(identity_tag: impl Into<String>) -> Self {
        Self {
            identity_tag: identity_tag.into(),
            script_version: SCRIPT_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            templates: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Records written by another major schema version are not read
    pub fn is_compatible(&self) -> bool {
        major(&self.schema_version) == major(SCHEMA_VERSION)
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or("")
}
