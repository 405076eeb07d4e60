//! Studio configuration.
//!
//! ## Learning: Serde for Serialization
//!
//! `#[serde(default)]` uses `Default::default()` for missing fields, so a
//! config file only has to name what it changes.
//!
//! The configuration is built once at startup and shared by reference
//! (`Arc<StudioConfig>`). Nothing mutates it after that.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::entity::{FOLDERS, TEMPLATES};

/// Main studio configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Registered entity sets, keyed by set name
    pub entity_sets: BTreeMap<String, EntitySetConfig>,

    /// Template engines available on the server
    pub engines: Vec<String>,

    /// Recipes available on the server
    pub recipes: Vec<String>,

    /// Editor behavior settings
    pub editor: EditorConfig,

    /// HTTP integration settings
    pub server: ServerConfig,
}

impl StudioConfig {
    /// Loads config from the default location.
    pub fn load() -> Self {
        Self::load_from_default_path().unwrap_or_default()
    }

    /// Loads config from a file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    fn load_from_default_path() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("reportstudio").join("config.toml"))
    }

    /// Saves the config to the given path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the definition of an entity set.
    pub fn entity_set(&self, name: &str) -> Option<&EntitySetConfig> {
        self.entity_sets.get(name)
    }

    /// Returns the attribute holding an entity's name (`name` if unknown).
    pub fn name_attribute(&self, entity_set: &str) -> &str {
        self.entity_set(entity_set)
            .map(|s| s.name_attribute.as_str())
            .unwrap_or("name")
    }

    /// Returns `preferred` if it is in `available`.
    fn pick<'a>(available: &'a [String], preferred: &str) -> Option<&'a str> {
        available
            .iter()
            .find(|r| r.as_str() == preferred)
            .map(String::as_str)
    }

    /// Default recipe for new templates.
    pub fn default_recipe(&self) -> &str {
        Self::pick(&self.recipes, "chrome-pdf").unwrap_or("html")
    }

    /// Default engine for new templates.
    pub fn default_engine(&self) -> Option<&str> {
        Self::pick(&self.engines, "handlebars").or_else(|| self.engines.first().map(String::as_str))
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        let mut entity_sets = BTreeMap::new();
        entity_sets.insert(
            TEMPLATES.to_string(),
            EntitySetConfig {
                name: TEMPLATES.to_string(),
                visible_name: "template".to_string(),
                name_attribute: "name".to_string(),
                reference_attributes: vec![
                    "name".to_string(),
                    "recipe".to_string(),
                    "shortid".to_string(),
                ],
                visible_in_tree: true,
            },
        );
        entity_sets.insert(
            FOLDERS.to_string(),
            EntitySetConfig {
                name: FOLDERS.to_string(),
                visible_name: "folder".to_string(),
                name_attribute: "name".to_string(),
                reference_attributes: vec!["name".to_string(), "shortid".to_string()],
                visible_in_tree: false,
            },
        );

        Self {
            entity_sets,
            engines: vec!["handlebars".to_string(), "none".to_string()],
            recipes: vec!["chrome-pdf".to_string(), "html".to_string()],
            editor: EditorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Definition of an entity set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySetConfig {
    /// Set name (`templates`, `folders`, ...)
    pub name: String,

    /// Human readable singular name
    pub visible_name: String,

    /// Field that holds the entity's name
    pub name_attribute: String,

    /// Fields kept when an entity is unloaded
    pub reference_attributes: Vec<String>,

    /// Whether the set shows up as its own tree group
    pub visible_in_tree: bool,
}

impl Default for EntitySetConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            visible_name: String::new(),
            name_attribute: "name".to_string(),
            reference_attributes: vec!["name".to_string(), "shortid".to_string()],
            visible_in_tree: true,
        }
    }
}

/// Editor behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Indent width used by the reformatter
    pub indent_size: usize,

    /// Path prefix the studio is mounted under (always ends with `/`)
    pub app_path: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            indent_size: 2,
            app_path: "/".to_string(),
        }
    }
}

impl EditorConfig {
    /// Resolves an app-relative path against `app_path`.
    pub fn resolve_url(&self, path: &str) -> String {
        let base = self.app_path.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// HTTP integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,

    /// Directory holding `favicon.ico` and `dist/`
    pub static_path: PathBuf,

    /// Server mode, shown in the default page title
    pub mode: String,

    /// Product version, shown in the default page title
    pub version: String,

    /// Compress responses
    pub use_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5488".to_string(),
            static_path: PathBuf::from("static"),
            mode: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            use_compression: false,
        }
    }
}

impl ServerConfig {
    /// Directory with the built client assets.
    pub fn dist_path(&self) -> PathBuf {
        self.static_path.join("dist")
    }

    /// Title used when the request doesn't supply one.
    pub fn default_title(&self) -> String {
        format!("jsreport {} {}", self.version, self.mode)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config directory not found")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
