//! Entity records and their identifiers.
//!
//! ## Learning: Newtypes at the Wire Boundary
//!
//! `EntityId` and `ShortId` wrap plain strings so the two identifier kinds
//! can't be mixed up. A local id is ephemeral and exists before the first
//! save; a short id is the stable handle other entities (and folders)
//! reference.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Entity set name for templates.
pub const TEMPLATES: &str = "templates";

/// Entity set name for folders.
pub const FOLDERS: &str = "folders";

/// Local identifier of an entity.
///
/// Stores hand out numeric ids as often as string ones. The id remembers
/// which form it arrived in and writes it back the same way; comparison
/// only looks at the text, so `5` and `"5"` name the same entity.
#[derive(Debug, Clone)]
pub struct EntityId {
    value: String,
    numeric: bool,
}

impl EntityId {
    /// Creates a fresh random local id.
    pub fn new() -> Self {
        Self::from(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Returns true if the id travels as a JSON number.
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for EntityId {}

impl std::hash::Hash for EntityId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self {
            value,
            numeric: false,
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self {
            value: n.to_string(),
            numeric: true,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value.parse::<i64>() {
            Ok(n) if self.numeric => serializer.serialize_i64(n),
            _ => serializer.serialize_str(&self.value),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Self::from(s),
            Raw::Int(n) => Self::from(n),
        })
    }
}

const SHORTID_ALPHABET: &[u8; 64] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

/// Stable short identifier of a persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(String);

impl ShortId {
    /// Length of generated short ids.
    pub const LEN: usize = 10;

    /// Generates a random url-safe short id.
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        // bytes 6 and 8 carry the uuid version and variant bits
        let id = bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 6 && *i != 8)
            .map(|(_, b)| b)
            .take(Self::LEN)
            .map(|b| SHORTID_ALPHABET[(b & 0x3f) as usize] as char)
            .collect();
        Self(id)
    }

    /// Returns the short id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ShortId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference from an entity to its parent folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub shortid: ShortId,
}

impl FolderRef {
    pub fn new(shortid: ShortId) -> Self {
        Self { shortid }
    }
}

fn default_loaded() -> bool {
    true
}

/// A persisted (or about to be persisted) studio entity.
///
/// Serializes to the flat object the server speaks. The `__is*` flags are
/// client-side bookkeeping and never leave the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_id")]
    pub id: EntityId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortid: Option<ShortId>,

    #[serde(rename = "__entitySet", default)]
    pub entity_set: String,

    #[serde(default)]
    pub folder: Option<FolderRef>,

    #[serde(rename = "__isNew", default, skip_serializing)]
    pub is_new: bool,

    #[serde(rename = "__isDirty", default, skip_serializing)]
    pub is_dirty: bool,

    #[serde(rename = "__isLoaded", default = "default_loaded", skip_serializing)]
    pub is_loaded: bool,

    /// Type-specific fields (name, content, recipe, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Creates an empty, loaded, persisted-looking entity.
    pub fn new(id: EntityId, entity_set: impl Into<String>) -> Self {
        Self {
            id,
            shortid: None,
            entity_set: entity_set.into(),
            folder: None,
            is_new: false,
            is_dirty: false,
            is_loaded: true,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_shortid(mut self, shortid: impl Into<ShortId>) -> Self {
        self.shortid = Some(shortid.into());
        self
    }

    pub fn with_folder(mut self, folder: Option<ShortId>) -> Self {
        self.folder = folder.map(FolderRef::new);
        self
    }

    /// Returns a string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns the short id of the parent folder, if any.
    pub fn folder_shortid(&self) -> Option<&ShortId> {
        self.folder.as_ref().map(|f| &f.shortid)
    }

    /// Returns true if the entity has changes the server doesn't know about.
    pub fn has_local_changes(&self) -> bool {
        self.is_new || self.is_dirty
    }

    /// Returns true if this entity is a folder.
    pub fn is_folder(&self) -> bool {
        self.entity_set == FOLDERS
    }

    /// Serializes the entity without client bookkeeping flags.
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A partial change to an entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityPatch {
    pub id: EntityId,

    /// `Some(None)` moves the entity to the root.
    pub folder: Option<Option<FolderRef>>,

    pub fields: Map<String, Value>,
}

impl EntityPatch {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            folder: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_folder(mut self, folder: Option<ShortId>) -> Self {
        self.folder = Some(folder.map(FolderRef::new));
        self
    }

    /// Folds a later patch into this one. Later values win.
    pub fn merge(&mut self, later: EntityPatch) {
        if later.folder.is_some() {
            self.folder = later.folder;
        }
        self.fields.extend(later.fields);
    }

    /// Applies the patch onto an entity.
    pub fn apply(&self, entity: &mut Entity) {
        if let Some(folder) = &self.folder {
            entity.folder = folder.clone();
        }
        for (key, value) in &self.fields {
            entity.fields.insert(key.clone(), value.clone());
        }
    }
}
