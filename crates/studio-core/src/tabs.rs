//! Open tabs and the active-tab pointer.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, ShortId, TEMPLATES};

/// What a tab shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TabKind {
    /// Editor bound to an entity in the store
    Entity {
        id: EntityId,
        #[serde(rename = "entitySet")]
        entity_set: String,
    },
    /// Any other view (startup page, settings, ...)
    Custom,
}

/// A single open tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub key: String,

    #[serde(flatten)]
    pub kind: TabKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_component_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Set for header/footer sub-views of a template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_or_footer: Option<String>,
}

impl Tab {
    /// Creates a tab editing an entity.
    pub fn entity(id: EntityId, entity_set: impl Into<String>) -> Self {
        Self {
            key: id.to_string(),
            kind: TabKind::Entity {
                id,
                entity_set: entity_set.into(),
            },
            editor_component_key: None,
            title: None,
            header_or_footer: None,
        }
    }

    /// Creates a custom view tab.
    pub fn custom(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: TabKind::Custom,
            editor_component_key: None,
            title: None,
            header_or_footer: None,
        }
    }

    /// Returns the referenced entity id, if any.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match &self.kind {
            TabKind::Entity { id, .. } => Some(id),
            TabKind::Custom => None,
        }
    }

    /// Returns the referenced entity set, if any.
    pub fn entity_set(&self) -> Option<&str> {
        match &self.kind {
            TabKind::Entity { entity_set, .. } => Some(entity_set),
            TabKind::Custom => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self.kind, TabKind::Entity { .. })
    }

    /// Key used to look up editor capabilities for this tab.
    pub fn editor_key(&self) -> Option<&str> {
        self.editor_component_key
            .as_deref()
            .or_else(|| self.entity_set())
    }
}

/// Request to open a tab, as issued by the UI or a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabSpec {
    pub key: Option<String>,
    pub id: Option<EntityId>,
    pub shortid: Option<ShortId>,
    /// Needed to fetch an entity the store doesn't know about yet
    pub entity_set: Option<String>,
    pub editor_component_key: Option<String>,
    pub title: Option<String>,
    pub header_or_footer: Option<String>,
}

impl TabSpec {
    pub fn for_entity(id: EntityId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn for_shortid(shortid: ShortId) -> Self {
        Self {
            shortid: Some(shortid),
            ..Self::default()
        }
    }

    pub fn custom(key: impl Into<String>, editor_component_key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            editor_component_key: Some(editor_component_key.into()),
            ..Self::default()
        }
    }
}

/// Ordered list of open tabs.
#[derive(Debug, Clone, Default)]
pub struct TabManager {
    /// Tabs in display order
    tabs: Vec<Tab>,

    /// Key of the active tab
    active: Option<String>,

    /// Template that was active most recently (the run target)
    last_active_template: Option<EntityId>,
}

impl TabManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tab unless one with the same key is already open.
    pub fn open(&mut self, tab: Tab) {
        match self.tabs.iter_mut().find(|t| t.key == tab.key) {
            Some(existing) => *existing = tab,
            None => self.tabs.push(tab),
        }
    }

    /// Removes a tab. The active tab falls back to the last one.
    pub fn close(&mut self, key: &str) -> Option<Tab> {
        let index = self.tabs.iter().position(|t| t.key == key)?;
        let tab = self.tabs.remove(index);

        if self.active.as_deref() == Some(key) {
            let fallback = self.tabs.last().map(|t| t.key.clone());
            self.active = None;
            if let Some(fallback) = fallback {
                self.activate(&fallback);
            }
        }

        Some(tab)
    }

    /// Closes every tab bound to an entity. Returns the closed keys.
    pub fn close_for_entity(&mut self, id: &EntityId) -> Vec<String> {
        let keys: Vec<String> = self
            .tabs
            .iter()
            .filter(|t| t.entity_id() == Some(id))
            .map(|t| t.key.clone())
            .collect();

        for key in &keys {
            self.close(key);
        }

        if self.last_active_template.as_ref() == Some(id) {
            self.last_active_template = None;
        }

        keys
    }

    /// Sets the active tab. Unknown keys are ignored.
    pub fn activate(&mut self, key: &str) -> bool {
        let Some(tab) = self.tabs.iter().find(|t| t.key == key) else {
            return false;
        };

        if tab.entity_set() == Some(TEMPLATES) {
            self.last_active_template = tab.entity_id().cloned();
        }

        self.active = Some(key.to_string());
        true
    }

    /// Points tabs of a re-keyed entity at its new id.
    pub fn rekey(&mut self, old: &EntityId, new: &EntityId) {
        if old == new {
            return;
        }

        for tab in &mut self.tabs {
            if let TabKind::Entity { id, .. } = &mut tab.kind {
                if id == old {
                    *id = new.clone();
                    if tab.key == old.as_str() {
                        if self.active.as_deref() == Some(tab.key.as_str()) {
                            self.active = Some(new.to_string());
                        }
                        tab.key = new.to_string();
                    }
                }
            }
        }

        if self.last_active_template.as_ref() == Some(old) {
            self.last_active_template = Some(new.clone());
        }
    }

    /// Returns the active tab.
    pub fn active(&self) -> Option<&Tab> {
        let key = self.active.as_deref()?;
        self.get(key)
    }

    /// Returns the active tab key.
    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Returns a tab by key.
    pub fn get(&self, key: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.key == key)
    }

    /// Returns the template that was active most recently.
    pub fn last_active_template(&self) -> Option<&EntityId> {
        self.last_active_template.as_ref()
    }

    /// Iterates tabs in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.iter()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}
