//! Normalized in-memory entity store.
//!
//! The store is the only owner of entity records. Tabs and the tree only
//! hold [`EntityId`]s and look records up here.

use std::collections::HashMap;

use serde_json::Map;

use crate::entity::{Entity, EntityId, EntityPatch, ShortId};
use crate::{StudioError, StudioResult};

/// Normalized mapping from local id to entity record.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// All known entities
    entities: HashMap<EntityId, Entity>,

    /// Insertion order (for stable iteration)
    order: Vec<EntityId>,

    /// Buffered grouped updates, applied on flush
    pending: HashMap<EntityId, EntityPatch>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly created, not yet persisted entity.
    pub fn add(&mut self, mut entity: Entity) {
        entity.is_new = true;
        entity.is_loaded = true;
        self.insert(entity);
    }

    /// Merges a record coming from the server.
    ///
    /// The server copy is authoritative, so any local flags are cleared.
    /// Fields the server didn't send are kept from the current record.
    pub fn add_existing(&mut self, mut entity: Entity) {
        if let Some(current) = self.entities.get(&entity.id) {
            if entity.entity_set.is_empty() {
                entity.entity_set = current.entity_set.clone();
            }
            let mut fields = current.fields.clone();
            fields.extend(std::mem::take(&mut entity.fields));
            entity.fields = fields;
        }

        entity.is_new = false;
        entity.is_dirty = false;
        entity.is_loaded = true;
        self.pending.remove(&entity.id);
        self.insert(entity);
    }

    /// Inserts references to entities known to exist remotely but not yet loaded.
    pub fn add_references(&mut self, references: impl IntoIterator<Item = Entity>) {
        for mut entity in references {
            entity.is_loaded = false;
            self.insert(entity);
        }
    }

    fn insert(&mut self, entity: Entity) {
        let id = entity.id.clone();
        if self.entities.insert(id.clone(), entity).is_none() {
            self.order.push(id);
        }
    }

    /// Removes an entity. Returns the removed record.
    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        self.pending.remove(id);
        let removed = self.entities.remove(id);
        if removed.is_some() {
            self.order.retain(|i| i != id);
        }
        removed
    }

    /// Removes an entity together with the given descendants.
    pub fn remove_existing(&mut self, id: &EntityId, children: &[EntityId]) {
        self.remove(id);
        for child in children {
            self.remove(child);
        }
    }

    /// Replaces a loaded record with the server's copy after a save.
    ///
    /// The server may hand back a different `_id` for new entities; the
    /// record is re-keyed in place so iteration order is kept.
    pub fn replace_saved(&mut self, local_id: &EntityId, saved: Entity) {
        self.pending.remove(local_id);
        let new_id = saved.id.clone();

        if &new_id != local_id && self.entities.remove(local_id).is_some() {
            if let Some(slot) = self.order.iter_mut().find(|i| *i == local_id) {
                *slot = new_id.clone();
            }
            self.entities.insert(new_id.clone(), saved);
        } else {
            self.add_existing(saved);
            return;
        }

        if let Some(entity) = self.entities.get_mut(&new_id) {
            entity.is_new = false;
            entity.is_dirty = false;
            entity.is_loaded = true;
        }
    }

    /// Drops local edits, keeping only the reference attributes.
    ///
    /// New entities have nothing to fall back on and are removed.
    pub fn unload(&mut self, id: &EntityId, reference_attributes: &[String]) {
        self.pending.remove(id);

        let is_new = match self.entities.get(id) {
            Some(entity) => entity.is_new,
            None => return,
        };

        if is_new {
            self.remove(id);
            return;
        }

        let Some(entity) = self.entities.get_mut(id) else {
            return;
        };

        let fields: Map<_, _> = entity
            .fields
            .iter()
            .filter(|(k, _)| reference_attributes.iter().any(|a| a == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        entity.fields = fields;
        entity.is_dirty = false;
        entity.is_loaded = false;
    }

    /// Applies a patch immediately and marks the entity dirty.
    pub fn update(&mut self, patch: &EntityPatch) -> StudioResult<()> {
        let entity = self
            .entities
            .get_mut(&patch.id)
            .ok_or_else(|| StudioError::NotFound(patch.id.to_string()))?;

        patch.apply(entity);
        entity.is_dirty = true;
        Ok(())
    }

    /// Buffers a patch until the next flush.
    pub fn grouped_update(&mut self, patch: EntityPatch) {
        match self.pending.get_mut(&patch.id) {
            Some(existing) => existing.merge(patch),
            None => {
                self.pending.insert(patch.id.clone(), patch);
            }
        }
    }

    /// Applies every buffered patch.
    pub fn flush_updates(&mut self) {
        let pending: Vec<EntityPatch> = self.pending.drain().map(|(_, p)| p).collect();
        for patch in pending {
            if let Err(e) = self.update(&patch) {
                tracing::warn!("Dropping buffered update: {}", e);
            }
        }
    }

    /// Returns true if patches are waiting for a flush.
    pub fn has_pending_updates(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns an entity by local id.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Returns an entity by local id or a `NotFound` error.
    pub fn require(&self, id: &EntityId) -> StudioResult<&Entity> {
        self.get(id)
            .ok_or_else(|| StudioError::NotFound(id.to_string()))
    }

    /// Finds an entity by its short id.
    pub fn get_by_shortid(&self, shortid: &ShortId) -> Option<&Entity> {
        self.iter().find(|e| e.shortid.as_ref() == Some(shortid))
    }

    /// Returns true if the store holds the entity.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterates entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Returns the direct children of a folder (`None` = root).
    pub fn children_of<'a>(
        &'a self,
        folder: Option<&'a ShortId>,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        self.iter().filter(move |e| e.folder_shortid() == folder)
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
