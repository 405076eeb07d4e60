//! Entity persistence behind the HTTP layer.
//!
//! ## Learning: Trait Objects for Storage
//!
//! Handlers only see `dyn Repository`, so a database-backed store can
//! replace [`MemoryRepository`] without touching the routes. The trait is
//! synchronous; callers hold the async lock around each call.

use std::collections::{HashMap, HashSet};

use studio_core::{
    Entity, EntityId, ErrorBody, FolderRef, HierarchyMoveRequest, ShortId, StudioConfig,
    DUPLICATED_ENTITY,
};

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors raised by a repository
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicatedEntity(String),

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("{0}")]
    InvalidName(String),
}

impl RepositoryError {
    /// Machine-readable error code, if the client needs to branch on it.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            RepositoryError::DuplicatedEntity(_) => Some(DUPLICATED_ENTITY),
            _ => None,
        }
    }

    /// Wire form of the error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            message: self.to_string(),
            code: self.code().map(str::to_string),
        }
    }
}

/// Storage for studio entities.
pub trait Repository: Send + Sync {
    /// Finds an entity by set and id.
    fn find(&self, entity_set: &str, id: &EntityId) -> Option<&Entity>;

    /// Finds an entity of any set by its short id.
    fn find_by_shortid(&self, shortid: &ShortId) -> Option<&Entity>;

    /// Lists every entity of a set.
    fn list(&self, entity_set: &str) -> Vec<Entity>;

    /// Stores a new entity. The repository assigns the id.
    fn insert(&mut self, entity_set: &str, entity: Entity) -> RepositoryResult<Entity>;

    /// Overwrites the given fields of an existing entity.
    fn update(&mut self, entity_set: &str, id: &EntityId, changes: Entity)
        -> RepositoryResult<Entity>;

    /// Deletes an entity. Folders take their contents with them.
    fn remove(&mut self, entity_set: &str, id: &EntityId) -> RepositoryResult<()>;

    /// Moves or copies an entity into another folder.
    ///
    /// Returns every record that was created or changed.
    fn hierarchy_move(&mut self, request: &HierarchyMoveRequest) -> RepositoryResult<Vec<Entity>>;

    /// Checks a name against the naming rules.
    fn validate_entity_name(&self, name: &str) -> RepositoryResult<()> {
        validate_entity_name(name)
    }
}

/// Naming rules shared by all entity sets.
pub fn validate_entity_name(name: &str) -> RepositoryResult<()> {
    if name.trim().is_empty() {
        return Err(RepositoryError::InvalidName(
            "Entity name can not be empty".to_string(),
        ));
    }

    if name.contains('/') {
        return Err(RepositoryError::InvalidName(
            "Entity name can not contain characters \"/\"".to_string(),
        ));
    }

    Ok(())
}

/// Keeps every entity in memory, in insertion order.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    entities: Vec<Entity>,

    /// Entity set -> attribute holding the name
    name_attributes: HashMap<String, String>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(&StudioConfig::default())
    }
}

impl MemoryRepository {
    /// Creates an empty repository using the configured name attributes.
    pub fn new(config: &StudioConfig) -> Self {
        let name_attributes = config
            .entity_sets
            .iter()
            .map(|(set, cfg)| (set.clone(), cfg.name_attribute.clone()))
            .collect();

        Self {
            entities: Vec::new(),
            name_attributes,
        }
    }

    /// Creates a repository holding the given records as-is.
    pub fn with_entities(config: &StudioConfig, entities: Vec<Entity>) -> Self {
        let mut repository = Self::new(config);
        repository.entities = entities
            .into_iter()
            .map(|mut e| {
                e.is_new = false;
                e.is_dirty = false;
                e.is_loaded = true;
                e
            })
            .collect();
        repository
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn name_of<'a>(&self, entity: &'a Entity) -> Option<&'a str> {
        let attribute = self
            .name_attributes
            .get(&entity.entity_set)
            .map(String::as_str)
            .unwrap_or("name");
        entity.str_field(attribute)
    }

    fn position(&self, entity_set: &str, id: &EntityId) -> RepositoryResult<usize> {
        self.entities
            .iter()
            .position(|e| e.entity_set == entity_set && &e.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {}", entity_set, id)))
    }

    fn by_shortid(&self, shortid: &ShortId) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.shortid.as_ref() == Some(shortid))
    }

    /// Finds a sibling under `parent` carrying `name`.
    fn sibling_named(&self, parent: Option<&ShortId>, name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.folder_shortid() == parent && self.name_of(e) == Some(name))
    }

    /// Ids of everything nested under a folder, depth first.
    fn descendants(&self, folder: &ShortId) -> Vec<EntityId> {
        let mut visited = HashSet::from([folder.clone()]);
        let mut result = Vec::new();
        self.collect_descendants(folder, &mut visited, &mut result);
        result
    }

    fn collect_descendants(
        &self,
        folder: &ShortId,
        visited: &mut HashSet<ShortId>,
        result: &mut Vec<EntityId>,
    ) {
        for child in self.entities.iter().filter(|e| e.folder_shortid() == Some(folder)) {
            if result.contains(&child.id) {
                continue;
            }
            result.push(child.id.clone());
            if let (true, Some(shortid)) = (child.is_folder(), &child.shortid) {
                // seeded data may contain folder cycles
                if visited.insert(shortid.clone()) {
                    self.collect_descendants(shortid, visited, result);
                }
            }
        }
    }

    /// Returns true if `candidate` is `folder` or lies somewhere beneath it.
    fn is_within(&self, candidate: &ShortId, folder: &ShortId) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(candidate);
        while let Some(shortid) = current {
            if shortid == folder {
                return true;
            }
            if !visited.insert(shortid) {
                return false;
            }
            current = self.by_shortid(shortid).and_then(Entity::folder_shortid);
        }
        false
    }

    fn remove_with_descendants(&mut self, id: &EntityId) {
        let nested = self
            .entities
            .iter()
            .find(|e| &e.id == id)
            .filter(|e| e.is_folder())
            .and_then(|e| e.shortid.as_ref())
            .map(|shortid| self.descendants(shortid))
            .unwrap_or_default();

        self.entities
            .retain(|e| &e.id != id && !nested.contains(&e.id));
    }

    /// Returns true if `source` sits somewhere inside the folder `id`.
    fn contains_source(&self, id: &EntityId, source: &Entity) -> bool {
        let folder = self
            .entities
            .iter()
            .find(|e| &e.id == id)
            .filter(|e| e.is_folder())
            .and_then(|e| e.shortid.as_ref());

        match (folder, source.folder_shortid()) {
            (Some(folder), Some(parent)) => self.is_within(parent, folder),
            _ => false,
        }
    }

    fn check_name(
        &self,
        entity: &Entity,
        parent: Option<&ShortId>,
        except: Option<&EntityId>,
    ) -> RepositoryResult<()> {
        let Some(name) = self.name_of(entity) else {
            return Ok(());
        };
        validate_entity_name(name)?;

        match self.sibling_named(parent, name) {
            Some(existing) if Some(&existing.id) != except => Err(duplicated(name)),
            _ => Ok(()),
        }
    }

    /// Clones an entity (and a folder's contents) under `parent`.
    fn deep_copy(&mut self, id: &EntityId, parent: Option<ShortId>) -> Vec<Entity> {
        let mut copied = HashSet::new();
        self.copy_into(id, parent, &mut copied)
    }

    fn copy_into(
        &mut self,
        id: &EntityId,
        parent: Option<ShortId>,
        copied: &mut HashSet<EntityId>,
    ) -> Vec<Entity> {
        if !copied.insert(id.clone()) {
            return Vec::new();
        }
        let Some(original) = self.entities.iter().find(|e| &e.id == id).cloned() else {
            return Vec::new();
        };

        let mut copy = original.clone();
        copy.id = EntityId::new();
        copy.shortid = Some(ShortId::generate());
        copy.folder = parent.map(FolderRef::new);
        self.entities.push(copy.clone());

        let mut created = vec![copy.clone()];
        if let (true, Some(old), Some(new)) = (original.is_folder(), &original.shortid, &copy.shortid) {
            let children: Vec<EntityId> = self
                .entities
                .iter()
                .filter(|e| e.folder_shortid() == Some(old) && e.id != copy.id)
                .map(|e| e.id.clone())
                .collect();
            for child in children {
                created.extend(self.copy_into(&child, Some(new.clone()), copied));
            }
        }
        created
    }
}

fn duplicated(name: &str) -> RepositoryError {
    RepositoryError::DuplicatedEntity(format!(
        "Entity with name \"{}\" already exists in the target folder",
        name
    ))
}

impl Repository for MemoryRepository {
    fn find(&self, entity_set: &str, id: &EntityId) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.entity_set == entity_set && &e.id == id)
    }

    fn find_by_shortid(&self, shortid: &ShortId) -> Option<&Entity> {
        self.by_shortid(shortid)
    }

    fn list(&self, entity_set: &str) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.entity_set == entity_set)
            .cloned()
            .collect()
    }

    fn insert(&mut self, entity_set: &str, mut entity: Entity) -> RepositoryResult<Entity> {
        self.check_name(&entity, entity.folder_shortid(), None)?;

        entity.id = EntityId::new();
        entity.entity_set = entity_set.to_string();
        if entity.shortid.is_none() {
            entity.shortid = Some(ShortId::generate());
        }
        entity.is_new = false;
        entity.is_dirty = false;
        entity.is_loaded = true;

        tracing::debug!("Inserted {} {}", entity_set, entity.id);
        self.entities.push(entity.clone());
        Ok(entity)
    }

    fn update(
        &mut self,
        entity_set: &str,
        id: &EntityId,
        changes: Entity,
    ) -> RepositoryResult<Entity> {
        let index = self.position(entity_set, id)?;

        let mut updated = self.entities[index].clone();
        updated.folder = changes.folder;
        if changes.shortid.is_some() {
            updated.shortid = changes.shortid;
        }
        updated.fields.extend(changes.fields);

        self.check_name(&updated, updated.folder_shortid(), Some(id))?;

        self.entities[index] = updated.clone();
        Ok(updated)
    }

    fn remove(&mut self, entity_set: &str, id: &EntityId) -> RepositoryResult<()> {
        self.position(entity_set, id)?;
        self.remove_with_descendants(id);
        Ok(())
    }

    fn hierarchy_move(&mut self, request: &HierarchyMoveRequest) -> RepositoryResult<Vec<Entity>> {
        let source = self
            .find(&request.source.entity_set, &request.source.id)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "{} {}",
                    request.source.entity_set, request.source.id
                ))
            })?;
        let target = request.target.shortid.clone();

        if let Some(shortid) = &target {
            if !self.by_shortid(shortid).is_some_and(Entity::is_folder) {
                return Err(RepositoryError::NotFound(format!("folder {}", shortid)));
            }
            if let (true, Some(own)) = (source.is_folder(), &source.shortid) {
                if self.is_within(shortid, own) {
                    return Err(RepositoryError::InvalidMove(
                        "a folder can't be moved into itself".to_string(),
                    ));
                }
            }
        }

        if let Some(name) = self.name_of(&source) {
            let collision = self
                .sibling_named(target.as_ref(), name)
                .filter(|e| request.copy || e.id != source.id)
                .map(|e| e.id.clone());

            if let Some(existing) = collision {
                if !request.replace {
                    return Err(duplicated(name));
                }
                if existing == source.id {
                    return Err(RepositoryError::InvalidMove(
                        "an entity can't replace itself".to_string(),
                    ));
                }
                if self.contains_source(&existing, &source) {
                    return Err(RepositoryError::InvalidMove(
                        "an entity can't replace a folder it lives in".to_string(),
                    ));
                }
                tracing::debug!("Replacing {} in the target folder", existing);
                self.remove_with_descendants(&existing);
            }
        }

        if request.copy {
            return Ok(self.deep_copy(&source.id, target));
        }

        let index = self.position(&source.entity_set, &source.id)?;
        self.entities[index].folder = target.map(FolderRef::new);
        Ok(vec![self.entities[index].clone()])
    }
}
