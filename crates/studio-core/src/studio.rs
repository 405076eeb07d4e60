//! The effect executor.
//!
//! ## Learning: The Facade Pattern
//!
//! `Studio` is the one thing the UI talks to. It owns the state, performs
//! I/O through the collaborator traits and funnels every change through
//! [`reduce`], broadcasting each action as it goes.
//!
//! ## Concurrency
//!
//! Operations take `&mut self`, so two of them can never interleave on the
//! same studio. Concurrent I/O inside one operation (`save_all`, preview
//! listeners) only borrows the collaborators and applies results afterwards.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::action::{reduce, Action, StudioState};
use crate::api::{
    ApiClient, ApiError, HierarchyMoveRequest, MoveSource, MoveTarget, PreviewDispatcher,
    PreviewListener, RunRequest,
};
use crate::config::StudioConfig;
use crate::entity::{Entity, EntityId, EntityPatch, ShortId, TEMPLATES};
use crate::event::EventBus;
use crate::format::{EditorKind, FormatError, FormatterRegistry};
use crate::tabs::{Tab, TabKind, TabSpec};
use crate::{StudioError, StudioResult};

/// Default preview target.
pub const PREVIEW_FRAME: &str = "previewFrame";

/// A user-initiated hierarchy move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub source: MoveSource,

    /// Destination folder (`None` = root)
    pub target: Option<ShortId>,

    /// Child ids currently shown under the target, if the tree knows them
    pub target_children: Option<Vec<EntityId>>,

    pub copy: bool,
    pub replace: bool,

    /// Report a name collision as [`MoveOutcome::Duplicated`] instead of failing
    pub retry: bool,
}

impl MoveRequest {
    pub fn new(source: MoveSource, target: Option<ShortId>) -> Self {
        Self {
            source,
            target,
            target_children: None,
            copy: false,
            replace: false,
            retry: true,
        }
    }
}

/// Result of a hierarchy move.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Source had local changes; only the local record moved
    Local,
    /// Server moved the entity; these records were merged into the store
    Moved(Vec<Entity>),
    /// Target already has an entity with that name
    Duplicated,
}

/// Outcome of `save_all`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
    pub saved: Vec<EntityId>,
    pub failed: Vec<(EntityId, String)>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Studio state plus the effects that drive it.
pub struct Studio {
    state: StudioState,
    config: Arc<StudioConfig>,
    formatters: Arc<FormatterRegistry>,
    api: Arc<dyn ApiClient>,
    preview: Arc<dyn PreviewDispatcher>,
    listeners: Vec<Arc<dyn PreviewListener>>,
    events: EventBus,
}

impl Studio {
    /// Creates a studio with the built-in formatters.
    pub fn new(
        config: Arc<StudioConfig>,
        api: Arc<dyn ApiClient>,
        preview: Arc<dyn PreviewDispatcher>,
    ) -> Self {
        let formatters = Arc::new(FormatterRegistry::from_config(&config));
        Self::with_formatters(config, formatters, api, preview)
    }

    /// Creates a studio with a custom formatter table.
    pub fn with_formatters(
        config: Arc<StudioConfig>,
        formatters: Arc<FormatterRegistry>,
        api: Arc<dyn ApiClient>,
        preview: Arc<dyn PreviewDispatcher>,
    ) -> Self {
        let location = config.editor.resolve_url("/");
        Self {
            state: StudioState::new(location),
            config,
            formatters,
            api,
            preview,
            listeners: Vec::new(),
            events: EventBus::new(),
        }
    }

    /// Registers a hook that runs before every preview.
    pub fn add_preview_listener(&mut self, listener: Arc<dyn PreviewListener>) {
        self.listeners.push(listener);
    }

    /// Returns the current state.
    pub fn state(&self) -> &StudioState {
        &self.state
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.events.subscribe()
    }

    /// Seeds the store with records listed by the server (e.g. the tree).
    pub fn add_references(&mut self, references: impl IntoIterator<Item = Entity>) {
        self.state.entities.add_references(references);
    }

    /// Applies an action and broadcasts it.
    pub fn dispatch(&mut self, action: Action) {
        tracing::debug!(action = action.name(), "dispatch");
        reduce(&mut self.state, &action, &self.config);
        self.events.emit(action);
    }

    // ==================== Entities ====================

    /// Makes sure an entity is fully loaded.
    pub async fn load(&mut self, id: &EntityId, entity_set: Option<&str>) -> StudioResult<()> {
        let entity_set = match self.state.entities.get(id) {
            Some(entity) if entity.is_loaded || entity.is_new => return Ok(()),
            Some(entity) => entity.entity_set.clone(),
            None => entity_set
                .map(str::to_string)
                .ok_or_else(|| StudioError::NotFound(id.to_string()))?,
        };

        self.dispatch(Action::ApiStart);
        match self.api.load(&entity_set, id).await {
            Ok(mut entity) => {
                if entity.entity_set.is_empty() {
                    entity.entity_set = entity_set;
                }
                self.dispatch(Action::EntityLoaded(entity));
                self.dispatch(Action::ApiDone);
                Ok(())
            }
            Err(e) => {
                self.dispatch(Action::ApiFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Applies a patch right away.
    pub fn update(&mut self, patch: EntityPatch) -> StudioResult<()> {
        self.state.entities.require(&patch.id)?;
        self.dispatch(Action::UpdateEntity(patch));
        Ok(())
    }

    /// Buffers a patch (typing in an editor) until the next flush.
    pub fn grouped_update(&mut self, patch: EntityPatch) -> StudioResult<()> {
        self.state.entities.require(&patch.id)?;
        self.dispatch(Action::GroupedUpdate(patch));
        Ok(())
    }

    /// Applies all buffered patches.
    pub fn flush_updates(&mut self) {
        if self.state.entities.has_pending_updates() {
            self.dispatch(Action::FlushUpdates);
        }
    }

    // ==================== Tabs ====================

    /// Opens a tab for an entity or a custom view.
    ///
    /// On `NotFound` the location has already been reset to the root view.
    pub async fn open_tab(&mut self, spec: TabSpec) -> StudioResult<()> {
        let mut id = spec.id.clone();

        if id.is_none() {
            if let Some(shortid) = &spec.shortid {
                match self.state.entities.get_by_shortid(shortid) {
                    Some(entity) => id = Some(entity.id.clone()),
                    None => {
                        tracing::warn!("No entity with shortid {}", shortid);
                        let root = self.config.editor.resolve_url("/");
                        self.dispatch(Action::Navigate(root));
                        return Err(StudioError::NotFound(shortid.to_string()));
                    }
                }
            }
        }

        let kind = match id {
            Some(id) => {
                self.load(&id, spec.entity_set.as_deref()).await?;
                let entity_set = self.state.entities.require(&id)?.entity_set.clone();
                TabKind::Entity { id, entity_set }
            }
            None => TabKind::Custom,
        };

        let key = match (&spec.key, &kind) {
            (Some(key), _) => key.clone(),
            (None, TabKind::Entity { id, .. }) => id.to_string(),
            (None, TabKind::Custom) => {
                return Err(StudioError::InvalidOperation(
                    "custom tab needs a key".to_string(),
                ));
            }
        };

        let tab = Tab {
            key: key.clone(),
            kind,
            editor_component_key: spec.editor_component_key,
            title: spec.title,
            header_or_footer: spec.header_or_footer,
        };

        tracing::info!("Opening tab {}", key);
        self.dispatch(Action::OpenTab(tab));
        self.activate_tab(&key)
    }

    /// Closes a tab, discarding unsaved edits of its entity.
    pub fn close_tab(&mut self, key: &str) -> StudioResult<()> {
        let tab = self
            .state
            .tabs
            .get(key)
            .cloned()
            .ok_or_else(|| StudioError::TabNotFound(key.to_string()))?;

        self.dispatch(Action::CloseTab(key.to_string()));

        if let Some(id) = tab.entity_id() {
            let discard = self
                .state
                .entities
                .get(id)
                .is_some_and(Entity::has_local_changes);
            let still_open = self.state.tabs.iter().any(|t| t.entity_id() == Some(id));

            if discard && !still_open {
                self.dispatch(Action::UnloadEntity(id.clone()));
            }
        }

        self.update_history();
        Ok(())
    }

    /// Makes a tab the active one.
    pub fn activate_tab(&mut self, key: &str) -> StudioResult<()> {
        if self.state.tabs.get(key).is_none() {
            return Err(StudioError::TabNotFound(key.to_string()));
        }

        if self.state.tabs.active_key() != Some(key) {
            self.dispatch(Action::ActivateTab(key.to_string()));
        }
        self.update_history();
        Ok(())
    }

    /// Creates a new entity and opens it.
    ///
    /// With a persisted `template`, the new entity is a clone of it.
    pub async fn open_new_tab(
        &mut self,
        entity_set: &str,
        template: Option<&Entity>,
        name: &str,
    ) -> StudioResult<EntityId> {
        if self.config.entity_set(entity_set).is_none() {
            return Err(StudioError::UnknownEntitySet(entity_set.to_string()));
        }

        let id = EntityId::new();
        let name_attribute = self.config.name_attribute(entity_set).to_string();

        let mut entity = match template {
            Some(source) if self.state.entities.contains(&source.id) && !source.is_new => {
                self.load(&source.id, Some(&source.entity_set)).await?;
                let mut clone = self.state.entities.require(&source.id)?.clone();
                clone.id = id.clone();
                clone
            }
            Some(source) => {
                let mut entity = source.clone();
                entity.id = id.clone();
                self.apply_defaults(entity_set, &mut entity);
                entity
            }
            None => {
                let mut entity = Entity::new(id.clone(), entity_set);
                self.apply_defaults(entity_set, &mut entity);
                entity
            }
        };

        entity.entity_set = entity_set.to_string();
        entity.shortid = Some(ShortId::generate());
        entity
            .fields
            .insert(name_attribute, Value::String(name.to_string()));

        tracing::info!("New {} entity {}", entity_set, id);
        self.dispatch(Action::AddEntity(entity));
        self.dispatch(Action::OpenNewTab(Tab::entity(id.clone(), entity_set)));
        self.update_history();
        Ok(id)
    }

    fn apply_defaults(&self, entity_set: &str, entity: &mut Entity) {
        if entity_set != TEMPLATES {
            return;
        }

        entity.fields.insert(
            "recipe".to_string(),
            Value::String(self.config.default_recipe().to_string()),
        );
        if let Some(engine) = self.config.default_engine() {
            entity
                .fields
                .insert("engine".to_string(), Value::String(engine.to_string()));
        }
    }

    /// Syncs the location with the active entity.
    pub fn update_history(&mut self) {
        let path = match self.state.active_entity() {
            Some(entity) => match &entity.shortid {
                Some(shortid) => self
                    .config
                    .editor
                    .resolve_url(&format!("/studio/{}/{}", entity.entity_set, shortid)),
                None => self.config.editor.resolve_url("/"),
            },
            None => self.config.editor.resolve_url("/"),
        };

        if path != self.state.location {
            self.dispatch(Action::Navigate(path));
        }
    }

    // ==================== Save ====================

    /// Persists the active tab's entity.
    pub async fn save(&mut self) -> StudioResult<()> {
        let id = self
            .state
            .tabs
            .active()
            .and_then(Tab::entity_id)
            .cloned()
            .ok_or(StudioError::NoActiveTab)?;

        self.flush_updates();
        let entity = self.state.entities.require(&id)?.clone();

        self.dispatch(Action::SaveStarted);
        match self.api.save(&entity).await {
            Ok(saved) => {
                self.dispatch(Action::EntitySaved {
                    local_id: id,
                    entity: saved,
                });
                self.dispatch(Action::SaveSuccess);
                self.update_history();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Saving {} failed: {}", id, e);
                self.dispatch(Action::SaveFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Persists every open entity tab concurrently.
    ///
    /// Failures don't roll back the saves that already went through.
    pub async fn save_all(&mut self) -> SaveReport {
        self.dispatch(Action::SaveStarted);
        self.flush_updates();

        let entities: Vec<Entity> = self
            .state
            .tabs
            .iter()
            .filter(|t| t.is_entity() && t.header_or_footer.is_none())
            .filter_map(Tab::entity_id)
            .filter_map(|id| self.state.entities.get(id))
            .cloned()
            .collect();

        let api = Arc::clone(&self.api);
        let results = join_all(entities.iter().map(|e| api.save(e))).await;

        let mut report = SaveReport::default();
        for (entity, result) in entities.into_iter().zip(results) {
            match result {
                Ok(saved) => {
                    report.saved.push(saved.id.clone());
                    self.dispatch(Action::EntitySaved {
                        local_id: entity.id,
                        entity: saved,
                    });
                }
                Err(e) => {
                    tracing::error!("Saving {} failed: {}", entity.id, e);
                    report.failed.push((entity.id, e.to_string()));
                }
            }
        }

        match report.failed.first() {
            None => self.dispatch(Action::SaveSuccess),
            Some((_, message)) => self.dispatch(Action::SaveFailed(message.clone())),
        }
        self.update_history();
        report
    }

    /// Deletes the active tab's entity on the server and locally.
    pub async fn remove(&mut self) -> StudioResult<()> {
        let tab = self.state.tabs.active().cloned().ok_or(StudioError::NoActiveTab)?;
        let (id, entity_set) = match tab.kind {
            TabKind::Entity { id, entity_set } => (id, entity_set),
            TabKind::Custom => return Err(StudioError::NoActiveTab),
        };

        let is_new = self.state.entities.require(&id)?.is_new;
        if !is_new {
            self.dispatch(Action::ApiStart);
            if let Err(e) = self.api.remove(&entity_set, &id).await {
                self.dispatch(Action::ApiFailed(e.to_string()));
                return Err(e.into());
            }
            self.dispatch(Action::ApiDone);
        }

        self.dispatch(Action::RemoveEntity(id));
        self.update_history();
        Ok(())
    }

    /// Checks a name with the server.
    pub async fn validate_entity_name(&self, name: &str) -> StudioResult<()> {
        Ok(self.api.validate_entity_name(name).await?)
    }

    // ==================== Hierarchy ====================

    /// Moves (or copies) an entity into another folder.
    pub async fn hierarchy_move(&mut self, request: MoveRequest) -> StudioResult<MoveOutcome> {
        let source = self.state.entities.require(&request.source.id)?;
        // the stored id keeps the form the server handed out
        let source_id = source.id.clone();

        if source.has_local_changes() {
            self.flush_updates();
            let patch = EntityPatch::new(request.source.id.clone()).with_folder(request.target.clone());
            self.dispatch(Action::UpdateEntity(patch));
            return Ok(MoveOutcome::Local);
        }

        let body = HierarchyMoveRequest {
            source: MoveSource {
                entity_set: request.source.entity_set.clone(),
                id: source_id,
            },
            target: MoveTarget {
                shortid: request.target.clone(),
            },
            copy: request.copy,
            replace: request.replace,
        };

        self.dispatch(Action::ApiStart);

        let items = match self.api.hierarchy_move(&body).await {
            Ok(items) => items,
            Err(ApiError::DuplicatedEntity(message)) if request.retry => {
                tracing::info!("Move collided with an existing entity: {}", message);
                self.dispatch(Action::ApiDone);
                return Ok(MoveOutcome::Duplicated);
            }
            Err(e) => {
                tracing::error!("Hierarchy move failed: {}", e);
                self.dispatch(Action::ApiFailed(e.to_string()));
                return Err(e.into());
            }
        };

        if request.replace {
            if let Some(children) = &request.target_children {
                self.drop_replaced_child(&request, children);
            }
        }

        for item in &items {
            self.dispatch(Action::AddExisting(item.clone()));
        }
        self.dispatch(Action::ApiDone);

        Ok(MoveOutcome::Moved(items))
    }

    /// Removes the target child a replacing move overwrote.
    ///
    /// The first child in `children` order with the source's name wins.
    fn drop_replaced_child(&mut self, request: &MoveRequest, children: &[EntityId]) {
        let entities = &self.state.entities;

        let Some(source) = entities.get(&request.source.id) else {
            return;
        };
        let source_name = source.str_field(self.config.name_attribute(&source.entity_set));

        let target = request.target.as_ref();
        let mut replaced: Option<EntityId> = None;
        let mut folders: Vec<&ShortId> = Vec::new();

        for child in children.iter().filter_map(|id| entities.get(id)) {
            let name = child.str_field(self.config.name_attribute(&child.entity_set));

            if replaced.is_none()
                && child.folder_shortid() == target
                && name == source_name
            {
                replaced = Some(child.id.clone());
            }

            if child.is_folder() {
                if let Some(shortid) = &child.shortid {
                    folders.push(shortid);
                }
            }
        }

        let nested: Vec<EntityId> = children
            .iter()
            .filter_map(|id| entities.get(id))
            .filter(|e| e.folder_shortid().is_some_and(|f| folders.contains(&f)))
            .map(|e| e.id.clone())
            .collect();

        if let Some(id) = replaced {
            tracing::debug!("Replacing {} and {} nested entities", id, nested.len());
            self.dispatch(Action::RemoveExisting {
                id,
                children: nested,
            });
        }
    }

    // ==================== Editor ====================

    /// Reformats the active entity with its editor's formatter.
    ///
    /// Failures are logged, never returned.
    pub fn reformat(&mut self) {
        if let Err(e) = self.try_reformat() {
            tracing::error!("Reformat failed: {}", e);
        }
    }

    fn try_reformat(&mut self) -> StudioResult<()> {
        self.flush_updates();

        let tab = self.state.tabs.active().ok_or(StudioError::NoActiveTab)?;
        let entity = self.state.active_entity().ok_or(StudioError::NoActiveTab)?;
        let key = tab.editor_key().ok_or(StudioError::NoActiveTab)?;
        let kind = EditorKind::from_key(key);

        let formatter = self
            .formatters
            .get(&kind)
            .ok_or_else(|| FormatError::NoFormatter(kind.clone()))?;
        let fields = formatter.reformat(entity, tab)?;

        let mut patch = EntityPatch::new(entity.id.clone());
        patch.fields = fields;
        self.update(patch)
    }

    /// Renders the last active template into a preview target.
    pub async fn run(&mut self, target: Option<&str>) -> StudioResult<()> {
        let target = target.unwrap_or(PREVIEW_FRAME).to_string();
        self.flush_updates();

        let id = self
            .state
            .tabs
            .last_active_template()
            .ok_or(StudioError::NoActiveTemplate)?;
        let template = self.state.entities.require(id)?;

        let mut request = RunRequest {
            template: template.to_wire(),
            options: Default::default(),
        };

        let snapshot = self.state.entities.clone();
        let listeners = self.listeners.clone();
        let patches = join_all(
            listeners
                .iter()
                .map(|l| l.before_run(&request, &snapshot, &target)),
        )
        .await;

        for patch in patches {
            patch?.apply(&mut request);
        }

        self.dispatch(Action::Run);
        self.preview.preview(request, &target).await
    }

    // ==================== Layout ====================

    pub fn activate_undock_mode(&mut self) {
        self.dispatch(Action::ActivateUndockMode);
    }

    pub fn deactivate_undock_mode(&mut self) {
        self.dispatch(Action::DeactivateUndockMode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResult, RunPatch};
    use crate::entity::FOLDERS;
    use crate::store::EntityStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        remote: Mutex<HashMap<EntityId, Entity>>,
        failing_saves: Mutex<HashSet<EntityId>>,
        moves: Mutex<Vec<HierarchyMoveRequest>>,
        move_result: Mutex<Option<ApiResult<Vec<Entity>>>>,
        loads: AtomicUsize,
        saves: AtomicUsize,
        removes: AtomicUsize,
    }

    #[async_trait]
    impl ApiClient for FakeApi {
        async fn load(&self, _entity_set: &str, id: &EntityId) -> ApiResult<Entity> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.remote
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| ApiError::Server {
                    status: 404,
                    message: "not found".to_string(),
                })
        }

        async fn save(&self, entity: &Entity) -> ApiResult<Entity> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;

            if self.failing_saves.lock().unwrap().contains(&entity.id) {
                return Err(ApiError::Server {
                    status: 500,
                    message: "disk full".to_string(),
                });
            }

            let saved: Entity = serde_json::from_value(entity.to_wire()).unwrap();
            self.remote
                .lock()
                .unwrap()
                .insert(saved.id.clone(), saved.clone());
            Ok(saved)
        }

        async fn remove(&self, _entity_set: &str, id: &EntityId) -> ApiResult<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.remote.lock().unwrap().remove(id);
            Ok(())
        }

        async fn hierarchy_move(&self, request: &HierarchyMoveRequest) -> ApiResult<Vec<Entity>> {
            self.moves.lock().unwrap().push(request.clone());
            self.move_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn validate_entity_name(&self, name: &str) -> ApiResult<()> {
            if name.contains('/') {
                return Err(ApiError::Server {
                    status: 400,
                    message: "invalid".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePreview {
        runs: Mutex<Vec<(RunRequest, String)>>,
    }

    #[async_trait]
    impl PreviewDispatcher for FakePreview {
        async fn preview(&self, request: RunRequest, target: &str) -> StudioResult<()> {
            self.runs.lock().unwrap().push((request, target.to_string()));
            Ok(())
        }
    }

    struct OptionListener(&'static str);

    #[async_trait]
    impl PreviewListener for OptionListener {
        async fn before_run(
            &self,
            _request: &RunRequest,
            entities: &EntityStore,
            target: &str,
        ) -> StudioResult<RunPatch> {
            let mut patch = RunPatch::default();
            patch.options.insert(self.0.to_string(), json!(target));
            patch
                .options
                .insert("entities".to_string(), json!(entities.len()));
            Ok(patch)
        }
    }

    fn studio_with(config: StudioConfig) -> (Studio, Arc<FakeApi>, Arc<FakePreview>) {
        let api = Arc::new(FakeApi::default());
        let preview = Arc::new(FakePreview::default());
        let api_dyn: Arc<dyn ApiClient> = api.clone();
        let preview_dyn: Arc<dyn PreviewDispatcher> = preview.clone();
        let studio = Studio::new(Arc::new(config), api_dyn, preview_dyn);
        (studio, api, preview)
    }

    fn studio() -> (Studio, Arc<FakeApi>, Arc<FakePreview>) {
        studio_with(StudioConfig::default())
    }

    fn template(id: &str, shortid: &str, name: &str) -> Entity {
        Entity::new(EntityId::from(id), TEMPLATES)
            .with_shortid(shortid)
            .with_field("name", name)
            .with_field("content", "<p>hi</p>")
    }

    fn folder(id: &str, shortid: &str, name: &str) -> Entity {
        Entity::new(EntityId::from(id), FOLDERS)
            .with_shortid(shortid)
            .with_field("name", name)
    }

    fn source(id: &str) -> MoveSource {
        MoveSource {
            entity_set: TEMPLATES.to_string(),
            id: EntityId::from(id),
        }
    }

    #[tokio::test]
    async fn test_open_new_template_defaults() {
        let (mut studio, _, _) = studio();

        let id = studio.open_new_tab(TEMPLATES, None, "Report1").await.unwrap();

        let tab = studio.state().tabs.active().unwrap();
        assert!(tab.is_entity());
        assert_eq!(tab.entity_id(), Some(&id));

        let entity = studio.state().entities.get(&id).unwrap();
        assert!(entity.is_new);
        assert!(entity.shortid.is_some());
        assert_eq!(entity.str_field("name"), Some("Report1"));
        assert_eq!(entity.str_field("recipe"), Some("chrome-pdf"));
        assert_eq!(entity.str_field("engine"), Some("handlebars"));
    }

    #[tokio::test]
    async fn test_open_new_template_without_chrome() {
        let config = StudioConfig {
            recipes: vec!["html".to_string(), "xlsx".to_string()],
            ..StudioConfig::default()
        };
        let (mut studio, _, _) = studio_with(config);

        let id = studio.open_new_tab(TEMPLATES, None, "Report1").await.unwrap();
        let entity = studio.state().entities.get(&id).unwrap();
        assert_eq!(entity.str_field("recipe"), Some("html"));
    }

    #[tokio::test]
    async fn test_open_new_clones_persisted_entity() {
        let (mut studio, api, _) = studio();
        let original = template("1", "abc", "invoice").with_field("recipe", "xlsx");
        api.remote
            .lock()
            .unwrap()
            .insert(original.id.clone(), original.clone());
        studio.add_references([template("1", "abc", "invoice")]);

        let id = studio
            .open_new_tab(TEMPLATES, Some(&original), "invoice-copy")
            .await
            .unwrap();

        assert_eq!(api.loads.load(Ordering::SeqCst), 1);
        let clone = studio.state().entities.get(&id).unwrap();
        assert_ne!(clone.id, original.id);
        assert_ne!(clone.shortid, original.shortid);
        assert_eq!(clone.str_field("recipe"), Some("xlsx"));
        assert_eq!(clone.str_field("name"), Some("invoice-copy"));
    }

    #[tokio::test]
    async fn test_open_new_unknown_set() {
        let (mut studio, _, _) = studio();
        let result = studio.open_new_tab("scripts", None, "a").await;
        assert!(matches!(result, Err(StudioError::UnknownEntitySet(_))));
    }

    #[tokio::test]
    async fn test_open_by_unknown_shortid_navigates_home() {
        let (mut studio, _, _) = studio();
        studio.dispatch(Action::Navigate("/studio/templates/zzz".to_string()));

        let result = studio
            .open_tab(TabSpec::for_shortid(ShortId::from("zzz")))
            .await;

        assert!(matches!(result, Err(StudioError::NotFound(_))));
        assert!(studio.state().tabs.is_empty());
        assert_eq!(studio.state().location, "/");
    }

    #[tokio::test]
    async fn test_open_by_shortid_loads_entity() {
        let (mut studio, api, _) = studio();
        api.remote
            .lock()
            .unwrap()
            .insert(EntityId::from("1"), template("1", "abc", "invoice"));
        studio.add_references([Entity::new(EntityId::from("1"), TEMPLATES).with_shortid("abc")]);

        studio
            .open_tab(TabSpec::for_shortid(ShortId::from("abc")))
            .await
            .unwrap();

        assert_eq!(api.loads.load(Ordering::SeqCst), 1);
        let entity = studio.state().active_entity().unwrap();
        assert!(entity.is_loaded);
        assert_eq!(entity.str_field("content"), Some("<p>hi</p>"));
        assert_eq!(studio.state().location, "/studio/templates/abc");

        // already loaded: no second fetch
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();
        assert_eq!(api.loads.load(Ordering::SeqCst), 1);
        assert_eq!(studio.state().tabs.len(), 1);
    }

    #[tokio::test]
    async fn test_open_custom_tab() {
        let (mut studio, _, _) = studio();
        studio
            .open_tab(TabSpec::custom("StartupPage", "startup"))
            .await
            .unwrap();

        let tab = studio.state().tabs.active().unwrap();
        assert_eq!(tab.kind, TabKind::Custom);
        assert_eq!(tab.editor_key(), Some("startup"));
    }

    #[tokio::test]
    async fn test_close_new_entity_removes_it() {
        let (mut studio, _, _) = studio();
        let id = studio.open_new_tab(TEMPLATES, None, "draft").await.unwrap();

        studio.close_tab(id.as_str()).unwrap();

        assert!(studio.state().tabs.is_empty());
        assert!(!studio.state().entities.contains(&id));
    }

    #[tokio::test]
    async fn test_close_clean_entity_keeps_it() {
        let (mut studio, _, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();

        studio.close_tab("1").unwrap();

        let entity = studio.state().entities.get(&EntityId::from("1")).unwrap();
        assert!(entity.is_loaded);
        assert_eq!(entity.str_field("content"), Some("<p>hi</p>"));
    }

    #[tokio::test]
    async fn test_close_dirty_entity_discards_edits() {
        let (mut studio, _, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();
        studio
            .update(EntityPatch::new(EntityId::from("1")).with_field("content", "edited"))
            .unwrap();

        studio.close_tab("1").unwrap();

        let entity = studio.state().entities.get(&EntityId::from("1")).unwrap();
        assert!(!entity.is_dirty);
        assert!(!entity.is_loaded);
        assert_eq!(entity.str_field("content"), None);
        assert_eq!(entity.str_field("name"), Some("invoice"));
    }

    #[tokio::test]
    async fn test_close_unknown_tab() {
        let (mut studio, _, _) = studio();
        assert!(matches!(
            studio.close_tab("nope"),
            Err(StudioError::TabNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_dirty_entity_is_local() {
        let (mut studio, api, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .grouped_update(EntityPatch::new(EntityId::from("1")).with_field("content", "x"))
            .unwrap();
        studio
            .update(EntityPatch::new(EntityId::from("1")).with_field("helpers", "y"))
            .unwrap();

        let outcome = studio
            .hierarchy_move(MoveRequest::new(source("1"), Some(ShortId::from("f1"))))
            .await
            .unwrap();

        assert_eq!(outcome, MoveOutcome::Local);
        assert!(api.moves.lock().unwrap().is_empty());

        let entity = studio.state().entities.get(&EntityId::from("1")).unwrap();
        assert_eq!(entity.folder_shortid(), Some(&ShortId::from("f1")));
        // pending edit flushed first
        assert_eq!(entity.str_field("content"), Some("x"));
    }

    #[tokio::test]
    async fn test_move_new_entity_to_root_is_local() {
        let (mut studio, api, _) = studio();
        let id = studio.open_new_tab(TEMPLATES, None, "draft").await.unwrap();
        studio
            .update(EntityPatch::new(id.clone()).with_folder(Some(ShortId::from("f1"))))
            .unwrap();

        let outcome = studio
            .hierarchy_move(MoveRequest::new(
                MoveSource {
                    entity_set: TEMPLATES.to_string(),
                    id: id.clone(),
                },
                None,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, MoveOutcome::Local);
        assert!(api.moves.lock().unwrap().is_empty());
        assert_eq!(studio.state().entities.get(&id).unwrap().folder, None);
    }

    #[tokio::test]
    async fn test_move_clean_entity_goes_to_server() {
        let (mut studio, api, _) = studio();
        let stored: Entity = serde_json::from_value(json!({
            "_id": 5,
            "__entitySet": "templates",
            "shortid": "abc",
            "name": "invoice"
        }))
        .unwrap();
        studio.dispatch(Action::AddExisting(stored));

        let moved: Entity = serde_json::from_value(json!({
            "_id": 5,
            "shortid": "abc",
            "folder": { "shortid": "f1" }
        }))
        .unwrap();
        *api.move_result.lock().unwrap() = Some(Ok(vec![moved]));

        let outcome = studio
            .hierarchy_move(MoveRequest::new(source("5"), Some(ShortId::from("f1"))))
            .await
            .unwrap();

        let sent = api.moves.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            serde_json::to_value(&sent[0]).unwrap(),
            json!({
                "source": { "entitySet": "templates", "id": 5 },
                "target": { "shortid": "f1" },
                "copy": false,
                "replace": false
            })
        );

        assert!(matches!(outcome, MoveOutcome::Moved(ref items) if items.len() == 1));
        let entity = studio.state().entities.get(&EntityId::from("5")).unwrap();
        assert_eq!(entity.folder_shortid(), Some(&ShortId::from("f1")));
        assert_eq!(entity.entity_set, TEMPLATES);
        assert_eq!(studio.state().pending_api_calls, 0);
    }

    #[tokio::test]
    async fn test_move_duplicated_is_a_signal() {
        let (mut studio, api, _) = studio();
        studio.dispatch(Action::AddExisting(template("5", "abc", "invoice")));
        *api.move_result.lock().unwrap() =
            Some(Err(ApiError::DuplicatedEntity("exists".to_string())));

        let outcome = studio
            .hierarchy_move(MoveRequest::new(source("5"), Some(ShortId::from("f1"))))
            .await
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Duplicated);
        assert_eq!(studio.state().last_api_error, None);

        let mut no_retry = MoveRequest::new(source("5"), Some(ShortId::from("f1")));
        no_retry.retry = false;
        let result = studio.hierarchy_move(no_retry).await;
        assert!(matches!(
            result,
            Err(StudioError::Api(ApiError::DuplicatedEntity(_)))
        ));
        assert!(studio.state().last_api_error.is_some());
    }

    #[tokio::test]
    async fn test_move_other_failure() {
        let (mut studio, api, _) = studio();
        studio.dispatch(Action::AddExisting(template("5", "abc", "invoice")));
        *api.move_result.lock().unwrap() = Some(Err(ApiError::Server {
            status: 400,
            message: "nope".to_string(),
        }));

        let result = studio
            .hierarchy_move(MoveRequest::new(source("5"), None))
            .await;
        assert!(matches!(result, Err(StudioError::Api(_))));
        assert_eq!(studio.state().last_api_error.as_deref(), Some("Server error 400: nope"));
    }

    #[tokio::test]
    async fn test_move_unknown_source_is_rejected() {
        let (mut studio, api, _) = studio();
        let result = studio
            .hierarchy_move(MoveRequest::new(source("404"), None))
            .await;

        assert!(matches!(result, Err(StudioError::NotFound(_))));
        assert!(api.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_replace_drops_collision() {
        let (mut studio, api, _) = studio();
        // target folder "t" holds "invoice" (a folder) with one nested template
        studio.dispatch(Action::AddExisting(folder("t", "tf", "target")));
        studio.dispatch(Action::AddExisting(
            folder("old", "oldf", "invoice").with_folder(Some(ShortId::from("tf"))),
        ));
        studio.dispatch(Action::AddExisting(
            template("nested", "n", "inner").with_folder(Some(ShortId::from("oldf"))),
        ));
        studio.dispatch(Action::AddExisting(
            template("keep", "k", "other").with_folder(Some(ShortId::from("tf"))),
        ));
        studio.dispatch(Action::AddExisting(template("5", "abc", "invoice")));

        let moved = template("5", "abc", "invoice").with_folder(Some(ShortId::from("tf")));
        *api.move_result.lock().unwrap() = Some(Ok(vec![moved]));

        let mut request = MoveRequest::new(source("5"), Some(ShortId::from("tf")));
        request.replace = true;
        request.target_children = Some(vec![
            EntityId::from("old"),
            EntityId::from("nested"),
            EntityId::from("keep"),
        ]);

        studio.hierarchy_move(request).await.unwrap();

        let entities = &studio.state().entities;
        assert!(!entities.contains(&EntityId::from("old")));
        assert!(!entities.contains(&EntityId::from("nested")));
        assert!(entities.contains(&EntityId::from("keep")));
        assert_eq!(
            entities.get(&EntityId::from("5")).unwrap().folder_shortid(),
            Some(&ShortId::from("tf"))
        );
    }

    #[tokio::test]
    async fn test_save_active_tab() {
        let (mut studio, api, _) = studio();
        let id = studio.open_new_tab(TEMPLATES, None, "Report1").await.unwrap();
        studio
            .grouped_update(EntityPatch::new(id.clone()).with_field("content", "<b/>"))
            .unwrap();

        studio.save().await.unwrap();

        assert_eq!(api.saves.load(Ordering::SeqCst), 1);
        let stored = api.remote.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(stored.str_field("content"), Some("<b/>"));

        let entity = studio.state().entities.get(&id).unwrap();
        assert!(!entity.is_new);
        assert!(!entity.is_dirty);
        assert_eq!(studio.state().save_status, crate::SaveStatus::Saved);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_entity_dirty() {
        let (mut studio, api, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();
        studio
            .update(EntityPatch::new(EntityId::from("1")).with_field("content", "x"))
            .unwrap();
        api.failing_saves
            .lock()
            .unwrap()
            .insert(EntityId::from("1"));

        assert!(studio.save().await.is_err());

        assert!(studio.state().entities.get(&EntityId::from("1")).unwrap().is_dirty);
        assert!(matches!(
            studio.state().save_status,
            crate::SaveStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_save_without_active_tab() {
        let (mut studio, _, _) = studio();
        assert!(matches!(studio.save().await, Err(StudioError::NoActiveTab)));
    }

    #[tokio::test]
    async fn test_save_all_saves_every_entity_tab() {
        let (mut studio, api, _) = studio();
        let a = studio.open_new_tab(TEMPLATES, None, "a").await.unwrap();
        let b = studio.open_new_tab(TEMPLATES, None, "b").await.unwrap();
        let c = studio.open_new_tab(FOLDERS, None, "c").await.unwrap();
        studio
            .open_tab(TabSpec::custom("StartupPage", "startup"))
            .await
            .unwrap();
        studio
            .open_tab(TabSpec {
                key: Some(format!("{}header", a)),
                id: Some(a.clone()),
                header_or_footer: Some("header".to_string()),
                ..TabSpec::default()
            })
            .await
            .unwrap();
        api.failing_saves.lock().unwrap().insert(b.clone());

        let report = studio.save_all().await;

        assert_eq!(api.saves.load(Ordering::SeqCst), 3);
        assert_eq!(report.saved.len(), 2);
        assert!(report.saved.contains(&a));
        assert!(report.saved.contains(&c));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, b);
        assert!(!report.is_success());

        assert!(!studio.state().entities.get(&a).unwrap().is_new);
        assert!(studio.state().entities.get(&b).unwrap().is_new);
    }

    #[tokio::test]
    async fn test_remove_active_entity() {
        let (mut studio, api, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();

        studio.remove().await.unwrap();

        assert_eq!(api.removes.load(Ordering::SeqCst), 1);
        assert!(studio.state().entities.is_empty());
        assert!(studio.state().tabs.is_empty());
        assert_eq!(studio.state().location, "/");
    }

    #[tokio::test]
    async fn test_reformat_template() {
        let (mut studio, _, _) = studio();
        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();
        studio
            .grouped_update(
                EntityPatch::new(EntityId::from("1")).with_field("content", "<div>\n<p/>\n</div>"),
            )
            .unwrap();

        studio.reformat();

        let entity = studio.state().active_entity().unwrap();
        assert_eq!(entity.str_field("content"), Some("<div>\n  <p/>\n</div>"));
        assert_eq!(entity.str_field("helpers"), Some(""));
        assert!(entity.is_dirty);
    }

    #[tokio::test]
    async fn test_reformat_without_formatter_is_silent() {
        let (mut studio, _, _) = studio();
        studio.dispatch(Action::AddExisting(folder("f", "fs", "reports")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("f")))
            .await
            .unwrap();

        studio.reformat();

        assert!(!studio.state().active_entity().unwrap().is_dirty);
    }

    #[tokio::test]
    async fn test_run_uses_last_active_template() {
        let (mut studio, _, preview) = studio();
        studio.add_preview_listener(Arc::new(OptionListener("a")));
        studio.add_preview_listener(Arc::new(OptionListener("b")));

        studio.dispatch(Action::AddExisting(template("1", "abc", "invoice")));
        studio
            .open_tab(TabSpec::for_entity(EntityId::from("1")))
            .await
            .unwrap();
        studio
            .open_tab(TabSpec::custom("StartupPage", "startup"))
            .await
            .unwrap();

        studio.run(None).await.unwrap();

        let runs = preview.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        let (request, target) = &runs[0];
        assert_eq!(target, PREVIEW_FRAME);
        assert_eq!(request.template["name"], "invoice");
        assert_eq!(request.options["a"], PREVIEW_FRAME);
        assert_eq!(request.options["b"], PREVIEW_FRAME);
        assert_eq!(request.options["entities"], 1);
        assert_eq!(studio.state().runs, 1);
    }

    #[tokio::test]
    async fn test_run_without_template() {
        let (mut studio, _, preview) = studio();
        let result = studio.run(Some("window")).await;
        assert!(matches!(result, Err(StudioError::NoActiveTemplate)));
        assert!(preview.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_actions_are_broadcast() {
        let (mut studio, _, _) = studio();
        let mut rx = studio.subscribe();

        studio.activate_undock_mode();
        studio.deactivate_undock_mode();

        assert_eq!(rx.recv().await.unwrap(), Action::ActivateUndockMode);
        assert_eq!(rx.recv().await.unwrap(), Action::DeactivateUndockMode);
        assert!(!studio.state().undock_mode);
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let (mut studio, api, _) = studio();

        let output = studio
            .execute(crate::Command::OpenNewTab {
                entity_set: TEMPLATES.to_string(),
                template: None,
                name: "Report1".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(output, crate::CommandOutput::Created(_)));

        let output = studio.execute(crate::Command::SaveAll).await.unwrap();
        assert!(matches!(output, crate::CommandOutput::Saved(ref r) if r.is_success()));
        assert_eq!(api.saves.load(Ordering::SeqCst), 1);

        assert!(studio.validate_entity_name("a/b").await.is_err());
        assert!(studio.validate_entity_name("ab").await.is_ok());
    }
}
