//! State transitions and the reducer.
//!
//! ## Learning: Command/Effect Separation
//!
//! An [`Action`] is a plain value describing *what happened*. [`reduce`]
//! is the single place that turns actions into state changes; it never
//! performs I/O. The effect executor ([`crate::Studio`]) does the I/O and
//! feeds the results back in as more actions.

use crate::config::StudioConfig;
use crate::entity::{Entity, EntityId, EntityPatch};
use crate::store::EntityStore;
use crate::tabs::{Tab, TabManager};

/// A state transition record.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Action {
    // Entity store
    AddEntity(Entity),
    AddExisting(Entity),
    EntityLoaded(Entity),
    RemoveExisting {
        id: EntityId,
        children: Vec<EntityId>,
    },
    RemoveEntity(EntityId),
    UnloadEntity(EntityId),
    UpdateEntity(EntityPatch),
    GroupedUpdate(EntityPatch),
    FlushUpdates,
    EntitySaved {
        local_id: EntityId,
        entity: Entity,
    },

    // Tabs
    OpenTab(Tab),
    OpenNewTab(Tab),
    CloseTab(String),
    ActivateTab(String),

    // Routing
    Navigate(String),

    // Save lifecycle
    SaveStarted,
    SaveSuccess,
    SaveFailed(String),

    // API lifecycle
    ApiStart,
    ApiDone,
    ApiFailed(String),

    // Preview and layout
    Run,
    ActivateUndockMode,
    DeactivateUndockMode,
}

impl Action {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Action::AddEntity(_) => "ENTITIES_ADD",
            Action::AddExisting(_) => "ENTITIES_ADD_EXISTING",
            Action::EntityLoaded(_) => "ENTITIES_LOAD",
            Action::RemoveExisting { .. } => "ENTITIES_REMOVE_EXISTING",
            Action::RemoveEntity(_) => "ENTITIES_REMOVE",
            Action::UnloadEntity(_) => "ENTITIES_UNLOAD",
            Action::UpdateEntity(_) => "ENTITIES_UPDATE",
            Action::GroupedUpdate(_) => "ENTITIES_GROUPED_UPDATE",
            Action::FlushUpdates => "ENTITIES_FLUSH_UPDATES",
            Action::EntitySaved { .. } => "ENTITIES_SAVE",
            Action::OpenTab(_) => "EDITOR_OPEN_TAB",
            Action::OpenNewTab(_) => "EDITOR_OPEN_NEW_TAB",
            Action::CloseTab(_) => "EDITOR_CLOSE_TAB",
            Action::ActivateTab(_) => "EDITOR_ACTIVATE_TAB",
            Action::Navigate(_) => "ROUTER_NAVIGATE",
            Action::SaveStarted => "EDITOR_SAVE_STARTED",
            Action::SaveSuccess => "EDITOR_SAVE_SUCCESS",
            Action::SaveFailed(_) => "EDITOR_SAVE_FAILED",
            Action::ApiStart => "API_START",
            Action::ApiDone => "API_DONE",
            Action::ApiFailed(_) => "API_FAILED",
            Action::Run => "EDITOR_RUN",
            Action::ActivateUndockMode => "EDITOR_ACTIVATE_UNDOCK_MODE",
            Action::DeactivateUndockMode => "EDITOR_DEACTIVATE_UNDOCK_MODE",
        }
    }
}

/// Progress of the most recent save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Failed(String),
}

/// Everything the studio UI renders from.
#[derive(Debug, Clone)]
pub struct StudioState {
    pub entities: EntityStore,
    pub tabs: TabManager,

    /// Current location (URL path)
    pub location: String,

    pub save_status: SaveStatus,

    /// Number of API calls in flight
    pub pending_api_calls: usize,

    /// Message of the last failed API call
    pub last_api_error: Option<String>,

    /// Preview pane detached into its own window
    pub undock_mode: bool,

    /// Number of runs dispatched
    pub runs: usize,
}

impl StudioState {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            entities: EntityStore::new(),
            tabs: TabManager::new(),
            location: location.into(),
            save_status: SaveStatus::default(),
            pending_api_calls: 0,
            last_api_error: None,
            undock_mode: false,
            runs: 0,
        }
    }

    /// Returns the entity of the active tab.
    pub fn active_entity(&self) -> Option<&Entity> {
        let id = self.tabs.active()?.entity_id()?;
        self.entities.get(id)
    }
}

impl Default for StudioState {
    fn default() -> Self {
        Self::new("/")
    }
}

/// Applies a single action to the state.
pub fn reduce(state: &mut StudioState, action: &Action, config: &StudioConfig) {
    match action {
        Action::AddEntity(entity) => state.entities.add(entity.clone()),
        Action::AddExisting(entity) | Action::EntityLoaded(entity) => {
            state.entities.add_existing(entity.clone())
        }
        Action::RemoveExisting { id, children } => state.entities.remove_existing(id, children),
        Action::RemoveEntity(id) => {
            state.entities.remove(id);
            state.tabs.close_for_entity(id);
        }
        Action::UnloadEntity(id) => {
            let reference_attributes = state
                .entities
                .get(id)
                .and_then(|e| config.entity_set(&e.entity_set))
                .map(|s| s.reference_attributes.clone())
                .unwrap_or_default();
            state.entities.unload(id, &reference_attributes);
        }
        Action::UpdateEntity(patch) => {
            if let Err(e) = state.entities.update(patch) {
                tracing::warn!("Update ignored: {}", e);
            }
        }
        Action::GroupedUpdate(patch) => state.entities.grouped_update(patch.clone()),
        Action::FlushUpdates => state.entities.flush_updates(),
        Action::EntitySaved { local_id, entity } => {
            state.tabs.rekey(local_id, &entity.id);
            state.entities.replace_saved(local_id, entity.clone());
        }

        Action::OpenTab(tab) | Action::OpenNewTab(tab) => {
            state.tabs.open(tab.clone());
            state.tabs.activate(&tab.key);
        }
        Action::CloseTab(key) => {
            state.tabs.close(key);
        }
        Action::ActivateTab(key) => {
            state.tabs.activate(key);
        }

        Action::Navigate(path) => state.location = path.clone(),

        Action::SaveStarted => state.save_status = SaveStatus::Saving,
        Action::SaveSuccess => state.save_status = SaveStatus::Saved,
        Action::SaveFailed(message) => state.save_status = SaveStatus::Failed(message.clone()),

        Action::ApiStart => state.pending_api_calls += 1,
        Action::ApiDone => state.pending_api_calls = state.pending_api_calls.saturating_sub(1),
        Action::ApiFailed(message) => {
            state.pending_api_calls = state.pending_api_calls.saturating_sub(1);
            state.last_api_error = Some(message.clone());
        }

        Action::Run => state.runs += 1,
        Action::ActivateUndockMode => state.undock_mode = true,
        Action::DeactivateUndockMode => state.undock_mode = false,
    }
}
