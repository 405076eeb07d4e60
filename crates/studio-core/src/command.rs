//! User intents as values.
//!
//! ## Learning: The Command Pattern
//!
//! A [`Command`] says what the user asked for; [`Studio::execute`] turns it
//! into effects and actions. Key bindings, menus and tests all go through
//! the same entry point.

use crate::entity::{Entity, EntityId, EntityPatch};
use crate::studio::{MoveOutcome, MoveRequest, SaveReport, Studio};
use crate::tabs::TabSpec;
use crate::StudioResult;

/// Commands the studio understands.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Command {
    // Tabs
    OpenTab(TabSpec),
    OpenNewTab {
        entity_set: String,
        template: Option<Entity>,
        name: String,
    },
    CloseTab(String),
    ActivateTab(String),

    // Entities
    Update(EntityPatch),
    GroupedUpdate(EntityPatch),
    FlushUpdates,
    Save,
    SaveAll,
    Remove,
    HierarchyMove(MoveRequest),

    // Editor
    Reformat,
    Run { target: Option<String> },
    UpdateHistory,
    ActivateUndockMode,
    DeactivateUndockMode,
}

impl Command {
    /// Returns the command's display name.
    pub fn display_name(&self) -> &str {
        match self {
            Command::OpenTab(_) => "Open",
            Command::OpenNewTab { .. } => "New",
            Command::CloseTab(_) => "Close Tab",
            Command::ActivateTab(_) => "Activate Tab",
            Command::Update(_) => "Update",
            Command::GroupedUpdate(_) => "Edit",
            Command::FlushUpdates => "Flush Updates",
            Command::Save => "Save",
            Command::SaveAll => "Save All",
            Command::Remove => "Delete",
            Command::HierarchyMove(_) => "Move",
            Command::Reformat => "Reformat",
            Command::Run { .. } => "Run",
            Command::UpdateHistory => "Update History",
            Command::ActivateUndockMode => "Undock Preview",
            Command::DeactivateUndockMode => "Dock Preview",
        }
    }
}

/// What a command produced, for callers that care.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    None,
    Created(EntityId),
    Saved(SaveReport),
    Moved(MoveOutcome),
}

impl Studio {
    /// Executes a command.
    pub async fn execute(&mut self, command: Command) -> StudioResult<CommandOutput> {
        tracing::debug!("Executing {}", command.display_name());

        match command {
            Command::OpenTab(spec) => self.open_tab(spec).await?,
            Command::OpenNewTab {
                entity_set,
                template,
                name,
            } => {
                let id = self
                    .open_new_tab(&entity_set, template.as_ref(), &name)
                    .await?;
                return Ok(CommandOutput::Created(id));
            }
            Command::CloseTab(key) => self.close_tab(&key)?,
            Command::ActivateTab(key) => self.activate_tab(&key)?,

            Command::Update(patch) => self.update(patch)?,
            Command::GroupedUpdate(patch) => self.grouped_update(patch)?,
            Command::FlushUpdates => self.flush_updates(),
            Command::Save => self.save().await?,
            Command::SaveAll => return Ok(CommandOutput::Saved(self.save_all().await)),
            Command::Remove => self.remove().await?,
            Command::HierarchyMove(request) => {
                return Ok(CommandOutput::Moved(self.hierarchy_move(request).await?));
            }

            Command::Reformat => self.reformat(),
            Command::Run { target } => self.run(target.as_deref()).await?,
            Command::UpdateHistory => self.update_history(),
            Command::ActivateUndockMode => self.activate_undock_mode(),
            Command::DeactivateUndockMode => self.deactivate_undock_mode(),
        }

        Ok(CommandOutput::None)
    }
}
