//! # Studio Core
//!
//! Editor state and the actions that drive it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Studio                            │
//! │  Command ──► effects (ApiClient, PreviewDispatcher)       │
//! │                 │                                         │
//! │                 ▼                                         │
//! │              Action ──► reduce() ──► StudioState          │
//! │                 │                    ┌────────────────┐   │
//! │                 ▼                    │  EntityStore   │   │
//! │             EventBus                 │  TabManager    │   │
//! │                                      └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Configuration (`StudioConfig`) and the formatter table are built once
//! at startup and handed to the `Studio` by reference.

pub mod action;
pub mod api;
pub mod command;
pub mod config;
pub mod entity;
pub mod event;
pub mod format;
pub mod store;
pub mod studio;
pub mod tabs;

pub use action::{reduce, Action, SaveStatus, StudioState};
pub use api::{
    ApiClient, ApiError, ApiResult, ErrorBody, HierarchyMoveRequest, HierarchyMoveResponse,
    MoveSource, MoveTarget, PreviewDispatcher, PreviewListener, RunPatch, RunRequest,
    ValidateNameRequest, DUPLICATED_ENTITY,
};
pub use command::{Command, CommandOutput};
pub use config::{ConfigError, EntitySetConfig, ServerConfig, StudioConfig};
pub use entity::{Entity, EntityId, EntityPatch, FolderRef, ShortId, FOLDERS, TEMPLATES};
pub use event::{EventBus, EventHandler};
pub use format::{EditorKind, FormatError, Formatter, FormatterRegistry};
pub use store::EntityStore;
pub use studio::{MoveOutcome, MoveRequest, SaveReport, Studio, PREVIEW_FRAME};
pub use tabs::{Tab, TabKind, TabManager, TabSpec};

/// Result type for studio operations
pub type StudioResult<T> = Result<T, StudioError>;

/// Errors that can occur in studio operations
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("No active tab")]
    NoActiveTab,

    #[error("No template has been active yet")]
    NoActiveTemplate,

    #[error("Unknown entity set: {0}")]
    UnknownEntitySet(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Preview error: {0}")]
    Preview(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
