//! Collaborator seams: the server API and the preview pane.
//!
//! ## Learning: Trait Objects for Effects
//!
//! The action layer only knows these traits. The real HTTP client lives in
//! `studio-client`; tests plug in recording fakes. `async_trait` keeps the
//! traits object-safe so they can sit behind `Arc<dyn ...>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityId, ShortId};
use crate::store::EntityStore;
use crate::StudioResult;

/// Error code the server uses for a name collision on move.
pub const DUPLICATED_ENTITY: &str = "DUPLICATED_ENTITY";

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures reported by an [`ApiClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Duplicated entity: {0}")]
    DuplicatedEntity(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Builds an error from a failed response body.
    pub fn from_body(status: u16, body: ErrorBody) -> Self {
        match body.code.as_deref() {
            Some(DUPLICATED_ENTITY) => ApiError::DuplicatedEntity(body.message),
            _ => ApiError::Server {
                status,
                message: body.message,
            },
        }
    }
}

/// JSON error body of the studio endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Entity being moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSource {
    pub entity_set: String,
    pub id: EntityId,
}

/// Folder the entity moves into (`shortid: None` = root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTarget {
    pub shortid: Option<ShortId>,
}

/// Body of `POST /studio/hierarchyMove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyMoveRequest {
    pub source: MoveSource,
    pub target: MoveTarget,
    pub copy: bool,
    pub replace: bool,
}

/// Successful response of `POST /studio/hierarchyMove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyMoveResponse {
    pub items: Vec<Entity>,
}

/// Body of `POST /studio/validate-entity-name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateNameRequest {
    pub name: String,
}

/// The reporting server's REST API, as seen by the studio.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetches the full record of an entity.
    async fn load(&self, entity_set: &str, id: &EntityId) -> ApiResult<Entity>;

    /// Creates (new entity) or updates (existing) and returns the stored record.
    async fn save(&self, entity: &Entity) -> ApiResult<Entity>;

    /// Deletes an entity.
    async fn remove(&self, entity_set: &str, id: &EntityId) -> ApiResult<()>;

    /// Moves, copies or replaces an entity in the folder tree.
    async fn hierarchy_move(&self, request: &HierarchyMoveRequest) -> ApiResult<Vec<Entity>>;

    /// Checks an entity name against the server's naming rules.
    async fn validate_entity_name(&self, name: &str) -> ApiResult<()>;
}

/// Request handed to the preview pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub template: Value,
    pub options: Map<String, Value>,
}

/// Changes a preview listener wants applied to a [`RunRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub template: Map<String, Value>,
    pub options: Map<String, Value>,
}

impl RunPatch {
    /// Applies the patch onto a request.
    pub fn apply(self, request: &mut RunRequest) {
        if let Value::Object(template) = &mut request.template {
            template.extend(self.template);
        }
        request.options.extend(self.options);
    }
}

/// Hook that may adjust a run before it reaches the preview.
///
/// Listeners run concurrently and only see the unpatched request, so they
/// must not depend on each other.
#[async_trait]
pub trait PreviewListener: Send + Sync {
    async fn before_run(
        &self,
        request: &RunRequest,
        entities: &EntityStore,
        target: &str,
    ) -> StudioResult<RunPatch>;
}

/// Renders a run request into a named view.
#[async_trait]
pub trait PreviewDispatcher: Send + Sync {
    async fn preview(&self, request: RunRequest, target: &str) -> StudioResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_move_request_wire_format() {
        let request = HierarchyMoveRequest {
            source: MoveSource {
                entity_set: "templates".to_string(),
                id: EntityId::from(5),
            },
            target: MoveTarget {
                shortid: Some(ShortId::from("f1")),
            },
            copy: false,
            replace: false,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "source": { "entitySet": "templates", "id": 5 },
                "target": { "shortid": "f1" },
                "copy": false,
                "replace": false
            })
        );
    }

    #[test]
    fn test_error_from_body() {
        let dup = ApiError::from_body(
            400,
            ErrorBody {
                message: "exists".to_string(),
                code: Some(DUPLICATED_ENTITY.to_string()),
            },
        );
        assert!(matches!(dup, ApiError::DuplicatedEntity(_)));

        let other = ApiError::from_body(
            400,
            ErrorBody {
                message: "boom".to_string(),
                code: None,
            },
        );
        assert!(matches!(other, ApiError::Server { status: 400, .. }));
    }

    #[test]
    fn test_run_patch_apply() {
        let mut request = RunRequest {
            template: json!({ "name": "a" }),
            options: Map::new(),
        };

        let mut patch = RunPatch::default();
        patch.template.insert("content".to_string(), json!("x"));
        patch.options.insert("timeout".to_string(), json!(100));
        patch.apply(&mut request);

        assert_eq!(request.template["content"], "x");
        assert_eq!(request.options["timeout"], 100);
    }
}
