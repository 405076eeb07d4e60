//! Router and studio endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use studio_core::{
    HierarchyMoveRequest, HierarchyMoveResponse, MoveSource, MoveTarget, ShortId, StudioConfig,
    ValidateNameRequest,
};
use tokio::sync::RwLock;
use tower_http::compression::CompressionLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::error::{ServerError, ServerResult};
use crate::index::{redirect_or_send_index, send_index};
use crate::odata;
use crate::repository::{Repository, RepositoryError};

/// Repository shared between requests.
pub type SharedRepository = Arc<RwLock<dyn Repository>>;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StudioConfig>,
    pub repository: SharedRepository,
}

impl AppState {
    pub fn new(config: Arc<StudioConfig>, repository: SharedRepository) -> Self {
        Self { config, repository }
    }
}

/// Builds the studio router under the configured app path.
pub fn router(state: AppState) -> Router {
    let base = state.config.editor.app_path.clone();
    let server = &state.config.server;

    let mut router = Router::new()
        .route(&base, get(redirect_or_send_index))
        .route(&format!("{}studio/hierarchyMove", base), post(hierarchy_move))
        .route(
            &format!("{}studio/validate-entity-name", base),
            post(validate_entity_name),
        )
        .route(&format!("{}studio/{{*path}}", base), get(send_index))
        .route(
            &format!("{}odata/{{resource}}", base),
            get(odata::query)
                .post(odata::insert)
                .patch(odata::update)
                .delete(odata::remove),
        )
        .nest_service(
            &format!("{}studio/assets", base),
            ServeDir::new(server.dist_path()),
        )
        .route_service(
            &format!("{}favicon.ico", base),
            ServeFile::new(server.static_path.join("favicon.ico")),
        );

    // "/reports" redirects to "/reports/"
    let trimmed = base.trim_end_matches('/');
    if !trimmed.is_empty() {
        router = router.route(trimmed, get(redirect_or_send_index));
    }

    let use_compression = server.use_compression;
    let mut router = router.layer(TraceLayer::new_for_http()).with_state(state);

    if use_compression {
        router = router.layer(CompressionLayer::new());
    }

    router
}

/// Body of a move request; both ends are checked by hand so the error
/// names the missing one.
#[derive(Debug, Deserialize)]
struct MoveBody {
    source: Option<SourceRef>,
    target: Option<TargetRef>,
    #[serde(default)]
    copy: bool,
    #[serde(default)]
    replace: bool,
}

/// Either end of a move may be given as a bare short id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceRef {
    Shortid(ShortId),
    Entity(MoveSource),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetRef {
    Shortid(ShortId),
    Folder(MoveTarget),
}

impl SourceRef {
    fn resolve(self, repository: &dyn Repository) -> ServerResult<MoveSource> {
        match self {
            SourceRef::Entity(source) => Ok(source),
            SourceRef::Shortid(shortid) => repository
                .find_by_shortid(&shortid)
                .map(|e| MoveSource {
                    entity_set: e.entity_set.clone(),
                    id: e.id.clone(),
                })
                .ok_or_else(|| {
                    ServerError::rejected(RepositoryError::NotFound(format!(
                        "shortid {}",
                        shortid
                    )))
                }),
        }
    }
}

impl From<TargetRef> for MoveTarget {
    fn from(target: TargetRef) -> Self {
        match target {
            TargetRef::Shortid(shortid) => MoveTarget {
                shortid: Some(shortid),
            },
            TargetRef::Folder(target) => target,
        }
    }
}

async fn hierarchy_move(
    State(state): State<AppState>,
    body: Result<Json<MoveBody>, JsonRejection>,
) -> ServerResult<Json<HierarchyMoveResponse>> {
    let Json(body) = body.map_err(|e| ServerError::bad_request(e.body_text()))?;

    let (source, target) = match (body.source, body.target) {
        (Some(source), Some(target)) => (source, target),
        (source, _) => {
            let missing = if source.is_none() { "source" } else { "target" };
            return Err(ServerError::bad_request(format!(
                "No \"{}\" for specified in payload",
                missing
            )));
        }
    };

    let mut repository = state.repository.write().await;
    let source = source.resolve(&*repository)?;

    let request = HierarchyMoveRequest {
        source,
        target: target.into(),
        copy: body.copy,
        replace: body.replace,
    };

    tracing::info!(
        "Moving {} {} (copy: {}, replace: {})",
        request.source.entity_set,
        request.source.id,
        request.copy,
        request.replace
    );

    let items = repository
        .hierarchy_move(&request)
        .map_err(ServerError::rejected)?;

    Ok(Json(HierarchyMoveResponse { items }))
}

async fn validate_entity_name(
    State(state): State<AppState>,
    body: Result<Json<ValidateNameRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
    };

    match state.repository.read().await.validate_entity_name(&body.name) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}
