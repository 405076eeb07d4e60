//! Minimal OData-style entity endpoints.
//!
//! Resources are addressed as `/odata/templates` (the collection) or
//! `/odata/templates(5)` (one entity). Only the `_id eq '..'` filter is
//! understood, which is all the studio client sends.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use studio_core::{Entity, EntityId};

use crate::error::{ServerError, ServerResult};
use crate::routes::AppState;

/// Query parameter carrying the filter expression.
const FILTER: &str = "$filter";

/// Splits `templates(5)` into the set and the key.
pub fn parse_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.split_once('(') {
        Some((set, rest)) => {
            let key = rest.trim_end_matches(')').trim_matches('\'');
            (set, Some(key))
        }
        None => (resource, None),
    }
}

/// Extracts the id from `_id eq '5'`.
pub fn parse_id_filter(filter: &str) -> Option<&str> {
    let value = filter.trim().strip_prefix("_id")?.trim_start();
    let value = value.strip_prefix("eq")?.trim();
    Some(value.trim_matches('\''))
}

fn entity_set<'a>(state: &AppState, resource: &'a str) -> ServerResult<(&'a str, Option<&'a str>)> {
    let (set, key) = parse_resource(resource);
    if state.config.entity_set(set).is_none() {
        return Err(ServerError::UnknownEntitySet(set.to_string()));
    }
    Ok((set, key))
}

fn require_key(key: Option<&str>) -> ServerResult<EntityId> {
    key.map(EntityId::from)
        .ok_or_else(|| ServerError::bad_request("entity key missing from resource"))
}

pub async fn query(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ServerResult<Json<serde_json::Value>> {
    let (set, key) = entity_set(&state, &resource)?;
    let repository = state.repository.read().await;

    let id = key.or_else(|| params.get(FILTER).and_then(|f| parse_id_filter(f)));
    let value: Vec<Entity> = match id {
        Some(id) => repository
            .find(set, &EntityId::from(id))
            .cloned()
            .into_iter()
            .collect(),
        None => repository.list(set),
    };

    Ok(Json(json!({ "value": value })))
}

pub async fn insert(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(entity): Json<Entity>,
) -> ServerResult<Response> {
    let (set, _) = entity_set(&state, &resource)?;
    let stored = state.repository.write().await.insert(set, entity)?;

    tracing::info!("Created {} {}", set, stored.id);
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(changes): Json<Entity>,
) -> ServerResult<Json<Entity>> {
    let (set, key) = entity_set(&state, &resource)?;
    let id = require_key(key)?;

    let stored = state.repository.write().await.update(set, &id, changes)?;
    Ok(Json(stored))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> ServerResult<StatusCode> {
    let (set, key) = entity_set(&state, &resource)?;
    let id = require_key(key)?;

    state.repository.write().await.remove(set, &id)?;
    tracing::info!("Removed {} {}", set, id);
    Ok(StatusCode::NO_CONTENT)
}
