//! The studio index document.
//!
//! The built `index.html` references `client.js` relative to nothing and
//! carries a `$jsreportTitle` placeholder. Both are filled in per request.

use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::Extension;
use http::{header, StatusCode, Uri};

use crate::routes::AppState;
use crate::{ServerError, ServerResult};

/// Placeholder replaced with the page title.
pub const TITLE_PLACEHOLDER: &str = "$jsreportTitle";

/// Script reference rewritten to the asset route.
pub const CLIENT_SCRIPT: &str = "client.js";

/// Per-request values set by upstream middleware.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Overrides the default page title
    pub html_title: Option<String>,
}

/// Fills in the index template. Only the first occurrence of each
/// placeholder is replaced.
pub fn render_index(template: &str, app_path: &str, title: &str) -> String {
    let script = format!("{}studio/assets/{}", app_path, CLIENT_SCRIPT);
    template
        .replacen(CLIENT_SCRIPT, &script, 1)
        .replacen(TITLE_PLACEHOLDER, title, 1)
}

/// Serves the index at the app root, redirecting to the trailing-slash form.
pub async fn redirect_or_send_index(
    state: State<AppState>,
    uri: Uri,
    context: Option<Extension<RequestContext>>,
) -> ServerResult<Response> {
    let path = uri.path();
    if !path.ends_with('/') {
        let location = match uri.query() {
            Some(query) => format!("{}/?{}", path, query),
            None => format!("{}/", path),
        };
        tracing::debug!("Redirecting {} to {}", path, location);
        return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
    }

    send_index(state, context).await
}

/// Serves the index document.
pub async fn send_index(
    State(state): State<AppState>,
    context: Option<Extension<RequestContext>>,
) -> ServerResult<Response> {
    let path = state.config.server.dist_path().join("index.html");
    let template = tokio::fs::read_to_string(&path)
        .await
        .map_err(ServerError::Index)?;

    let title = context
        .and_then(|Extension(ctx)| ctx.html_title)
        .unwrap_or_else(|| state.config.server.default_title());

    Ok(Html(render_index(&template, &state.config.editor.app_path, &title)).into_response())
}
