//! # Studio Server
//!
//! HTTP integration layer: the index document, static assets, and the
//! endpoints the studio calls for hierarchy moves, name validation and
//! entity persistence.
//!
//! ## Learning: Shared State in axum
//!
//! Every handler receives a clone of [`AppState`]. The clone is cheap (two
//! `Arc`s) and the repository sits behind a `tokio::sync::RwLock`, so reads
//! proceed in parallel while writes serialize.

pub mod error;
pub mod index;
pub mod odata;
pub mod repository;
pub mod routes;

pub use error::{ServerError, ServerResult};
pub use index::{render_index, RequestContext};
pub use repository::{
    validate_entity_name, MemoryRepository, Repository, RepositoryError, RepositoryResult,
};
pub use routes::{router, AppState, SharedRepository};

use tokio::net::TcpListener;

/// Binds the configured address and serves until the process stops.
pub async fn serve(state: AppState) -> ServerResult<()> {
    let listener = TcpListener::bind(&state.config.server.bind).await?;
    serve_on(listener, state).await
}

/// Serves on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: AppState) -> ServerResult<()> {
    tracing::info!(
        "Studio listening on http://{}{}",
        listener.local_addr()?,
        state.config.editor.app_path
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
