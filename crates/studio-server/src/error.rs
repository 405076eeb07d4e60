//! Server errors and their HTTP mapping.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use studio_core::ErrorBody;

use crate::repository::RepositoryError;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving the studio
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Rejected request; always answered with 400
    #[error("{}", .0.message)]
    Rejected(ErrorBody),

    #[error("Unknown entity set: {0}")]
    UnknownEntitySet(String),

    #[error("Failed to read the index document: {0}")]
    Index(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// A 400 answer with a plain message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerError::Rejected(ErrorBody {
            message: message.into(),
            code: None,
        })
    }

    /// Wraps any repository failure as a 400 answer.
    pub fn rejected(error: RepositoryError) -> Self {
        ServerError::Rejected(error.to_body())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Repository(RepositoryError::NotFound(_))
            | ServerError::UnknownEntitySet(_) => StatusCode::NOT_FOUND,
            ServerError::Repository(_) | ServerError::Rejected(_) => StatusCode::BAD_REQUEST,
            ServerError::Index(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = match self {
            ServerError::Rejected(body) => body,
            ServerError::Repository(error) => error.to_body(),
            other => ErrorBody {
                message: other.to_string(),
                code: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
