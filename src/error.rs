use axum::{response::IntoResponse, Json};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Persistence,
    PartialAggregation,
    AccessDenied,
    Integrity,
    Upstream,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Persistence(#[source] StoreError),
    #[error("analytics incomplete: {failed} of {scanned} scanned records failed")]
    PartialAggregation { scanned: usize, failed: usize },
    #[error("{0}")]
    AccessDenied(String),
    #[error("stored record is malformed: {0}")]
    Integrity(String),
    #[error("external service failed: {0}")]
    Upstream(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::PartialAggregation { .. } => ErrorKind::PartialAggregation,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }

    /// Only transient storage and upstream failures are worth retrying;
    /// everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Upstream(_))
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(what: T) -> Self {
        Self::NotFound(what.into())
    }

    pub fn denied<T: Into<String>>(msg: T) -> Self {
        Self::AccessDenied(msg.into())
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, key } => {
                CoreError::NotFound(format!("{collection}/{key}"))
            }
            StoreError::Codec(e) => CoreError::Integrity(e.to_string()),
            other => CoreError::Persistence(other),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Persistence | ErrorKind::PartialAggregation => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            ErrorKind::Integrity => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "retryable": self.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
