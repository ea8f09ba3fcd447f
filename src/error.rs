use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

/// Errors produced by URL creation, resolution and management.
///
/// `Expired` and `Inactive` never reach a client as such: they share the
/// `NotFound` status, body and code.
#[derive(Debug, Error)]
pub enum ShortenerError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid custom slug: {0}")]
    InvalidSlug(String),
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("custom slug '{0}' is already taken")]
    SlugTaken(String),
    #[error("could not generate a unique short id after {0} attempts")]
    Collision(usize),
    #[error("URL not found")]
    NotFound,
    #[error("URL has expired")]
    Expired,
    #[error("URL has been deactivated")]
    Inactive,
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

impl From<StorageError> for ShortenerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ShortenerError::NotFound,
            StorageError::Conflict => {
                ShortenerError::Storage(anyhow::anyhow!("unexpected short id conflict"))
            }
            StorageError::Other(err) => ShortenerError::Storage(err),
        }
    }
}

impl From<anyhow::Error> for ShortenerError {
    fn from(err: anyhow::Error) -> Self {
        ShortenerError::Storage(err)
    }
}

impl ShortenerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ShortenerError::InvalidUrl(_)
            | ShortenerError::InvalidSlug(_)
            | ShortenerError::InvalidTimeRange(_)
            | ShortenerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ShortenerError::SlugTaken(_) => StatusCode::CONFLICT,
            ShortenerError::NotFound | ShortenerError::Expired | ShortenerError::Inactive => {
                StatusCode::NOT_FOUND
            }
            ShortenerError::InvalidBaseUrl(_)
            | ShortenerError::Collision(_)
            | ShortenerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ShortenerError::InvalidUrl(_) => "invalid_url",
            ShortenerError::InvalidBaseUrl(_) => "invalid_base_url",
            ShortenerError::InvalidSlug(_) => "invalid_slug",
            ShortenerError::InvalidTimeRange(_) => "invalid_time_range",
            ShortenerError::InvalidRequest(_) => "invalid_request",
            ShortenerError::SlugTaken(_) => "slug_taken",
            ShortenerError::Collision(_) => "collision",
            ShortenerError::NotFound | ShortenerError::Expired | ShortenerError::Inactive => {
                "not_found"
            }
            ShortenerError::Storage(_) => "storage_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ShortenerError::NotFound | ShortenerError::Expired | ShortenerError::Inactive => {
                "URL not found".to_string()
            }
            ShortenerError::Storage(_) | ShortenerError::InvalidBaseUrl(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ShortenerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.public_message(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unusable_states_share_not_found_contract() {
        for err in [
            ShortenerError::NotFound,
            ShortenerError::Expired,
            ShortenerError::Inactive,
        ] {
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
            assert_eq!(err.code(), "not_found");
            assert_eq!(err.public_message(), "URL not found");
        }
    }

    #[test]
    fn test_validation_errors_are_client_errors() {
        assert_eq!(
            ShortenerError::InvalidUrl("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShortenerError::InvalidRequest("missing field `url`".into()).code(),
            "invalid_request"
        );
        assert_eq!(
            ShortenerError::InvalidTimeRange("1y".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShortenerError::SlugTaken("promo".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ShortenerError::Storage(anyhow::anyhow!("db down")).public_message(),
            "Internal server error"
        );
    }
}
