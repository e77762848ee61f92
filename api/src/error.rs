use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use forma_core::commands::PatchError;
use forma_core::error::{self, ApiError};

use crate::engine::provider::ProviderError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Request shape error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Command violated a resource invariant (422). Requires caller
    /// correction, never a retry.
    CommandRejected { message: String, field: Option<String> },
    /// Resource does not exist or is not visible to the caller (404)
    NotFound { resource: &'static str },
    /// Stale expected_version (409). The caller must re-read at
    /// current_version and decide whether to retry.
    Conflict { current_version: i64 },
    /// The completion provider returned an unusable response (502)
    Protocol(String),
    /// The completion provider is unreachable or timed out (504)
    ProviderUnavailable(String),
    /// Database error (500). Fatal to the current turn — the audit trail
    /// cannot be trusted once appends fail.
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    current_version: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::CommandRejected { message, field } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError {
                    error: error::codes::COMMAND_REJECTED.to_string(),
                    message,
                    field,
                    received: None,
                    current_version: None,
                    request_id,
                    docs_hint: Some(
                        "Re-read the workout session and correct the command payload. \
                         Rejected commands are never applied partially."
                            .to_string(),
                    ),
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    current_version: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Conflict { current_version } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message: format!(
                        "expected_version is stale; the resource is now at version {current_version}"
                    ),
                    field: Some("expected_version".to_string()),
                    received: None,
                    current_version: Some(current_version),
                    request_id,
                    docs_hint: Some(
                        "Re-read the workout session, rebase your edit on current_version, \
                         and submit a new command."
                            .to_string(),
                    ),
                },
            ),
            AppError::Protocol(message) => {
                tracing::warn!("provider protocol error: {}", message);
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::PROTOCOL_ERROR.to_string(),
                        message,
                        field: None,
                        received: None,
                        current_version: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::ProviderUnavailable(message) => {
                tracing::warn!("provider unavailable: {}", message);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ApiError {
                        error: error::codes::PROVIDER_UNAVAILABLE.to_string(),
                        message,
                        field: None,
                        received: None,
                        current_version: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        current_version: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        current_version: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<PatchError> for AppError {
    fn from(err: PatchError) -> Self {
        let field = match &err {
            PatchError::IndexOutOfBounds { .. } | PatchError::PositionOutOfBounds { .. } => {
                Some("index".to_string())
            }
            PatchError::EmptyExerciseName => Some("new_exercise.name".to_string()),
            PatchError::EmptyUpdate => None,
            PatchError::NotActive { .. } => Some("status".to_string()),
        };
        AppError::CommandRejected {
            message: err.to_string(),
            field,
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Protocol(msg) => AppError::Protocol(msg),
            ProviderError::Timeout(d) => {
                AppError::ProviderUnavailable(format!("provider call timed out after {d:?}"))
            }
            ProviderError::Transport(msg) => AppError::ProviderUnavailable(msg),
        }
    }
}
