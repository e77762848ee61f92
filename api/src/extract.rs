//! Custom extractors that convert axum rejections to structured AppError responses.
//!
//! Use `AppJson<T>` as a drop-in replacement for `axum::Json<T>` in handler signatures.
//! Unlike the standard extractor, deserialization failures produce a JSON `AppError`
//! instead of axum's default plain-text 422 response.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::HeaderMap,
};
use uuid::Uuid;

use crate::error::AppError;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    // Extract a useful field hint from common serde error patterns:
    // "missing field `text`" → field = "text"
    // "unknown field `foo`" → field = "foo"
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Extract the caller identity from the `x-owner-id` header.
/// Temporary: this comes from the authenticated principal once token auth
/// lands; until then callers pass their UUID directly.
pub fn extract_owner_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let header_val = headers.get("x-owner-id").ok_or_else(|| AppError::Validation {
        message: "x-owner-id header is required (temporary, will be replaced by auth)".to_string(),
        field: Some("headers.x-owner-id".to_string()),
        received: None,
        docs_hint: Some(
            "Pass x-owner-id as a UUID header. This is temporary until API key auth is implemented."
                .to_string(),
        ),
    })?;

    let owner_id_str = header_val.to_str().map_err(|_| AppError::Validation {
        message: "x-owner-id must be a valid UTF-8 string".to_string(),
        field: Some("headers.x-owner-id".to_string()),
        received: None,
        docs_hint: None,
    })?;

    Uuid::parse_str(owner_id_str).map_err(|_| AppError::Validation {
        message: "x-owner-id must be a valid UUID".to_string(),
        field: Some("headers.x-owner-id".to_string()),
        received: Some(serde_json::Value::String(owner_id_str.to_string())),
        docs_hint: Some(
            "Use a valid UUIDv4 or UUIDv7, e.g. 'a1b2c3d4-e5f6-7890-abcd-ef1234567890'".to_string(),
        ),
    })
}

/// Try to extract a field name from serde's error messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    // Pattern: "missing field `fieldname`"
    if let Some(start) = msg.find("missing field `") {
        let after = &msg[start + 15..];
        if let Some(end) = after.find('`') {
            return Some(after[..end].to_string());
        }
    }
    // Pattern: "unknown field `fieldname`"
    if let Some(start) = msg.find("unknown field `") {
        let after = &msg[start + 15..];
        if let Some(end) = after.find('`') {
            return Some(after[..end].to_string());
        }
    }
    None
}
