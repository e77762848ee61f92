use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use forma_core::error::ApiError;

use crate::error::AppError;
use crate::extract::{AppJson, extract_owner_id};
use crate::state::AppState;
use crate::store::profiles::PgProfileStore;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/profile", get(get_profile).put(put_profile))
}

/// Slow-changing athlete facts. These render into the stable prompt
/// prefix, so edits here are the only thing that changes it between turns.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub facts: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutProfileRequest {
    /// Flat JSON object of facts (e.g. {"goal": "strength", "experience": "beginner"})
    pub facts: serde_json::Value,
}

/// Fetch the athlete profile
#[utoipa::path(
    get,
    path = "/v1/profile",
    params(
        ("x-owner-id" = uuid::Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Profile facts", body = ProfileResponse)
    ),
    tag = "profile"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, AppError> {
    let owner_id = extract_owner_id(&headers)?;
    let facts = PgProfileStore::new(state.db.clone()).facts(owner_id).await?;
    Ok(Json(ProfileResponse { facts }))
}

/// Replace the athlete profile
#[utoipa::path(
    put,
    path = "/v1/profile",
    request_body = PutProfileRequest,
    params(
        ("x-owner-id" = uuid::Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Stored profile facts", body = ProfileResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "profile"
)]
pub async fn put_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<PutProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    if !req.facts.is_object() {
        return Err(AppError::Validation {
            message: "facts must be a JSON object".to_string(),
            field: Some("facts".to_string()),
            received: Some(req.facts),
            docs_hint: Some(
                "Pass a flat object of profile facts, e.g. {\"goal\": \"strength\"}".to_string(),
            ),
        });
    }

    let facts = PgProfileStore::new(state.db.clone())
        .upsert(owner_id, req.facts)
        .await?;
    Ok(Json(ProfileResponse { facts }))
}
