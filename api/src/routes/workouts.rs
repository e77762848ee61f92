use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use forma_core::commands::{Command, CommandAccepted};
use forma_core::error::ApiError;
use forma_core::workout::{CreateWorkoutRequest, WorkoutSession};

use crate::error::AppError;
use crate::extract::{AppJson, extract_owner_id};
use crate::state::AppState;
use crate::store::workouts::{PgWorkoutStore, WorkoutStore, apply_command};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/workouts", post(create_workout))
        .route("/v1/workouts/{id}", get(get_workout))
        .route("/v1/workouts/{id}/commands", post(submit_command))
}

fn validate_create(req: &CreateWorkoutRequest) -> Result<(), AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::Validation {
            message: "title must not be empty".to_string(),
            field: Some("title".to_string()),
            received: Some(serde_json::Value::String(req.title.clone())),
            docs_hint: None,
        });
    }
    for (i, exercise) in req.exercises.iter().enumerate() {
        if exercise.name.trim().is_empty() {
            return Err(AppError::Validation {
                message: format!("exercises[{i}].name must not be empty"),
                field: Some(format!("exercises[{i}].name")),
                received: None,
                docs_hint: None,
            });
        }
        if exercise.sets == 0 || exercise.reps == 0 {
            return Err(AppError::Validation {
                message: format!("exercises[{i}] must have at least 1 set and 1 rep"),
                field: Some(format!("exercises[{i}]")),
                received: None,
                docs_hint: None,
            });
        }
    }
    Ok(())
}

/// Create a workout session resource
#[utoipa::path(
    post,
    path = "/v1/workouts",
    request_body = CreateWorkoutRequest,
    responses(
        (status = 201, description = "Workout session created", body = WorkoutSession),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    params(
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    tag = "workouts"
)]
pub async fn create_workout(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateWorkoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = extract_owner_id(&headers)?;
    validate_create(&req)?;

    let workouts = PgWorkoutStore::new(state.db.clone());
    let workout = workouts.create(owner_id, req).await?;

    Ok((StatusCode::CREATED, Json(workout)))
}

/// Fetch a workout session with its current payload_version
#[utoipa::path(
    get,
    path = "/v1/workouts/{id}",
    params(
        ("id" = Uuid, Path, description = "Workout session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Workout session", body = WorkoutSession),
        (status = 404, description = "Not found", body = ApiError)
    ),
    tag = "workouts"
)]
pub async fn get_workout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<WorkoutSession>, AppError> {
    let owner_id = extract_owner_id(&headers)?;
    let workouts = PgWorkoutStore::new(state.db.clone());
    let workout = workouts
        .get(id)
        .await?
        .filter(|w| w.owner_id == owner_id)
        .ok_or(AppError::NotFound {
            resource: "workout session",
        })?;
    Ok(Json(workout))
}

/// Submit a command against a workout session
///
/// Optimistic concurrency: the command lands only if expected_version
/// matches the resource's current payload_version. On conflict the caller
/// gets 409 with the current version and decides whether to retry.
/// Replaying a command_id returns the original outcome — retries are safe.
#[utoipa::path(
    post,
    path = "/v1/workouts/{id}/commands",
    request_body = Command,
    responses(
        (status = 200, description = "Command applied", body = CommandAccepted),
        (status = 404, description = "Not found", body = ApiError),
        (status = 409, description = "Version conflict; body carries current_version", body = ApiError),
        (status = 422, description = "Command violated a resource invariant", body = ApiError)
    ),
    params(
        ("id" = Uuid, Path, description = "Workout session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    tag = "workouts"
)]
pub async fn submit_command(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    AppJson(command): AppJson<Command>,
) -> Result<Json<CommandAccepted>, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    let workouts = PgWorkoutStore::new(state.db.clone());
    // Ownership check up front; the applier itself is owner-agnostic.
    workouts
        .get(id)
        .await?
        .filter(|w| w.owner_id == owner_id)
        .ok_or(AppError::NotFound {
            resource: "workout session",
        })?;

    let accepted = apply_command(&workouts, id, &command).await?;
    Ok(Json(accepted))
}
