use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{self, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use forma_core::error::ApiError;
use forma_core::session::{CreateSessionRequest, SendMessageRequest, Session};
use forma_core::stream::StreamEvent;

use crate::engine::registry::ToolRegistry;
use crate::engine::turn::{TurnDeps, run_turn};
use crate::error::AppError;
use crate::extract::{AppJson, extract_owner_id};
use crate::state::AppState;
use crate::store::event_log::PgEventLog;
use crate::store::profiles::PgProfileStore;
use crate::store::sessions::{PgSessionStore, SessionStore};
use crate::store::workouts::PgWorkoutStore;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{id}", get(get_session))
        .route("/v1/sessions/{id}/messages", post(send_message))
}

/// Create a conversation session
///
/// Opens a new session with a fresh log segment. Optionally links an
/// existing workout session the conversation will edit.
#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    params(
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    let sessions = PgSessionStore::new(state.db.clone());
    let session = sessions.create(owner_id, req.workout_session_id).await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// Fetch session metadata
#[utoipa::path(
    get,
    path = "/v1/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Session", body = Session),
        (status = 404, description = "Not found", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Session>, AppError> {
    let owner_id = extract_owner_id(&headers)?;
    let session = load_owned_session(&state, id, owner_id).await?;
    Ok(Json(session))
}

/// Run one agent turn
///
/// Appends the user message and streams the turn as server-sent events:
/// `status`, `knowledge`, `action_start`, `action_result`, `message`,
/// `error`, `done`. Events arrive in log order and `done` is always the
/// final event, exactly once, on success and error paths alike.
/// Disconnecting mid-stream cancels outstanding provider work but keeps
/// already-appended events, so a retried request resumes rather than
/// repeats.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/messages",
    request_body = SendMessageRequest,
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "SSE stream of turn events (text/event-stream)"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    AppJson(req): AppJson<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<sse::Event, Infallible>>>, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    if req.text.trim().is_empty() {
        return Err(AppError::Validation {
            message: "text must not be empty".to_string(),
            field: Some("text".to_string()),
            received: None,
            docs_hint: None,
        });
    }

    let session = load_owned_session(&state, id, owner_id).await?;
    let facts = PgProfileStore::new(state.db.clone()).facts(owner_id).await?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let db = state.db.clone();
    let provider = state.provider.clone();
    let config = state.config.clone();
    let text = req.text;

    tokio::spawn(async move {
        let log = PgEventLog::new(db.clone());
        let sessions = PgSessionStore::new(db.clone());
        let workouts = PgWorkoutStore::new(db);
        let registry = ToolRegistry::coaching();
        let deps = TurnDeps {
            log: &log,
            sessions: &sessions,
            workouts: &workouts,
            provider: provider.as_ref(),
            registry: &registry,
            config: &config,
        };
        let status = run_turn(&deps, session, facts, text, &tx).await;
        tracing::info!(session_id = %id, ?status, "turn finished");
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let kind = event.kind();
        Ok(sse::Event::default()
            .event(kind)
            .json_data(&event)
            .unwrap_or_else(|err| {
                tracing::error!("failed to serialize stream event: {err}");
                sse::Event::default().event("error").data("serialization failure")
            }))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn load_owned_session(
    state: &AppState,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Session, AppError> {
    let sessions = PgSessionStore::new(state.db.clone());
    // An existing session owned by someone else reads as absent, not
    // forbidden — the id space leaks nothing.
    sessions
        .get(id)
        .await?
        .filter(|s| s.owner_id == owner_id)
        .ok_or(AppError::NotFound { resource: "session" })
}
