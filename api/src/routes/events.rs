use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use forma_core::error::ApiError;
use forma_core::events::{Event, PaginatedResponse};
use forma_core::session::LogSegment;

use crate::error::AppError;
use crate::extract::extract_owner_id;
use crate::state::AppState;
use crate::store::event_log::EventRow;
use crate::store::sessions::{PgSessionStore, SessionStore};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions/{id}/events", get(list_session_events))
        .route("/v1/sessions/{id}/segments", get(list_session_segments))
}

/// Query parameters for the audit listing
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListEventsParams {
    /// Maximum number of events to return (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Cursor for pagination (opaque string from previous response's next_cursor)
    #[serde(default)]
    pub cursor: Option<String>,
}

/// List a session's events across all segments
///
/// The audit view of the conversation: every event ever appended, in
/// causal order (segment by segment, sequence by sequence). Events are
/// immutable, so pages never shift under the cursor.
#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/events",
    params(
        ListEventsParams,
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Paginated list of events", body = PaginatedResponse<Event>),
        (status = 404, description = "Not found", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn list_session_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<PaginatedResponse<Event>>, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    let sessions = PgSessionStore::new(state.db.clone());
    sessions
        .get(id)
        .await?
        .filter(|s| s.owner_id == owner_id)
        .ok_or(AppError::NotFound { resource: "session" })?;

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    // Fetch one extra to determine has_more
    let fetch_limit = limit + 1;

    let (after_segment, after_sequence) = match params.cursor.as_deref() {
        Some(cursor) => decode_cursor(cursor)?,
        None => (0, 0),
    };

    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT e.id, e.segment_id, e.sequence_number, e.event_type, e.body, e.created_at,
               s.segment_index
        FROM log_events e
        JOIN log_segments s ON s.id = e.segment_id
        WHERE s.session_id = $1
          AND (s.segment_index, e.sequence_number) > ($2, $3)
        ORDER BY s.segment_index ASC, e.sequence_number ASC
        LIMIT $4
        "#,
    )
    .bind(id)
    .bind(after_segment)
    .bind(after_sequence)
    .bind(fetch_limit)
    .fetch_all(&state.db)
    .await?;

    let has_more = rows.len() as i64 > limit;
    let mut last_position = None;
    let mut events = Vec::with_capacity(limit as usize);
    for row in rows.into_iter().take(limit as usize) {
        last_position = Some((row.segment_index, row.event.sequence_number));
        events.push(row.event.into_event()?);
    }

    let next_cursor = if has_more {
        last_position.map(|(segment_index, sequence)| encode_cursor(segment_index, sequence))
    } else {
        None
    };

    Ok(Json(PaginatedResponse {
        data: events,
        next_cursor,
        has_more,
    }))
}

/// List a session's log segments
///
/// The checkpoint history: one row per segment, oldest first. All but the
/// last are sealed; the last is the single appendable segment.
#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/segments",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-owner-id" = Uuid, Header, description = "Owner ID (temporary, replaced by auth)")
    ),
    responses(
        (status = 200, description = "Segments in chain order", body = Vec<LogSegment>),
        (status = 404, description = "Not found", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn list_session_segments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<LogSegment>>, AppError> {
    let owner_id = extract_owner_id(&headers)?;

    let sessions = PgSessionStore::new(state.db.clone());
    sessions
        .get(id)
        .await?
        .filter(|s| s.owner_id == owner_id)
        .ok_or(AppError::NotFound { resource: "session" })?;

    let rows = sqlx::query_as::<_, SegmentRow>(
        r#"
        SELECT id, session_id, segment_index, last_sequence, sealed_at, created_at
        FROM log_segments
        WHERE session_id = $1
        ORDER BY segment_index ASC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows.into_iter().map(|r| r.into_segment()).collect()))
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
    id: Uuid,
    session_id: Uuid,
    segment_index: i64,
    last_sequence: i64,
    sealed_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl SegmentRow {
    fn into_segment(self) -> LogSegment {
        LogSegment {
            id: self.id,
            session_id: self.session_id,
            segment_index: self.segment_index,
            last_sequence: self.last_sequence,
            sealed_at: self.sealed_at,
            created_at: self.created_at,
        }
    }
}

/// Cursor is base64("segment_index\0sequence_number") — opaque to the
/// client, stable because the log is append-only.
fn encode_cursor(segment_index: i64, sequence: i64) -> String {
    use base64::Engine;
    let raw = format!("{segment_index}\0{sequence}");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<(i64, i64), AppError> {
    use base64::Engine;
    let invalid = |message: &str| AppError::Validation {
        message: message.to_string(),
        field: Some("cursor".to_string()),
        received: Some(serde_json::Value::String(cursor.to_string())),
        docs_hint: Some("Use the next_cursor value from a previous response".to_string()),
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("Invalid cursor format"))?;
    let s = String::from_utf8(bytes).map_err(|_| invalid("Invalid cursor encoding"))?;

    let parts: Vec<&str> = s.splitn(2, '\0').collect();
    if parts.len() != 2 {
        return Err(invalid("Invalid cursor structure"));
    }
    let segment_index: i64 = parts[0].parse().map_err(|_| invalid("Invalid cursor position"))?;
    let sequence: i64 = parts[1].parse().map_err(|_| invalid("Invalid cursor position"))?;
    Ok((segment_index, sequence))
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    #[sqlx(flatten)]
    event: EventRow,
    segment_index: i64,
}
