use async_trait::async_trait;
use forma_core::events::{Event, EventBody};
use uuid::Uuid;

use crate::error::AppError;

/// Append-only event log, strictly ordered per segment.
///
/// Append is the only mutation; no update or delete path exists. Sequence
/// numbers are assigned by the store and are gap-free — downstream context
/// reconstruction depends on that, so append failures always surface.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event to the segment and return it with its assigned
    /// sequence number. Appending to a sealed segment is an error.
    async fn append(&self, segment_id: Uuid, body: EventBody) -> Result<Event, AppError>;

    /// Read events in sequence order, optionally resuming after a known
    /// sequence number.
    async fn read(
        &self,
        segment_id: Uuid,
        after_sequence: Option<i64>,
    ) -> Result<Vec<Event>, AppError>;
}

#[derive(Clone)]
pub struct PgEventLog {
    db: sqlx::PgPool,
}

impl PgEventLog {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, segment_id: Uuid, body: EventBody) -> Result<Event, AppError> {
        let event_id = Uuid::now_v7();
        let body_json = serde_json::to_value(&body)
            .map_err(|e| AppError::Internal(format!("Failed to serialize event body: {e}")))?;

        let mut tx = self.db.begin().await?;

        // Bumping last_sequence takes the segment's row lock, which is what
        // serializes concurrent appenders and keeps sequences gap-free.
        // Sealed segments refuse the bump.
        let sequence_number: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE log_segments
            SET last_sequence = last_sequence + 1
            WHERE id = $1 AND sealed_at IS NULL
            RETURNING last_sequence
            "#,
        )
        .bind(segment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(sequence_number) = sequence_number else {
            return Err(AppError::Internal(format!(
                "segment {segment_id} is sealed or missing; cannot append"
            )));
        };

        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO log_events (id, segment_id, sequence_number, event_type, body)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, segment_id, sequence_number, event_type, body, created_at
            "#,
        )
        .bind(event_id)
        .bind(segment_id)
        .bind(sequence_number)
        .bind(body.kind())
        .bind(&body_json)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        row.into_event()
    }

    async fn read(
        &self,
        segment_id: Uuid,
        after_sequence: Option<i64>,
    ) -> Result<Vec<Event>, AppError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, segment_id, sequence_number, event_type, body, created_at
            FROM log_events
            WHERE segment_id = $1 AND sequence_number > $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(segment_id)
        .bind(after_sequence.unwrap_or(0))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(|r| r.into_event()).collect()
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub sequence_number: i64,
    #[allow(dead_code)]
    pub event_type: String,
    pub body: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    pub(crate) fn into_event(self) -> Result<Event, AppError> {
        let body: EventBody = serde_json::from_value(self.body)
            .map_err(|e| AppError::Internal(format!("Corrupt event body in log: {e}")))?;
        Ok(Event {
            id: self.id,
            segment_id: self.segment_id,
            sequence_number: self.sequence_number,
            body,
            created_at: self.created_at,
        })
    }
}
