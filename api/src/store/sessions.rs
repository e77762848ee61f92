use async_trait::async_trait;
use forma_core::events::EventBody;
use forma_core::session::Session;
use uuid::Uuid;

use crate::error::AppError;

/// Conversation sessions and their segment chain.
///
/// The session row carries the durable `session -> workout` link; no
/// process-local map of "current workout per chat" exists anywhere, so any
/// instance can resume any session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        owner_id: Uuid,
        workout_session_id: Option<Uuid>,
    ) -> Result<Session, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// Record which workout-session resource this conversation is editing.
    async fn link_workout(&self, session_id: Uuid, workout_id: Uuid) -> Result<(), AppError>;

    /// Checkpoint rollover: seal the active segment, open the next one, and
    /// write `first_events` (checkpoint summary first, then carried
    /// knowledge) as its opening events — all in one transaction, so a
    /// failed rollover leaves the session untouched on its old segment.
    async fn rollover(
        &self,
        session_id: Uuid,
        first_events: Vec<EventBody>,
    ) -> Result<Session, AppError>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: sqlx::PgPool,
}

impl PgSessionStore {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        owner_id: Uuid,
        workout_session_id: Option<Uuid>,
    ) -> Result<Session, AppError> {
        let session_id = Uuid::now_v7();
        let segment_id = Uuid::now_v7();

        let mut tx = self.db.begin().await?;

        // The FK between sessions and log_segments points both ways
        // logically; insert the session first, then its first segment.
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, owner_id, current_segment_id, workout_session_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner_id, current_segment_id, workout_session_id, created_at
            "#,
        )
        .bind(session_id)
        .bind(owner_id)
        .bind(segment_id)
        .bind(workout_session_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO log_segments (id, session_id, segment_index)
            VALUES ($1, $2, 0)
            "#,
        )
        .bind(segment_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_session())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, owner_id, current_segment_id, workout_session_id, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| r.into_session()))
    }

    async fn link_workout(&self, session_id: Uuid, workout_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE sessions SET workout_session_id = $2 WHERE id = $1")
            .bind(session_id)
            .bind(workout_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn rollover(
        &self,
        session_id: Uuid,
        first_events: Vec<EventBody>,
    ) -> Result<Session, AppError> {
        let mut tx = self.db.begin().await?;

        // Seal the active segment and learn its index. The row lock on the
        // segment also fences out concurrent appends during the rollover.
        let sealed: Option<(Uuid, i64)> = sqlx::query_as(
            r#"
            UPDATE log_segments
            SET sealed_at = now()
            WHERE id = (SELECT current_segment_id FROM sessions WHERE id = $1)
              AND sealed_at IS NULL
            RETURNING id, segment_index
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((_, old_index)) = sealed else {
            return Err(AppError::Internal(format!(
                "session {session_id} has no active segment to seal"
            )));
        };

        let new_segment_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO log_segments (id, session_id, segment_index, last_sequence)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(new_segment_id)
        .bind(session_id)
        .bind(old_index + 1)
        .bind(first_events.len() as i64)
        .execute(&mut *tx)
        .await?;

        for (i, body) in first_events.iter().enumerate() {
            let body_json = serde_json::to_value(body)
                .map_err(|e| AppError::Internal(format!("Failed to serialize event body: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO log_events (id, segment_id, sequence_number, event_type, body)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(new_segment_id)
            .bind((i + 1) as i64)
            .bind(body.kind())
            .bind(&body_json)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE sessions
            SET current_segment_id = $2
            WHERE id = $1
            RETURNING id, owner_id, current_segment_id, workout_session_id, created_at
            "#,
        )
        .bind(session_id)
        .bind(new_segment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_session())
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    owner_id: Uuid,
    current_segment_id: Uuid,
    workout_session_id: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session {
            id: self.id,
            owner_id: self.owner_id,
            current_segment_id: self.current_segment_id,
            workout_session_id: self.workout_session_id,
            created_at: self.created_at,
        }
    }
}
