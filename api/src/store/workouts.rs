use async_trait::async_trait;
use chrono::Utc;
use forma_core::commands::{Command, CommandAccepted};
use forma_core::workout::{CreateWorkoutRequest, WorkoutPayload, WorkoutSession, WorkoutStatus};
use uuid::Uuid;

use crate::error::AppError;

/// Persistence seam for the workout-session resource.
///
/// `persist_applied` is the optimistic-concurrency primitive: it commits
/// the patched resource, the version bump and the idempotency record in
/// one transaction, conditional on the version the caller based its edit
/// on. `false` means the condition failed and nothing was written.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    async fn create(
        &self,
        owner_id: Uuid,
        req: CreateWorkoutRequest,
    ) -> Result<WorkoutSession, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<WorkoutSession>, AppError>;

    /// Prior outcome for this (resource, command_id), if the command was
    /// already applied once.
    async fn stored_command_result(
        &self,
        workout_id: Uuid,
        command_id: &str,
    ) -> Result<Option<CommandAccepted>, AppError>;

    async fn persist_applied(
        &self,
        updated: &WorkoutSession,
        expected_version: i64,
        command: &Command,
    ) -> Result<bool, AppError>;

    /// Completed sessions within the trailing window, newest first. Feeds
    /// the workout_history knowledge source.
    async fn recent_completed(
        &self,
        owner_id: Uuid,
        days_back: i64,
    ) -> Result<Vec<WorkoutSession>, AppError>;
}

/// Apply one command to the resource.
///
/// Order is contractual: idempotency lookup first (a replayed command_id
/// returns the stored outcome unconditionally — no re-validation, no side
/// effects), then the optimistic version check, then command validation,
/// then the atomic write. The caller owns conflict recovery; the applier
/// never retries on its own.
pub async fn apply_command(
    store: &dyn WorkoutStore,
    workout_id: Uuid,
    cmd: &Command,
) -> Result<CommandAccepted, AppError> {
    if cmd.command_id.trim().is_empty() {
        return Err(AppError::Validation {
            message: "command_id must not be empty".to_string(),
            field: Some("command_id".to_string()),
            received: None,
            docs_hint: Some(
                "Generate a unique command_id per logical edit (e.g. a UUID). \
                 It makes retries safe: a replay returns the original outcome."
                    .to_string(),
            ),
        });
    }

    if let Some(stored) = store
        .stored_command_result(workout_id, &cmd.command_id)
        .await?
    {
        return Ok(stored);
    }

    let Some(current) = store.get(workout_id).await? else {
        return Err(AppError::NotFound {
            resource: "workout session",
        });
    };

    if cmd.expected_version != current.payload_version {
        return Err(AppError::Conflict {
            current_version: current.payload_version,
        });
    }

    let mut updated = current;
    cmd.command.apply(&mut updated, Utc::now())?;
    updated.payload_version += 1;

    if store
        .persist_applied(&updated, cmd.expected_version, cmd)
        .await?
    {
        return Ok(CommandAccepted {
            new_version: updated.payload_version,
        });
    }

    // Lost the write race. Either our own command_id landed concurrently
    // (return its stored outcome) or another writer advanced the version.
    if let Some(stored) = store
        .stored_command_result(workout_id, &cmd.command_id)
        .await?
    {
        return Ok(stored);
    }
    let current = store.get(workout_id).await?.ok_or(AppError::NotFound {
        resource: "workout session",
    })?;
    Err(AppError::Conflict {
        current_version: current.payload_version,
    })
}

#[derive(Clone)]
pub struct PgWorkoutStore {
    db: sqlx::PgPool,
}

impl PgWorkoutStore {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkoutStore for PgWorkoutStore {
    async fn create(
        &self,
        owner_id: Uuid,
        req: CreateWorkoutRequest,
    ) -> Result<WorkoutSession, AppError> {
        let payload = WorkoutPayload {
            title: req.title,
            exercises: req.exercises,
            notes: req.notes,
        };
        let payload_json = serde_json::to_value(&payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize payload: {e}")))?;

        let row = sqlx::query_as::<_, WorkoutRow>(
            r#"
            INSERT INTO workout_sessions (id, owner_id, status, payload, payload_version)
            VALUES ($1, $2, 'active', $3, 1)
            RETURNING id, owner_id, status, payload, payload_version, created_at, completed_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(owner_id)
        .bind(&payload_json)
        .fetch_one(&self.db)
        .await?;

        row.into_workout()
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkoutSession>, AppError> {
        let row = sqlx::query_as::<_, WorkoutRow>(
            r#"
            SELECT id, owner_id, status, payload, payload_version, created_at, completed_at
            FROM workout_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| r.into_workout()).transpose()
    }

    async fn stored_command_result(
        &self,
        workout_id: Uuid,
        command_id: &str,
    ) -> Result<Option<CommandAccepted>, AppError> {
        let result: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT result FROM workout_commands
            WHERE workout_session_id = $1 AND command_id = $2
            "#,
        )
        .bind(workout_id)
        .bind(command_id)
        .fetch_optional(&self.db)
        .await?;

        result
            .map(|v| {
                serde_json::from_value(v)
                    .map_err(|e| AppError::Internal(format!("Corrupt stored command result: {e}")))
            })
            .transpose()
    }

    async fn persist_applied(
        &self,
        updated: &WorkoutSession,
        expected_version: i64,
        command: &Command,
    ) -> Result<bool, AppError> {
        let payload_json = serde_json::to_value(&updated.payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize payload: {e}")))?;
        let result_json = serde_json::to_value(CommandAccepted {
            new_version: updated.payload_version,
        })
        .map_err(|e| AppError::Internal(format!("Failed to serialize command result: {e}")))?;

        let mut tx = self.db.begin().await?;

        // Conditional write: only lands if nobody advanced the version
        // since the caller read it.
        let rows = sqlx::query(
            r#"
            UPDATE workout_sessions
            SET status = $3, payload = $4, payload_version = $5, completed_at = $6
            WHERE id = $1 AND payload_version = $2
            "#,
        )
        .bind(updated.id)
        .bind(expected_version)
        .bind(updated.status.as_str())
        .bind(&payload_json)
        .bind(updated.payload_version)
        .bind(updated.completed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Ok(false);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO workout_commands (workout_session_id, command_id, result)
            VALUES ($1, $2, $3)
            ON CONFLICT (workout_session_id, command_id) DO NOTHING
            "#,
        )
        .bind(updated.id)
        .bind(&command.command_id)
        .bind(&result_json)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Same command_id landed concurrently; drop our write so the
            // caller picks up the stored outcome instead.
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn recent_completed(
        &self,
        owner_id: Uuid,
        days_back: i64,
    ) -> Result<Vec<WorkoutSession>, AppError> {
        let rows = sqlx::query_as::<_, WorkoutRow>(
            r#"
            SELECT id, owner_id, status, payload, payload_version, created_at, completed_at
            FROM workout_sessions
            WHERE owner_id = $1
              AND status = 'completed'
              AND completed_at >= now() - make_interval(days => $2::int)
            ORDER BY completed_at DESC
            LIMIT 50
            "#,
        )
        .bind(owner_id)
        .bind(days_back)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(|r| r.into_workout()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct WorkoutRow {
    id: Uuid,
    owner_id: Uuid,
    status: String,
    payload: serde_json::Value,
    payload_version: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WorkoutRow {
    fn into_workout(self) -> Result<WorkoutSession, AppError> {
        let status = WorkoutStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown workout status '{}' in store", self.status))
        })?;
        let payload: WorkoutPayload = serde_json::from_value(self.payload)
            .map_err(|e| AppError::Internal(format!("Corrupt workout payload: {e}")))?;
        Ok(WorkoutSession {
            id: self.id,
            owner_id: self.owner_id,
            status,
            payload,
            payload_version: self.payload_version,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryWorkoutStore;
    use forma_core::commands::CommandType;
    use forma_core::workout::Exercise;

    fn store_with_workout() -> (MemoryWorkoutStore, Uuid) {
        let store = MemoryWorkoutStore::new();
        let workout = store.seed(
            vec![
                Exercise {
                    name: "Bench Press".into(),
                    sets: 3,
                    reps: 8,
                    weight_kg: Some(80.0),
                    done: false,
                },
                Exercise {
                    name: "Overhead Press".into(),
                    sets: 3,
                    reps: 10,
                    weight_kg: Some(40.0),
                    done: false,
                },
            ],
            3,
        );
        (store, workout)
    }

    fn swap_cmd(command_id: &str, expected_version: i64) -> Command {
        Command {
            command_id: command_id.to_string(),
            expected_version,
            command: CommandType::SwapExercise {
                index: 0,
                new_exercise: Exercise {
                    name: "Incline DB Press".into(),
                    sets: 4,
                    reps: 10,
                    weight_kg: Some(30.0),
                    done: false,
                },
            },
            client_meta: None,
        }
    }

    #[tokio::test]
    async fn command_at_matching_version_advances_by_exactly_one() {
        let (store, id) = store_with_workout();
        let accepted = apply_command(&store, id, &swap_cmd("c1", 3)).await.unwrap();
        assert_eq!(accepted.new_version, 4);

        let workout = store.get(id).await.unwrap().unwrap();
        assert_eq!(workout.payload_version, 4);
        assert_eq!(workout.payload.exercises[0].name, "Incline DB Press");
    }

    #[tokio::test]
    async fn replayed_command_id_returns_original_outcome_without_reapplying() {
        let (store, id) = store_with_workout();
        let first = apply_command(&store, id, &swap_cmd("c1", 3)).await.unwrap();
        assert_eq!(first.new_version, 4);

        // Replay with arbitrary (even stale) arguments: stored outcome wins.
        let replay = apply_command(&store, id, &swap_cmd("c1", 3)).await.unwrap();
        assert_eq!(replay.new_version, 4);

        let workout = store.get(id).await.unwrap().unwrap();
        assert_eq!(workout.payload_version, 4, "version advanced once, not twice");
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_and_never_mutates() {
        let (store, id) = store_with_workout();
        apply_command(&store, id, &swap_cmd("c1", 3)).await.unwrap();

        let err = apply_command(&store, id, &swap_cmd("c2", 3))
            .await
            .unwrap_err();
        match err {
            AppError::Conflict { current_version } => assert_eq!(current_version, 4),
            other => panic!("expected conflict, got {other:?}"),
        }

        let workout = store.get(id).await.unwrap().unwrap();
        assert_eq!(workout.payload_version, 4, "resource unchanged by the stale command");
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_without_partial_mutation() {
        let (store, id) = store_with_workout();
        let cmd = Command {
            command_id: "c9".into(),
            expected_version: 3,
            command: CommandType::RemoveExercise { index: 99 },
            client_meta: None,
        };
        let err = apply_command(&store, id, &cmd).await.unwrap_err();
        assert!(matches!(err, AppError::CommandRejected { .. }));

        let workout = store.get(id).await.unwrap().unwrap();
        assert_eq!(workout.payload_version, 3);
        assert_eq!(workout.payload.exercises.len(), 2);
    }

    #[tokio::test]
    async fn rejected_command_stores_no_idempotency_record() {
        let (store, id) = store_with_workout();
        let cmd = Command {
            command_id: "c9".into(),
            expected_version: 3,
            command: CommandType::RemoveExercise { index: 99 },
            client_meta: None,
        };
        apply_command(&store, id, &cmd).await.unwrap_err();
        assert!(
            store
                .stored_command_result(id, "c9")
                .await
                .unwrap()
                .is_none()
        );
    }
}
