use uuid::Uuid;

use crate::error::AppError;

/// Slow-changing athlete facts rendered into the stable prompt prefix.
/// Absent profiles read as an empty object, so new owners work immediately.
#[derive(Clone)]
pub struct PgProfileStore {
    db: sqlx::PgPool,
}

impl PgProfileStore {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }

    pub async fn facts(&self, owner_id: Uuid) -> Result<serde_json::Value, AppError> {
        let facts: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT facts FROM profiles WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(facts.unwrap_or_else(|| serde_json::json!({})))
    }

    pub async fn upsert(
        &self,
        owner_id: Uuid,
        facts: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let stored: serde_json::Value = sqlx::query_scalar(
            r#"
            INSERT INTO profiles (owner_id, facts, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (owner_id) DO UPDATE SET facts = $2, updated_at = now()
            RETURNING facts
            "#,
        )
        .bind(owner_id)
        .bind(&facts)
        .fetch_one(&self.db)
        .await?;
        Ok(stored)
    }
}
