use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a workout session. Mutation commands are only accepted
/// while the session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutStatus {
    Active,
    Completed,
    Stopped,
}

impl WorkoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkoutStatus::Active => "active",
            WorkoutStatus::Completed => "completed",
            WorkoutStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(WorkoutStatus::Active),
            "completed" => Some(WorkoutStatus::Completed),
            "stopped" => Some(WorkoutStatus::Stopped),
            _ => None,
        }
    }
}

/// One exercise slot in the workout payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Exercise {
    /// Display name (e.g. "Barbell Bench Press")
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    /// Whether the user has finished this exercise
    #[serde(default)]
    pub done: bool,
}

/// The structured exercise list the agent and the client both edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkoutPayload {
    pub title: String,
    pub exercises: Vec<Exercise>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The mutable workout-session resource. `payload_version` increases by
/// exactly 1 on every accepted command; no mutation skips or reuses a
/// version, which is what makes optimistic concurrency checkable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkoutSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: WorkoutStatus,
    pub payload: WorkoutPayload,
    pub payload_version: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a new workout session resource
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWorkoutRequest {
    pub title: String,
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub notes: Option<String>,
}
