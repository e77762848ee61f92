use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One continuous conversation. Never deleted — on checkpoint the active
/// segment is sealed and `current_segment_id` advances to a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// The single appendable segment for this session
    pub current_segment_id: Uuid,
    /// Durable link to the workout-session resource this conversation is
    /// editing, if one exists. Persisted so any process instance can resume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A bounded run of events belonging to one session. Exactly one segment
/// per session is appendable at a time; sealed segments are read-only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogSegment {
    pub id: Uuid,
    pub session_id: Uuid,
    /// 0-based position in the session's segment chain
    pub segment_index: i64,
    /// Highest sequence number assigned so far
    pub last_sequence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LogSegment {
    pub fn is_sealed(&self) -> bool {
        self.sealed_at.is_some()
    }
}

/// Request to start a new conversation session
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Attach the conversation to an existing workout session, if the
    /// client already knows which one it is editing.
    #[serde(default)]
    pub workout_session_id: Option<Uuid>,
}

/// Request to run one agent turn against a session
#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    /// The user's utterance, free-form
    pub text: String,
}
