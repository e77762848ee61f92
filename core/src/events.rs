use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A single record in a session's event log. Events are immutable — once
/// appended, never changed or reordered. The log is the only place
/// causality is recorded; everything the provider sees is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Unique event ID (UUIDv7 — time-sortable)
    pub id: Uuid,
    /// Segment this event belongs to
    pub segment_id: Uuid,
    /// Position within the segment. Monotonic, gap-free, assigned by the store.
    pub sequence_number: i64,
    /// Typed event payload
    pub body: EventBody,
    /// Server-side append time
    pub created_at: DateTime<Utc>,
}

/// The closed vocabulary of things that can happen in a session.
/// The engine dispatches on these variants; unknown shapes are rejected
/// at the serde boundary rather than trusted downstream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// An inbound utterance from the user
    UserMessage { text: String },
    /// External data pulled into the context. Appended once, never revised.
    Knowledge {
        source: String,
        params: serde_json::Value,
        data: serde_json::Value,
    },
    /// A scoped widening of previously appended knowledge (e.g. a larger
    /// date range). Appended alongside the original, never an in-place edit.
    KnowledgeUpdate {
        source: String,
        params: serde_json::Value,
        data: serde_json::Value,
    },
    /// A tool the provider chose, with its validated arguments
    Action {
        tool: String,
        arguments: serde_json::Value,
        iteration: u32,
    },
    /// Outcome of the paired action, success or failure
    Result {
        tool: String,
        success: bool,
        output: serde_json::Value,
    },
    /// Synthesized compaction marker. Always the first event of a fresh
    /// segment; carries the summary of the sealed segment's transcript.
    CheckpointSummary {
        text: String,
        carried_from_segment: Uuid,
    },
}

impl EventBody {
    /// Stable type string, stored in the `event_type` column and used as
    /// the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::UserMessage { .. } => "user_message",
            EventBody::Knowledge { .. } => "knowledge",
            EventBody::KnowledgeUpdate { .. } => "knowledge_update",
            EventBody::Action { .. } => "action",
            EventBody::Result { .. } => "result",
            EventBody::CheckpointSummary { .. } => "checkpoint_summary",
        }
    }

    /// Knowledge events survive checkpoints verbatim; transcript events
    /// get summarized away.
    pub fn is_knowledge(&self) -> bool {
        matches!(
            self,
            EventBody::Knowledge { .. } | EventBody::KnowledgeUpdate { .. }
        )
    }

    pub fn is_transcript(&self) -> bool {
        matches!(
            self,
            EventBody::UserMessage { .. } | EventBody::Action { .. } | EventBody::Result { .. }
        )
    }
}

/// Cursor-based pagination
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T: Serialize> {
    pub data: Vec<T>,
    /// Cursor for the next page. None if this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Whether there are more results after this page
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_body_round_trips_through_tagged_json() {
        let body = EventBody::Action {
            tool: "update_workout".to_string(),
            arguments: serde_json::json!({"command_type": "remove_exercise", "index": 2}),
            iteration: 3,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "action");
        let back: EventBody = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), "action");
    }

    #[test]
    fn kind_matches_serde_tag_for_every_variant() {
        let bodies = vec![
            EventBody::UserMessage {
                text: "hi".into(),
            },
            EventBody::Knowledge {
                source: "workout_history".into(),
                params: serde_json::json!({"days_back": 7}),
                data: serde_json::json!([]),
            },
            EventBody::KnowledgeUpdate {
                source: "workout_history".into(),
                params: serde_json::json!({"days_back": 30}),
                data: serde_json::json!([]),
            },
            EventBody::Action {
                tool: "idle".into(),
                arguments: serde_json::json!({}),
                iteration: 1,
            },
            EventBody::Result {
                tool: "idle".into(),
                success: true,
                output: serde_json::json!({}),
            },
            EventBody::CheckpointSummary {
                text: "so far".into(),
                carried_from_segment: Uuid::now_v7(),
            },
        ];
        for body in bodies {
            let json = serde_json::to_value(&body).unwrap();
            assert_eq!(json["type"], body.kind());
        }
    }

    #[test]
    fn knowledge_and_transcript_partition_the_vocabulary() {
        let knowledge = EventBody::Knowledge {
            source: "active_workout".into(),
            params: serde_json::json!({}),
            data: serde_json::json!({}),
        };
        let transcript = EventBody::UserMessage { text: "hey".into() };
        let marker = EventBody::CheckpointSummary {
            text: "s".into(),
            carried_from_segment: Uuid::now_v7(),
        };
        assert!(knowledge.is_knowledge() && !knowledge.is_transcript());
        assert!(transcript.is_transcript() && !transcript.is_knowledge());
        assert!(!marker.is_knowledge() && !marker.is_transcript());
    }
}
