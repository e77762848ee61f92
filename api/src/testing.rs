//! In-memory doubles for the store and provider seams, used by unit tests
//! across the engine. They honor the same contracts as the Postgres
//! implementations: gap-free sequences, sealed-segment refusal,
//! conditional version writes, and idempotency records.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use forma_core::commands::{Command, CommandAccepted};
use forma_core::events::{Event, EventBody};
use forma_core::session::Session;
use forma_core::workout::{
    CreateWorkoutRequest, Exercise, WorkoutPayload, WorkoutSession, WorkoutStatus,
};
use uuid::Uuid;

use crate::engine::context::ProviderPrompt;
use crate::engine::provider::{ActionChoice, CompletionProvider, ProviderError};
use crate::engine::registry::ToolDefinition;
use crate::error::AppError;
use crate::store::event_log::EventLog;
use crate::store::sessions::SessionStore;
use crate::store::workouts::WorkoutStore;

#[derive(Default)]
struct SegmentState {
    session_id: Uuid,
    segment_index: i64,
    sealed: bool,
    events: Vec<Event>,
}

#[derive(Default)]
struct BackendInner {
    sessions: HashMap<Uuid, Session>,
    segments: HashMap<Uuid, SegmentState>,
}

/// Combined in-memory event log + session store sharing one state, so
/// rollover can seal and reopen segments atomically like Postgres does.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<BackendInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_count(&self, session_id: Uuid) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .segments
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }
}

#[async_trait]
impl EventLog for MemoryBackend {
    async fn append(&self, segment_id: Uuid, body: EventBody) -> Result<Event, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let segment = inner.segments.get_mut(&segment_id).ok_or_else(|| {
            AppError::Internal(format!("segment {segment_id} is sealed or missing; cannot append"))
        })?;
        if segment.sealed {
            return Err(AppError::Internal(format!(
                "segment {segment_id} is sealed or missing; cannot append"
            )));
        }
        let event = Event {
            id: Uuid::now_v7(),
            segment_id,
            sequence_number: segment.events.len() as i64 + 1,
            body,
            created_at: Utc::now(),
        };
        segment.events.push(event.clone());
        Ok(event)
    }

    async fn read(
        &self,
        segment_id: Uuid,
        after_sequence: Option<i64>,
    ) -> Result<Vec<Event>, AppError> {
        let inner = self.inner.lock().unwrap();
        let segment = inner
            .segments
            .get(&segment_id)
            .ok_or_else(|| AppError::Internal(format!("unknown segment {segment_id}")))?;
        let after = after_sequence.unwrap_or(0);
        Ok(segment
            .events
            .iter()
            .filter(|e| e.sequence_number > after)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryBackend {
    async fn create(
        &self,
        owner_id: Uuid,
        workout_session_id: Option<Uuid>,
    ) -> Result<Session, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let session_id = Uuid::now_v7();
        let segment_id = Uuid::now_v7();
        inner.segments.insert(
            segment_id,
            SegmentState {
                session_id,
                segment_index: 0,
                sealed: false,
                events: Vec::new(),
            },
        );
        let session = Session {
            id: session_id,
            owner_id,
            current_segment_id: segment_id,
            workout_session_id,
            created_at: Utc::now(),
        };
        inner.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.inner.lock().unwrap().sessions.get(&id).cloned())
    }

    async fn link_workout(&self, session_id: Uuid, workout_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::Internal(format!("unknown session {session_id}")))?;
        session.workout_session_id = Some(workout_id);
        Ok(())
    }

    async fn rollover(
        &self,
        session_id: Uuid,
        first_events: Vec<EventBody>,
    ) -> Result<Session, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("unknown session {session_id}")))?;

        let old_index = {
            let old = inner
                .segments
                .get_mut(&session.current_segment_id)
                .ok_or_else(|| {
                    AppError::Internal(format!("session {session_id} has no active segment to seal"))
                })?;
            old.sealed = true;
            old.segment_index
        };

        let new_segment_id = Uuid::now_v7();
        let events = first_events
            .into_iter()
            .enumerate()
            .map(|(i, body)| Event {
                id: Uuid::now_v7(),
                segment_id: new_segment_id,
                sequence_number: i as i64 + 1,
                body,
                created_at: Utc::now(),
            })
            .collect::<Vec<_>>();
        inner.segments.insert(
            new_segment_id,
            SegmentState {
                session_id,
                segment_index: old_index + 1,
                sealed: false,
                events,
            },
        );

        let session = inner.sessions.get_mut(&session_id).expect("checked above");
        session.current_segment_id = new_segment_id;
        Ok(session.clone())
    }
}

#[derive(Default)]
struct WorkoutInner {
    workouts: HashMap<Uuid, WorkoutSession>,
    commands: HashMap<(Uuid, String), CommandAccepted>,
}

#[derive(Default)]
pub struct MemoryWorkoutStore {
    inner: Mutex<WorkoutInner>,
}

impl MemoryWorkoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a workout at a given version and return its id.
    pub fn seed(&self, exercises: Vec<Exercise>, payload_version: i64) -> Uuid {
        let id = Uuid::now_v7();
        let workout = WorkoutSession {
            id,
            owner_id: Uuid::now_v7(),
            status: WorkoutStatus::Active,
            payload: WorkoutPayload {
                title: "Push day".into(),
                exercises,
                notes: None,
            },
            payload_version,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.inner.lock().unwrap().workouts.insert(id, workout);
        id
    }
}

#[async_trait]
impl WorkoutStore for MemoryWorkoutStore {
    async fn create(
        &self,
        owner_id: Uuid,
        req: CreateWorkoutRequest,
    ) -> Result<WorkoutSession, AppError> {
        let workout = WorkoutSession {
            id: Uuid::now_v7(),
            owner_id,
            status: WorkoutStatus::Active,
            payload: WorkoutPayload {
                title: req.title,
                exercises: req.exercises,
                notes: req.notes,
            },
            payload_version: 1,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.inner
            .lock()
            .unwrap()
            .workouts
            .insert(workout.id, workout.clone());
        Ok(workout)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkoutSession>, AppError> {
        Ok(self.inner.lock().unwrap().workouts.get(&id).cloned())
    }

    async fn stored_command_result(
        &self,
        workout_id: Uuid,
        command_id: &str,
    ) -> Result<Option<CommandAccepted>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .commands
            .get(&(workout_id, command_id.to_string()))
            .copied())
    }

    async fn persist_applied(
        &self,
        updated: &WorkoutSession,
        expected_version: i64,
        command: &Command,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (updated.id, command.command_id.clone());
        if inner.commands.contains_key(&key) {
            return Ok(false);
        }
        match inner.workouts.get_mut(&updated.id) {
            Some(current) if current.payload_version == expected_version => {
                *current = updated.clone();
            }
            _ => return Ok(false),
        }
        inner.commands.insert(
            key,
            CommandAccepted {
                new_version: updated.payload_version,
            },
        );
        Ok(true)
    }

    async fn recent_completed(
        &self,
        owner_id: Uuid,
        days_back: i64,
    ) -> Result<Vec<WorkoutSession>, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(days_back);
        let mut sessions: Vec<WorkoutSession> = self
            .inner
            .lock()
            .unwrap()
            .workouts
            .values()
            .filter(|w| {
                w.owner_id == owner_id
                    && w.status == WorkoutStatus::Completed
                    && w.completed_at.is_some_and(|t| t >= cutoff)
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|w| std::cmp::Reverse(w.completed_at));
        Ok(sessions)
    }
}

/// Provider double driven by a script of responses. An exhausted script
/// with no fallback is a protocol error, which keeps misbehaving tests
/// loud instead of hanging.
#[derive(Default)]
pub struct ScriptedProvider {
    choices: Mutex<VecDeque<Result<ActionChoice, ProviderError>>>,
    fallback_choice: Option<ActionChoice>,
    summary: Option<String>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn push_choice(self, tool: &str, arguments: serde_json::Value) -> Self {
        self.choices
            .lock()
            .unwrap()
            .push_back(Ok(ActionChoice {
                tool: tool.to_string(),
                arguments,
            }));
        self
    }

    pub fn push_error(self, err: ProviderError) -> Self {
        self.choices.lock().unwrap().push_back(Err(err));
        self
    }

    /// Every unscripted call returns this choice, forever.
    pub fn repeating(tool: &str, arguments: serde_json::Value) -> Self {
        Self {
            fallback_choice: Some(ActionChoice {
                tool: tool.to_string(),
                arguments,
            }),
            ..Self::default()
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn choose_action(
        &self,
        _prompt: &ProviderPrompt,
        _tools: &[ToolDefinition],
    ) -> Result<ActionChoice, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.choices.lock().unwrap().pop_front() {
            return scripted;
        }
        self.fallback_choice
            .clone()
            .ok_or_else(|| ProviderError::Protocol("scripted provider exhausted".to_string()))
    }

    async fn summarize(&self, _transcript: &str) -> Result<String, ProviderError> {
        self.summary
            .clone()
            .ok_or_else(|| ProviderError::Transport("no summary scripted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_assign_gap_free_sequences_and_never_rewrite_history() {
        let backend = MemoryBackend::new();
        let session = backend.create(Uuid::now_v7(), None).await.unwrap();
        let segment = session.current_segment_id;

        for i in 0..3 {
            backend
                .append(segment, EventBody::UserMessage { text: format!("m{i}") })
                .await
                .unwrap();
        }

        let first_read = backend.read(segment, None).await.unwrap();
        let sequences: Vec<i64> = first_read.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        // Later appends extend the log; everything already read back is
        // unchanged, by id, position and payload.
        backend
            .append(segment, EventBody::UserMessage { text: "m3".into() })
            .await
            .unwrap();
        let second_read = backend.read(segment, None).await.unwrap();
        assert_eq!(second_read.len(), 4);
        for (before, after) in first_read.iter().zip(second_read.iter()) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.sequence_number, after.sequence_number);
            assert_eq!(
                serde_json::to_value(&before.body).unwrap(),
                serde_json::to_value(&after.body).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn reads_restart_from_any_sequence() {
        let backend = MemoryBackend::new();
        let session = backend.create(Uuid::now_v7(), None).await.unwrap();
        let segment = session.current_segment_id;

        for i in 0..5 {
            backend
                .append(segment, EventBody::UserMessage { text: format!("m{i}") })
                .await
                .unwrap();
        }

        let tail = backend.read(segment, Some(3)).await.unwrap();
        let sequences: Vec<i64> = tail.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![4, 5]);
    }
}
