use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::workout::{Exercise, WorkoutSession, WorkoutStatus};

/// A request to mutate the workout-session resource. Commands are the only
/// write path: agent tools, HTTP clients and background jobs all submit
/// these through the applier, never a direct update.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Command {
    /// Client-supplied idempotency key. Replaying a previously seen
    /// command_id returns the original outcome without reapplying.
    pub command_id: String,
    /// The payload_version the client last read. A stale value is rejected
    /// with a conflict, not silently merged.
    pub expected_version: i64,
    #[serde(flatten)]
    pub command: CommandType,
    /// Opaque client context (device, app build). Stored with the
    /// idempotency record, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_meta: Option<serde_json::Value>,
}

/// Typed command vocabulary. Unknown or malformed shapes fail serde
/// validation before any applier logic runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum CommandType {
    /// Replace the exercise at `index` with a new one
    SwapExercise { index: usize, new_exercise: Exercise },
    /// Insert an exercise, at `position` or at the end
    AddExercise {
        exercise: Exercise,
        #[serde(default)]
        position: Option<usize>,
    },
    RemoveExercise { index: usize },
    /// Adjust sets/reps/weight of the exercise at `index`. At least one
    /// field must be present.
    UpdateExercise {
        index: usize,
        #[serde(default)]
        sets: Option<u32>,
        #[serde(default)]
        reps: Option<u32>,
        #[serde(default)]
        weight_kg: Option<f64>,
    },
    MarkExerciseDone { index: usize, done: bool },
    CompleteSession,
    StopSession,
}

impl CommandType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::SwapExercise { .. } => "swap_exercise",
            CommandType::AddExercise { .. } => "add_exercise",
            CommandType::RemoveExercise { .. } => "remove_exercise",
            CommandType::UpdateExercise { .. } => "update_exercise",
            CommandType::MarkExerciseDone { .. } => "mark_exercise_done",
            CommandType::CompleteSession => "complete_session",
            CommandType::StopSession => "stop_session",
        }
    }
}

/// Outcome stored in the idempotency table and returned to the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct CommandAccepted {
    pub new_version: i64,
}

/// Command-specific invariant violations. These map to 422 at the HTTP
/// boundary and are never retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("exercise index {index} is out of bounds (list has {len} entries)")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("insert position {position} is out of bounds (list has {len} entries)")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("exercise name must not be empty")]
    EmptyExerciseName,
    #[error("update_exercise requires at least one of sets, reps, weight_kg")]
    EmptyUpdate,
    #[error("workout session is {status}, commands require an active session")]
    NotActive { status: &'static str },
}

impl CommandType {
    /// Validate and apply this command to the resource in place.
    ///
    /// All checks run before the first mutation, so a rejected command
    /// leaves the resource untouched. Version bookkeeping belongs to the
    /// applier, not here.
    pub fn apply(&self, workout: &mut WorkoutSession, now: DateTime<Utc>) -> Result<(), PatchError> {
        if workout.status != WorkoutStatus::Active {
            return Err(PatchError::NotActive {
                status: workout.status.as_str(),
            });
        }

        let len = workout.payload.exercises.len();
        match self {
            CommandType::SwapExercise { index, new_exercise } => {
                if *index >= len {
                    return Err(PatchError::IndexOutOfBounds { index: *index, len });
                }
                if new_exercise.name.trim().is_empty() {
                    return Err(PatchError::EmptyExerciseName);
                }
                workout.payload.exercises[*index] = new_exercise.clone();
            }
            CommandType::AddExercise { exercise, position } => {
                if exercise.name.trim().is_empty() {
                    return Err(PatchError::EmptyExerciseName);
                }
                match position {
                    Some(pos) if *pos > len => {
                        return Err(PatchError::PositionOutOfBounds { position: *pos, len });
                    }
                    Some(pos) => workout.payload.exercises.insert(*pos, exercise.clone()),
                    None => workout.payload.exercises.push(exercise.clone()),
                }
            }
            CommandType::RemoveExercise { index } => {
                if *index >= len {
                    return Err(PatchError::IndexOutOfBounds { index: *index, len });
                }
                workout.payload.exercises.remove(*index);
            }
            CommandType::UpdateExercise {
                index,
                sets,
                reps,
                weight_kg,
            } => {
                if *index >= len {
                    return Err(PatchError::IndexOutOfBounds { index: *index, len });
                }
                if sets.is_none() && reps.is_none() && weight_kg.is_none() {
                    return Err(PatchError::EmptyUpdate);
                }
                let exercise = &mut workout.payload.exercises[*index];
                if let Some(sets) = sets {
                    exercise.sets = *sets;
                }
                if let Some(reps) = reps {
                    exercise.reps = *reps;
                }
                if let Some(weight_kg) = weight_kg {
                    exercise.weight_kg = Some(*weight_kg);
                }
            }
            CommandType::MarkExerciseDone { index, done } => {
                if *index >= len {
                    return Err(PatchError::IndexOutOfBounds { index: *index, len });
                }
                workout.payload.exercises[*index].done = *done;
            }
            CommandType::CompleteSession => {
                workout.status = WorkoutStatus::Completed;
                workout.completed_at = Some(now);
            }
            CommandType::StopSession => {
                workout.status = WorkoutStatus::Stopped;
                workout.completed_at = Some(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workout::WorkoutPayload;
    use uuid::Uuid;

    fn workout(exercises: Vec<Exercise>) -> WorkoutSession {
        WorkoutSession {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            status: WorkoutStatus::Active,
            payload: WorkoutPayload {
                title: "Push day".into(),
                exercises,
                notes: None,
            },
            payload_version: 3,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn bench() -> Exercise {
        Exercise {
            name: "Bench Press".into(),
            sets: 3,
            reps: 8,
            weight_kg: Some(80.0),
            done: false,
        }
    }

    fn rows() -> Exercise {
        Exercise {
            name: "Barbell Row".into(),
            sets: 3,
            reps: 10,
            weight_kg: Some(60.0),
            done: false,
        }
    }

    #[test]
    fn swap_replaces_exactly_one_slot() {
        let mut w = workout(vec![bench(), rows()]);
        let cmd = CommandType::SwapExercise {
            index: 0,
            new_exercise: Exercise {
                name: "Incline DB Press".into(),
                sets: 4,
                reps: 10,
                weight_kg: Some(30.0),
                done: false,
            },
        };
        cmd.apply(&mut w, Utc::now()).unwrap();
        assert_eq!(w.payload.exercises[0].name, "Incline DB Press");
        assert_eq!(w.payload.exercises[1], rows());
    }

    #[test]
    fn out_of_bounds_index_rejects_without_mutation() {
        let mut w = workout(vec![bench()]);
        let before = w.payload.clone();
        let err = CommandType::RemoveExercise { index: 5 }
            .apply(&mut w, Utc::now())
            .unwrap_err();
        assert_eq!(err, PatchError::IndexOutOfBounds { index: 5, len: 1 });
        assert_eq!(w.payload, before);
    }

    #[test]
    fn add_respects_position_bounds() {
        let mut w = workout(vec![bench()]);
        CommandType::AddExercise {
            exercise: rows(),
            position: Some(0),
        }
        .apply(&mut w, Utc::now())
        .unwrap();
        assert_eq!(w.payload.exercises[0].name, "Barbell Row");

        let err = CommandType::AddExercise {
            exercise: rows(),
            position: Some(9),
        }
        .apply(&mut w, Utc::now())
        .unwrap_err();
        assert!(matches!(err, PatchError::PositionOutOfBounds { .. }));
    }

    #[test]
    fn update_requires_at_least_one_field() {
        let mut w = workout(vec![bench()]);
        let err = CommandType::UpdateExercise {
            index: 0,
            sets: None,
            reps: None,
            weight_kg: None,
        }
        .apply(&mut w, Utc::now())
        .unwrap_err();
        assert_eq!(err, PatchError::EmptyUpdate);

        CommandType::UpdateExercise {
            index: 0,
            sets: Some(5),
            reps: None,
            weight_kg: None,
        }
        .apply(&mut w, Utc::now())
        .unwrap();
        assert_eq!(w.payload.exercises[0].sets, 5);
        assert_eq!(w.payload.exercises[0].reps, 8);
    }

    #[test]
    fn completed_session_refuses_further_commands() {
        let mut w = workout(vec![bench()]);
        CommandType::CompleteSession.apply(&mut w, Utc::now()).unwrap();
        assert_eq!(w.status, WorkoutStatus::Completed);
        assert!(w.completed_at.is_some());

        let err = CommandType::MarkExerciseDone { index: 0, done: true }
            .apply(&mut w, Utc::now())
            .unwrap_err();
        assert_eq!(err, PatchError::NotActive { status: "completed" });
    }

    #[test]
    fn command_envelope_parses_tagged_type() {
        let cmd: Command = serde_json::from_value(serde_json::json!({
            "command_id": "c1",
            "expected_version": 3,
            "command_type": "swap_exercise",
            "index": 0,
            "new_exercise": {"name": "Goblet Squat", "sets": 3, "reps": 12}
        }))
        .unwrap();
        assert_eq!(cmd.command.name(), "swap_exercise");
        assert_eq!(cmd.expected_version, 3);
    }

    #[test]
    fn unknown_command_type_fails_at_the_serde_boundary() {
        let parsed: Result<Command, _> = serde_json::from_value(serde_json::json!({
            "command_id": "c2",
            "expected_version": 1,
            "command_type": "teleport_exercise",
            "index": 0
        }));
        assert!(parsed.is_err());
    }
}
