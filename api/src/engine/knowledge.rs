use forma_core::events::{Event, EventBody};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::workouts::WorkoutStore;

pub const SOURCE_WORKOUT_HISTORY: &str = "workout_history";
pub const SOURCE_ACTIVE_WORKOUT: &str = "active_workout";
pub const SOURCE_EXERCISE_CATALOG: &str = "exercise_catalog";

const MUSCLE_GROUPS: &[&str] = &["chest", "back", "legs", "shoulders", "arms", "core"];

/// Small built-in movement catalog per muscle group. Real exercise
/// selection lives outside the core; the coach only needs candidate names.
const CATALOG: &[(&str, &[&str])] = &[
    (
        "chest",
        &["Barbell Bench Press", "Incline DB Press", "Cable Fly", "Dips"],
    ),
    (
        "back",
        &["Deadlift", "Barbell Row", "Lat Pulldown", "Seated Cable Row"],
    ),
    (
        "legs",
        &["Back Squat", "Romanian Deadlift", "Leg Press", "Walking Lunge"],
    ),
    (
        "shoulders",
        &["Overhead Press", "Lateral Raise", "Face Pull"],
    ),
    ("arms", &["Barbell Curl", "Triceps Pushdown", "Hammer Curl"]),
    ("core", &["Plank", "Hanging Leg Raise", "Ab Wheel Rollout"]),
];

/// A (source, params) pair already present in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgePresence {
    pub source: String,
    pub params: Value,
}

/// One fetch the selector wants appended this turn.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeRequest {
    pub source: &'static str,
    pub params: Value,
    pub reason: &'static str,
    /// True when this widens an already-present source, in which case it
    /// is appended as a knowledge_update rather than fresh knowledge.
    pub widens: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct SelectionPlan {
    pub append: Vec<KnowledgeRequest>,
    pub reuse: Vec<&'static str>,
}

/// Collect the (source, params) pairs already satisfied by the segment.
pub fn presence(events: &[Event]) -> Vec<KnowledgePresence> {
    events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::Knowledge { source, params, .. }
            | EventBody::KnowledgeUpdate { source, params, .. } => Some(KnowledgePresence {
                source: source.clone(),
                params: params.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Decide which external data to fetch for this turn, given what is
/// already present. Pure: never revises prior knowledge, only proposes
/// appends. The selector is an optimization — a wrong answer degrades the
/// prompt, it never blocks the loop.
pub fn select(
    user_message: &str,
    linked_workout: Option<(Uuid, i64)>,
    present: &[KnowledgePresence],
) -> SelectionPlan {
    let message = user_message.to_lowercase();
    let mut plan = SelectionPlan::default();

    // History horizon widens when the athlete asks about longer arcs.
    let days_back: i64 = if ["month", "progress", "trend", "lately"]
        .iter()
        .any(|w| message.contains(w))
    {
        30
    } else {
        7
    };
    consider(
        &mut plan,
        present,
        SOURCE_WORKOUT_HISTORY,
        json!({ "days_back": days_back }),
        "recent training grounds every coaching reply",
    );

    // The current payload at its current version; a newer version is not
    // covered by an older snapshot, so edits force a refetch.
    if let Some((_, version)) = linked_workout {
        consider(
            &mut plan,
            present,
            SOURCE_ACTIVE_WORKOUT,
            json!({ "version": version }),
            "the conversation edits this workout session",
        );
    }

    if let Some(group) = MUSCLE_GROUPS.iter().find(|g| message.contains(**g)) {
        consider(
            &mut plan,
            present,
            SOURCE_EXERCISE_CATALOG,
            json!({ "muscle_group": group }),
            "athlete named a muscle group",
        );
    }

    plan
}

fn consider(
    plan: &mut SelectionPlan,
    present: &[KnowledgePresence],
    source: &'static str,
    params: Value,
    reason: &'static str,
) {
    let same_source: Vec<&KnowledgePresence> =
        present.iter().filter(|p| p.source == source).collect();

    if same_source.iter().any(|p| covers(source, &p.params, &params)) {
        plan.reuse.push(source);
        return;
    }

    plan.append.push(KnowledgeRequest {
        source,
        params,
        reason,
        widens: !same_source.is_empty(),
    });
}

/// Equal-or-wider coverage, per source. Numeric horizons widen with >=;
/// categorical params must match exactly. Unknown sources never cover, so
/// the selector errs toward fetching.
fn covers(source: &str, present: &Value, wanted: &Value) -> bool {
    match source {
        SOURCE_WORKOUT_HISTORY => {
            let have = present["days_back"].as_i64().unwrap_or(0);
            let want = wanted["days_back"].as_i64().unwrap_or(i64::MAX);
            have >= want
        }
        SOURCE_ACTIVE_WORKOUT => {
            let have = present["version"].as_i64().unwrap_or(0);
            let want = wanted["version"].as_i64().unwrap_or(i64::MAX);
            have >= want
        }
        SOURCE_EXERCISE_CATALOG => present["muscle_group"] == wanted["muscle_group"],
        _ => false,
    }
}

/// Fetch the data for one selected request. Store failures bubble up;
/// the caller decides whether a missed fetch degrades or aborts.
pub async fn fetch(
    workouts: &dyn WorkoutStore,
    owner_id: Uuid,
    linked_workout: Option<Uuid>,
    request: &KnowledgeRequest,
) -> Result<Value, AppError> {
    match request.source {
        SOURCE_WORKOUT_HISTORY => {
            let days_back = request.params["days_back"].as_i64().unwrap_or(7);
            let sessions = workouts.recent_completed(owner_id, days_back).await?;
            let entries: Vec<Value> = sessions
                .iter()
                .map(|s| {
                    json!({
                        "title": s.payload.title,
                        "completed_at": s.completed_at,
                        "exercises": s.payload.exercises.iter().map(|e| json!({
                            "name": e.name,
                            "sets": e.sets,
                            "reps": e.reps,
                            "weight_kg": e.weight_kg,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Ok(json!(entries))
        }
        SOURCE_ACTIVE_WORKOUT => {
            let Some(workout_id) = linked_workout else {
                return Err(AppError::Internal(
                    "active_workout requested without a linked workout".to_string(),
                ));
            };
            let workout = workouts.get(workout_id).await?.ok_or(AppError::NotFound {
                resource: "workout session",
            })?;
            Ok(json!({
                "id": workout.id,
                "status": workout.status,
                "payload": workout.payload,
                "payload_version": workout.payload_version,
            }))
        }
        SOURCE_EXERCISE_CATALOG => {
            let group = request.params["muscle_group"].as_str();
            let entries: Vec<Value> = CATALOG
                .iter()
                .filter(|(g, _)| group.is_none_or(|wanted| *g == wanted))
                .map(|(g, names)| json!({ "muscle_group": g, "exercises": names }))
                .collect();
            Ok(json!(entries))
        }
        other => Err(AppError::Internal(format!("unknown knowledge source '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present(source: &str, params: Value) -> KnowledgePresence {
        KnowledgePresence {
            source: source.to_string(),
            params,
        }
    }

    #[test]
    fn repeated_history_ask_is_reused_not_refetched() {
        let existing = vec![present(SOURCE_WORKOUT_HISTORY, json!({"days_back": 7}))];

        let plan = select("what should I do today?", None, &existing);
        assert!(
            plan.append
                .iter()
                .all(|r| r.source != SOURCE_WORKOUT_HISTORY)
        );
        assert!(plan.reuse.contains(&SOURCE_WORKOUT_HISTORY));
    }

    #[test]
    fn wider_horizon_appends_an_update_instead_of_reusing() {
        let existing = vec![present(SOURCE_WORKOUT_HISTORY, json!({"days_back": 7}))];

        let plan = select("how is my progress this month?", None, &existing);
        let req = plan
            .append
            .iter()
            .find(|r| r.source == SOURCE_WORKOUT_HISTORY)
            .expect("should widen");
        assert_eq!(req.params["days_back"], 30);
        assert!(req.widens, "widening is a knowledge_update, not fresh knowledge");
    }

    #[test]
    fn wider_present_params_cover_narrower_requests() {
        let existing = vec![present(SOURCE_WORKOUT_HISTORY, json!({"days_back": 30}))];

        let plan = select("what should I do today?", None, &existing);
        assert!(plan.reuse.contains(&SOURCE_WORKOUT_HISTORY));
    }

    #[test]
    fn stale_workout_snapshot_is_not_coverage() {
        let id = Uuid::now_v7();
        let existing = vec![present(SOURCE_ACTIVE_WORKOUT, json!({"version": 3}))];

        let plan = select("swap the first one", Some((id, 5)), &existing);
        let req = plan
            .append
            .iter()
            .find(|r| r.source == SOURCE_ACTIVE_WORKOUT)
            .expect("newer version must refetch");
        assert!(req.widens);

        let fresh = vec![present(SOURCE_ACTIVE_WORKOUT, json!({"version": 5}))];
        let plan = select("swap the first one", Some((id, 5)), &fresh);
        assert!(plan.reuse.contains(&SOURCE_ACTIVE_WORKOUT));
    }

    #[test]
    fn muscle_group_mention_pulls_the_catalog() {
        let plan = select("my chest day feels stale", None, &[]);
        let req = plan
            .append
            .iter()
            .find(|r| r.source == SOURCE_EXERCISE_CATALOG)
            .expect("catalog should be requested");
        assert_eq!(req.params["muscle_group"], "chest");

        // A different group is a different request, not covered.
        let existing = vec![present(SOURCE_EXERCISE_CATALOG, json!({"muscle_group": "chest"}))];
        let plan = select("now legs", None, &existing);
        assert!(
            plan.append
                .iter()
                .any(|r| r.source == SOURCE_EXERCISE_CATALOG
                    && r.params["muscle_group"] == "legs")
        );
    }
}
