use forma_core::commands::{Command, CommandType};
use forma_core::events::EventBody;
use forma_core::session::Session;
use forma_core::stream::{StreamEvent, TurnStatus};
use forma_core::workout::CreateWorkoutRequest;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::checkpoint::maybe_checkpoint;
use crate::engine::provider::{CompletionProvider, ProviderError};
use crate::engine::registry::{ToolInvocation, ToolRegistry};
use crate::engine::{context, knowledge};
use crate::error::AppError;
use crate::store::event_log::EventLog;
use crate::store::sessions::SessionStore;
use crate::store::workouts::{WorkoutStore, apply_command};

/// Everything one turn needs. All stores and the provider sit behind
/// seams so the loop is testable without Postgres or a live provider.
pub struct TurnDeps<'a> {
    pub log: &'a dyn EventLog,
    pub sessions: &'a dyn SessionStore,
    pub workouts: &'a dyn WorkoutStore,
    pub provider: &'a dyn CompletionProvider,
    pub registry: &'a ToolRegistry,
    pub config: &'a EngineConfig,
}

/// Loop state, one logical thread per session turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    AwaitingProvider,
    ExecutingAction,
    Terminal,
}

enum IterationFailure {
    Timeout(std::time::Duration),
    Transport(String),
    Protocol(String),
}

struct ExecOutcome {
    success: bool,
    output: Value,
    /// User-visible text, only ever produced by send_message
    message: Option<String>,
}

impl ExecOutcome {
    fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            message: None,
        }
    }

    fn fail(output: Value) -> Self {
        Self {
            success: false,
            output,
            message: None,
        }
    }
}

/// Run one agent turn: append the user message, pull missing knowledge,
/// then iterate provider → action → result until a terminal action or the
/// iteration cap. Returns the turn status that also rides on the final
/// `done` stream event.
///
/// Executor failures are appended as failing results and the loop
/// continues — the provider sees the failure and can choose differently.
/// Persistence failures abort immediately: once appends fail, the audit
/// trail can no longer be trusted.
pub async fn run_turn(
    deps: &TurnDeps<'_>,
    mut session: Session,
    profile_facts: Value,
    text: String,
    tx: &mpsc::Sender<StreamEvent>,
) -> TurnStatus {
    let mut phase = Phase::Running;
    let mut iterations = 0u32;
    tracing::debug!(session_id = %session.id, ?phase, "turn started");

    let user_event = match deps
        .log
        .append(session.current_segment_id, EventBody::UserMessage { text: text.clone() })
        .await
    {
        Ok(event) => event,
        Err(err) => return abort(tx, err, iterations).await,
    };
    let turn_key = user_event.id;

    if let Err(err) = gather_knowledge(deps, &session, &text, tx).await {
        return abort(tx, err, iterations).await;
    }

    while iterations < deps.config.max_iterations {
        let iteration = iterations + 1;

        // Client gone: stop before the next provider call. Appended events
        // are retained so a retried request resumes instead of repeating.
        if tx.is_closed() {
            tracing::info!(session_id = %session.id, iteration, "client disconnected; stopping turn");
            return TurnStatus::Failed;
        }

        session = match maybe_checkpoint(
            session,
            deps.log,
            deps.sessions,
            deps.provider,
            deps.config,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => return abort(tx, err, iterations).await,
        };

        let events = match deps.log.read(session.current_segment_id, None).await {
            Ok(events) => events,
            Err(err) => return abort(tx, err, iterations).await,
        };
        let prompt = context::build_prompt(&profile_facts, &events);

        phase = Phase::AwaitingProvider;
        tracing::debug!(
            session_id = %session.id,
            iteration,
            prompt_tokens = prompt.estimated_tokens(),
            ?phase,
            "calling provider"
        );

        let (choice, invocation) = match choose_with_retry(deps, &prompt).await {
            Ok(chosen) => chosen,
            Err(IterationFailure::Timeout(timeout)) => {
                // A timed-out call is a failed attempt on the record, not
                // an invisible retry.
                iterations = iteration;
                let body = EventBody::Result {
                    tool: "completion_provider".to_string(),
                    success: false,
                    output: json!({ "error": "timeout", "timeout_secs": timeout.as_secs() }),
                };
                if let Err(err) = deps.log.append(session.current_segment_id, body).await {
                    return abort(tx, err, iterations).await;
                }
                emit(tx, StreamEvent::Status {
                    text: "The coach is taking longer than usual; retrying.".to_string(),
                })
                .await;
                continue;
            }
            Err(IterationFailure::Transport(message)) => {
                return abort(tx, AppError::ProviderUnavailable(message), iterations).await;
            }
            Err(IterationFailure::Protocol(message)) => {
                return abort(tx, AppError::Protocol(message), iterations).await;
            }
        };

        phase = Phase::ExecutingAction;
        tracing::debug!(session_id = %session.id, iteration, tool = %choice.tool, ?phase, "executing action");

        let action_body = EventBody::Action {
            tool: choice.tool.clone(),
            arguments: choice.arguments.clone(),
            iteration,
        };
        if let Err(err) = deps.log.append(session.current_segment_id, action_body).await {
            return abort(tx, err, iterations).await;
        }

        emit(tx, StreamEvent::ActionStart {
            tool: choice.tool.clone(),
            iteration,
        })
        .await;
        let Some(definition) = deps.registry.get(&choice.tool) else {
            return abort(
                tx,
                AppError::Internal(format!("parsed tool '{}' missing from registry", choice.tool)),
                iterations,
            )
            .await;
        };
        if let Some(label) = definition.status_label {
            emit(tx, StreamEvent::Status { text: label.to_string() }).await;
        }

        let outcome = match execute(deps, &mut session, turn_key, iteration, invocation).await {
            Ok(outcome) => outcome,
            Err(err) => return abort(tx, err, iterations).await,
        };

        let result_body = EventBody::Result {
            tool: choice.tool.clone(),
            success: outcome.success,
            output: outcome.output.clone(),
        };
        if let Err(err) = deps.log.append(session.current_segment_id, result_body).await {
            return abort(tx, err, iterations).await;
        }

        emit(tx, StreamEvent::ActionResult {
            tool: choice.tool.clone(),
            iteration,
            success: outcome.success,
            output: outcome.output,
        })
        .await;
        if let Some(message) = outcome.message {
            emit(tx, StreamEvent::Message { text: message }).await;
        }

        iterations = iteration;

        if definition.terminal {
            phase = Phase::Terminal;
            tracing::debug!(session_id = %session.id, iterations, ?phase, "turn complete");
            emit(tx, StreamEvent::Done {
                status: TurnStatus::Completed,
                iterations,
            })
            .await;
            return TurnStatus::Completed;
        }
    }

    // Iteration cap reached without a terminal action: a deliberate,
    // observable stop rather than an endless loop.
    tracing::warn!(
        session_id = %session.id,
        iterations,
        "turn hit the iteration cap without a terminal action"
    );
    emit(tx, StreamEvent::Done {
        status: TurnStatus::MaxIterationsExceeded,
        iterations,
    })
    .await;
    TurnStatus::MaxIterationsExceeded
}

/// Decide and fetch missing knowledge, appending it to the log. A failed
/// fetch degrades the prompt and is skipped with a warning; a failed
/// append is a persistence error and bubbles up.
async fn gather_knowledge(
    deps: &TurnDeps<'_>,
    session: &Session,
    text: &str,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), AppError> {
    let events = deps.log.read(session.current_segment_id, None).await?;
    let present = knowledge::presence(&events);

    let linked = match session.workout_session_id {
        Some(workout_id) => deps
            .workouts
            .get(workout_id)
            .await?
            .map(|w| (w.id, w.payload_version)),
        None => None,
    };

    let plan = knowledge::select(text, linked, &present);
    for request in &plan.append {
        let data = match knowledge::fetch(
            deps.workouts,
            session.owner_id,
            linked.map(|(id, _)| id),
            request,
        )
        .await
        {
            Ok(data) => data,
            Err(err) => {
                // The selector is an optimization, not a correctness gate:
                // proceed degraded rather than blocked.
                tracing::warn!(source = request.source, error = ?err, "knowledge fetch failed; skipping");
                continue;
            }
        };

        let body = if request.widens {
            EventBody::KnowledgeUpdate {
                source: request.source.to_string(),
                params: request.params.clone(),
                data,
            }
        } else {
            EventBody::Knowledge {
                source: request.source.to_string(),
                params: request.params.clone(),
                data,
            }
        };
        deps.log.append(session.current_segment_id, body).await?;

        emit(tx, StreamEvent::Knowledge {
            source: request.source.to_string(),
            reason: request.reason.to_string(),
        })
        .await;
    }
    Ok(())
}

/// One provider round with the protocol-retry contract: a malformed or
/// out-of-vocabulary choice gets one local retry, then surfaces.
async fn choose_with_retry(
    deps: &TurnDeps<'_>,
    prompt: &context::ProviderPrompt,
) -> Result<(crate::engine::provider::ActionChoice, ToolInvocation), IterationFailure> {
    let mut last_protocol_error = String::new();
    for attempt in 0..2 {
        match deps
            .provider
            .choose_action(prompt, deps.registry.definitions())
            .await
        {
            Ok(choice) => match deps.registry.parse(&choice) {
                Ok(invocation) => return Ok((choice, invocation)),
                Err(message) => {
                    tracing::warn!(attempt, tool = %choice.tool, %message, "provider chose outside the contract");
                    last_protocol_error = message;
                }
            },
            Err(ProviderError::Protocol(message)) => {
                tracing::warn!(attempt, %message, "provider protocol error");
                last_protocol_error = message;
            }
            Err(ProviderError::Timeout(timeout)) => {
                return Err(IterationFailure::Timeout(timeout));
            }
            Err(ProviderError::Transport(message)) => {
                return Err(IterationFailure::Transport(message));
            }
        }
    }
    Err(IterationFailure::Protocol(last_protocol_error))
}

async fn execute(
    deps: &TurnDeps<'_>,
    session: &mut Session,
    turn_key: Uuid,
    iteration: u32,
    invocation: ToolInvocation,
) -> Result<ExecOutcome, AppError> {
    match invocation {
        ToolInvocation::SendMessage { text } => Ok(ExecOutcome {
            success: true,
            output: json!({ "delivered": true }),
            message: Some(text),
        }),
        ToolInvocation::Idle => Ok(ExecOutcome::ok(json!({}))),
        ToolInvocation::CreateWorkout {
            title,
            exercises,
            notes,
        } => {
            if let Some(existing) = session.workout_session_id {
                return Ok(ExecOutcome::fail(json!({
                    "error": "already_linked",
                    "workout_session_id": existing,
                })));
            }
            let workout = deps
                .workouts
                .create(
                    session.owner_id,
                    CreateWorkoutRequest {
                        title,
                        exercises,
                        notes,
                    },
                )
                .await?;
            deps.sessions.link_workout(session.id, workout.id).await?;
            session.workout_session_id = Some(workout.id);
            Ok(ExecOutcome::ok(json!({
                "workout_session_id": workout.id,
                "payload_version": workout.payload_version,
            })))
        }
        ToolInvocation::UpdateWorkout {
            expected_version,
            command,
        } => {
            run_workout_command(deps, session, turn_key, iteration, expected_version, command).await
        }
        ToolInvocation::CompleteWorkout { expected_version } => {
            run_workout_command(
                deps,
                session,
                turn_key,
                iteration,
                expected_version,
                CommandType::CompleteSession,
            )
            .await
        }
    }
}

/// Issue a versioned command against the linked workout. Conflicts and
/// rejections come back as failing outcomes the provider can react to;
/// only persistence errors abort the turn.
async fn run_workout_command(
    deps: &TurnDeps<'_>,
    session: &Session,
    turn_key: Uuid,
    iteration: u32,
    expected_version: i64,
    command_type: CommandType,
) -> Result<ExecOutcome, AppError> {
    let Some(workout_id) = session.workout_session_id else {
        return Ok(ExecOutcome::fail(json!({
            "error": "no_workout_linked",
            "hint": "use create_workout first",
        })));
    };

    // Stable per (turn, iteration): a replayed delivery of the same turn
    // re-issues the same command_id and gets the stored outcome.
    let command = Command {
        command_id: format!("agent:{turn_key}:{iteration}"),
        expected_version,
        command: command_type,
        client_meta: Some(json!({ "actor": "agent" })),
    };

    match apply_command(deps.workouts, workout_id, &command).await {
        Ok(accepted) => Ok(ExecOutcome::ok(json!({ "new_version": accepted.new_version }))),
        Err(AppError::Conflict { current_version }) => Ok(ExecOutcome::fail(json!({
            "error": "conflict",
            "current_version": current_version,
        }))),
        Err(AppError::CommandRejected { message, .. }) => Ok(ExecOutcome::fail(json!({
            "error": "command_rejected",
            "message": message,
        }))),
        Err(AppError::NotFound { .. }) => Ok(ExecOutcome::fail(json!({
            "error": "not_found",
        }))),
        Err(AppError::Validation { message, .. }) => Ok(ExecOutcome::fail(json!({
            "error": "validation_failed",
            "message": message,
        }))),
        Err(err) => Err(err),
    }
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    // A send error means the client is gone; the cancellation check at the
    // top of the loop handles shutdown.
    let _ = tx.send(event).await;
}

/// Surface a turn-fatal error on the stream and close with `done`.
async fn abort(tx: &mpsc::Sender<StreamEvent>, err: AppError, iterations: u32) -> TurnStatus {
    let (code, message) = match &err {
        AppError::Protocol(message) => (
            forma_core::error::codes::PROTOCOL_ERROR,
            message.clone(),
        ),
        AppError::ProviderUnavailable(message) => (
            forma_core::error::codes::PROVIDER_UNAVAILABLE,
            message.clone(),
        ),
        AppError::Database(db) => {
            tracing::error!("turn aborted on persistence error: {db:?}");
            (
                forma_core::error::codes::INTERNAL_ERROR,
                "the session log is temporarily unavailable".to_string(),
            )
        }
        other => {
            tracing::error!("turn aborted: {other:?}");
            (
                forma_core::error::codes::INTERNAL_ERROR,
                "an internal error occurred".to_string(),
            )
        }
    };

    emit(tx, StreamEvent::Error {
        code: code.to_string(),
        message,
    })
    .await;
    emit(tx, StreamEvent::Done {
        status: TurnStatus::Failed,
        iterations,
    })
    .await;
    TurnStatus::Failed
}
