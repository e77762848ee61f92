use forma_core::events::EventBody;
use forma_core::session::Session;

use crate::config::EngineConfig;
use crate::engine::context;
use crate::engine::provider::CompletionProvider;
use crate::error::AppError;
use crate::store::event_log::EventLog;
use crate::store::sessions::SessionStore;

/// Roll the session onto a fresh segment when the transcript since the
/// last checkpoint outgrows the context budget. Identity when no
/// checkpoint is needed.
///
/// Knowledge events are never summarized — they are replayed verbatim into
/// the new segment, so the knowledge visible to the context builder is
/// identical before and after the roll. If summarization fails the
/// checkpoint is deferred and the session stays on its current segment;
/// deferral can never lose events.
pub async fn maybe_checkpoint(
    session: Session,
    log: &dyn EventLog,
    sessions: &dyn SessionStore,
    provider: &dyn CompletionProvider,
    config: &EngineConfig,
) -> Result<Session, AppError> {
    let events = log.read(session.current_segment_id, None).await?;

    let transcript_tokens = context::transcript_token_estimate(&events);
    if transcript_tokens <= config.context_token_budget {
        return Ok(session);
    }

    let transcript = context::render_transcript_for_summary(&events);
    let summary = match provider.summarize(&transcript).await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::warn!(
                session_id = %session.id,
                transcript_tokens,
                error = %err,
                "checkpoint summarization failed; deferring"
            );
            return Ok(session);
        }
    };

    let mut first_events = vec![EventBody::CheckpointSummary {
        text: summary,
        carried_from_segment: session.current_segment_id,
    }];
    first_events.extend(
        events
            .iter()
            .filter(|e| e.body.is_knowledge())
            .map(|e| e.body.clone()),
    );

    let rolled = sessions.rollover(session.id, first_events).await?;

    tracing::info!(
        session_id = %rolled.id,
        old_segment = %session.current_segment_id,
        new_segment = %rolled.current_segment_id,
        transcript_tokens,
        "checkpoint: sealed segment and rolled forward"
    );

    Ok(rolled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackend, ScriptedProvider};
    use forma_core::events::EventBody;
    use serde_json::json;
    use uuid::Uuid;

    fn knowledge(source: &str, days_back: i64) -> EventBody {
        EventBody::Knowledge {
            source: source.into(),
            params: json!({ "days_back": days_back }),
            data: json!([{"title": "Pull day"}]),
        }
    }

    async fn knowledge_pairs(backend: &MemoryBackend, segment_id: Uuid) -> Vec<(String, String)> {
        backend
            .read(segment_id, None)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.body {
                EventBody::Knowledge { source, params, .. }
                | EventBody::KnowledgeUpdate { source, params, .. } => {
                    Some((source, params.to_string()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn under_budget_is_identity() {
        let backend = MemoryBackend::new();
        let session = backend.create(Uuid::now_v7(), None).await.unwrap();
        backend
            .append(
                session.current_segment_id,
                EventBody::UserMessage { text: "short".into() },
            )
            .await
            .unwrap();

        let provider = ScriptedProvider::default();
        let config = EngineConfig::default();
        let after = maybe_checkpoint(session.clone(), &backend, &backend, &provider, &config)
            .await
            .unwrap();
        assert_eq!(after.current_segment_id, session.current_segment_id);
    }

    #[tokio::test]
    async fn over_budget_rolls_and_carries_knowledge_verbatim() {
        let backend = MemoryBackend::new();
        let session = backend.create(Uuid::now_v7(), None).await.unwrap();
        let segment = session.current_segment_id;

        backend.append(segment, knowledge("workout_history", 7)).await.unwrap();
        backend
            .append(
                segment,
                EventBody::UserMessage { text: "x".repeat(2000) },
            )
            .await
            .unwrap();
        backend.append(segment, knowledge("exercise_catalog", 0)).await.unwrap();

        let before = knowledge_pairs(&backend, segment).await;

        let provider = ScriptedProvider::default().with_summary("planned a pull day");
        let config = EngineConfig {
            context_token_budget: 100,
            ..EngineConfig::default()
        };
        let after = maybe_checkpoint(session.clone(), &backend, &backend, &provider, &config)
            .await
            .unwrap();

        assert_ne!(after.current_segment_id, segment);

        let new_events = backend.read(after.current_segment_id, None).await.unwrap();
        match &new_events[0].body {
            EventBody::CheckpointSummary { text, carried_from_segment } => {
                assert_eq!(text, "planned a pull day");
                assert_eq!(*carried_from_segment, segment);
            }
            other => panic!("first event must be the summary, got {other:?}"),
        }

        // Losslessness: knowledge set identical across the roll, in order.
        let carried = knowledge_pairs(&backend, after.current_segment_id).await;
        assert_eq!(carried, before);

        // The old segment is sealed; further appends must fail.
        assert!(
            backend
                .append(segment, EventBody::UserMessage { text: "late".into() })
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn summarization_failure_defers_without_partial_segments() {
        let backend = MemoryBackend::new();
        let session = backend.create(Uuid::now_v7(), None).await.unwrap();
        backend
            .append(
                session.current_segment_id,
                EventBody::UserMessage { text: "x".repeat(2000) },
            )
            .await
            .unwrap();

        let provider = ScriptedProvider::default(); // no summaries scripted -> summarize fails
        let config = EngineConfig {
            context_token_budget: 100,
            ..EngineConfig::default()
        };
        let after = maybe_checkpoint(session.clone(), &backend, &backend, &provider, &config)
            .await
            .unwrap();

        assert_eq!(after.current_segment_id, session.current_segment_id);
        assert_eq!(backend.segment_count(session.id), 1, "no partial segment created");
    }
}
