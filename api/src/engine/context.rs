use std::collections::BTreeMap;

use forma_core::events::{Event, EventBody};

use crate::engine::tokens::estimate_tokens;

/// Identity and role instructions for the coach. Part of the stable
/// prefix, so the wording must not vary per turn.
const COACH_INSTRUCTIONS: &str = "\
You are Forma, a strength-training coach working inside a fitness app.\n\
You manage the athlete's current workout session through the tools you are given.\n\
Rules:\n\
- Choose exactly one tool per step.\n\
- Every edit to the workout goes through update_workout with the version you last saw; \
if it conflicts, re-read the result and retry with the current version.\n\
- Talk to the athlete only through send_message. Keep messages short and concrete.\n\
- When nothing remains to do, choose idle.";

/// What the completion provider sees, in fixed order: stable prefix,
/// then knowledge in append order, then the transcript since the last
/// checkpoint. The ordering is a design invariant — knowledge is never
/// reordered or dropped, which is what keeps provider-side prompt caches
/// valid across turns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPrompt {
    pub stable_prefix: String,
    pub knowledge: Vec<KnowledgeBlock>,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBlock {
    pub source: String,
    pub params: serde_json::Value,
    pub data: serde_json::Value,
    /// True for knowledge_update events (a widening of an earlier block)
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    /// Text of the checkpoint_summary that opened the current segment
    Summary(String),
    User(String),
    Action {
        tool: String,
        arguments: serde_json::Value,
    },
    Outcome {
        tool: String,
        success: bool,
        output: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl ProviderPrompt {
    /// Flatten into role-tagged messages for a chat-style provider.
    /// Knowledge renders as one leading user message that only ever grows
    /// at the end, so previously seen prefix tokens stay cache-hot.
    pub fn render_messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::new();

        if !self.knowledge.is_empty() {
            let mut content = String::from("Context data, oldest first:\n");
            for block in &self.knowledge {
                content.push_str(&render_knowledge_block(block));
            }
            messages.push(PromptMessage {
                role: PromptRole::User,
                content,
            });
        }

        for entry in &self.transcript {
            match entry {
                TranscriptEntry::Summary(text) => messages.push(PromptMessage {
                    role: PromptRole::User,
                    content: format!("Summary of the conversation so far:\n{text}"),
                }),
                TranscriptEntry::User(text) => messages.push(PromptMessage {
                    role: PromptRole::User,
                    content: text.clone(),
                }),
                TranscriptEntry::Action { tool, arguments } => messages.push(PromptMessage {
                    role: PromptRole::Assistant,
                    content: format!("[action] {tool} {arguments}"),
                }),
                TranscriptEntry::Outcome {
                    tool,
                    success,
                    output,
                } => messages.push(PromptMessage {
                    role: PromptRole::User,
                    content: format!(
                        "[result] {tool} {} {output}",
                        if *success { "ok" } else { "failed" }
                    ),
                }),
            }
        }

        messages
    }

    pub fn estimated_tokens(&self) -> usize {
        let mut total = estimate_tokens(&self.stable_prefix);
        for message in self.render_messages() {
            total += estimate_tokens(&message.content);
        }
        total
    }
}

fn render_knowledge_block(block: &KnowledgeBlock) -> String {
    format!(
        "\n## {}{} {}\n{}\n",
        block.source,
        if block.update { " (update)" } else { "" },
        block.params,
        block.data
    )
}

/// Render slow-changing profile facts deterministically: object keys in
/// sorted order, one line each. Byte-identical output for unchanged facts
/// is what makes the prefix "stable".
fn render_profile(facts: &serde_json::Value) -> String {
    match facts.as_object() {
        Some(map) if !map.is_empty() => {
            let sorted: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            let mut out = String::from("\n\nAthlete profile:\n");
            for (key, value) in sorted {
                out.push_str(&format!("- {key}: {value}\n"));
            }
            out
        }
        _ => "\n\nAthlete profile: none on record.\n".to_string(),
    }
}

/// Derive the provider-facing prompt from the athlete profile and the
/// active segment's events.
pub fn build_prompt(profile_facts: &serde_json::Value, events: &[Event]) -> ProviderPrompt {
    let mut stable_prefix = String::from(COACH_INSTRUCTIONS);
    stable_prefix.push_str(&render_profile(profile_facts));

    let mut knowledge = Vec::new();
    let mut transcript = Vec::new();

    // The transcript restarts at the most recent checkpoint_summary;
    // knowledge accumulates across the whole segment regardless.
    for event in events {
        match &event.body {
            EventBody::Knowledge {
                source,
                params,
                data,
            } => knowledge.push(KnowledgeBlock {
                source: source.clone(),
                params: params.clone(),
                data: data.clone(),
                update: false,
            }),
            EventBody::KnowledgeUpdate {
                source,
                params,
                data,
            } => knowledge.push(KnowledgeBlock {
                source: source.clone(),
                params: params.clone(),
                data: data.clone(),
                update: true,
            }),
            EventBody::CheckpointSummary { text, .. } => {
                transcript.clear();
                transcript.push(TranscriptEntry::Summary(text.clone()));
            }
            EventBody::UserMessage { text } => {
                transcript.push(TranscriptEntry::User(text.clone()));
            }
            EventBody::Action {
                tool, arguments, ..
            } => transcript.push(TranscriptEntry::Action {
                tool: tool.clone(),
                arguments: arguments.clone(),
            }),
            EventBody::Result {
                tool,
                success,
                output,
            } => transcript.push(TranscriptEntry::Outcome {
                tool: tool.clone(),
                success: *success,
                output: output.clone(),
            }),
        }
    }

    ProviderPrompt {
        stable_prefix,
        knowledge,
        transcript,
    }
}

/// Estimated tokens of transcript events since the last checkpoint —
/// the quantity the checkpoint budget is compared against. Knowledge is
/// excluded: it is carried forward verbatim, never summarized.
pub fn transcript_token_estimate(events: &[Event]) -> usize {
    let mut total = 0;
    for event in events {
        match &event.body {
            EventBody::CheckpointSummary { .. } => total = 0,
            EventBody::UserMessage { text } => total += estimate_tokens(text),
            EventBody::Action {
                tool, arguments, ..
            } => total += estimate_tokens(tool) + estimate_tokens(&arguments.to_string()),
            EventBody::Result { tool, output, .. } => {
                total += estimate_tokens(tool) + estimate_tokens(&output.to_string())
            }
            _ => {}
        }
    }
    total
}

/// Plain-text rendering of the transcript since the last checkpoint, fed
/// to the provider's summarization call.
pub fn render_transcript_for_summary(events: &[Event]) -> String {
    let prompt = build_prompt(&serde_json::json!({}), events);
    let mut out = String::new();
    for entry in &prompt.transcript {
        match entry {
            TranscriptEntry::Summary(text) => {
                out.push_str("Earlier summary: ");
                out.push_str(text);
                out.push('\n');
            }
            TranscriptEntry::User(text) => {
                out.push_str("Athlete: ");
                out.push_str(text);
                out.push('\n');
            }
            TranscriptEntry::Action { tool, arguments } => {
                out.push_str(&format!("Coach action: {tool} {arguments}\n"));
            }
            TranscriptEntry::Outcome {
                tool,
                success,
                output,
            } => {
                out.push_str(&format!(
                    "Action result: {tool} {} {output}\n",
                    if *success { "ok" } else { "failed" }
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(body: EventBody, seq: i64) -> Event {
        Event {
            id: Uuid::now_v7(),
            segment_id: Uuid::now_v7(),
            sequence_number: seq,
            body,
            created_at: Utc::now(),
        }
    }

    fn knowledge(source: &str, days_back: i64) -> EventBody {
        EventBody::Knowledge {
            source: source.into(),
            params: serde_json::json!({ "days_back": days_back }),
            data: serde_json::json!([{"title": "Push day"}]),
        }
    }

    #[test]
    fn stable_prefix_is_byte_identical_across_turns() {
        let facts = serde_json::json!({"goal": "hypertrophy", "experience": "intermediate"});
        let turn_one = build_prompt(&facts, &[event(knowledge("workout_history", 7), 1)]);
        let turn_two = build_prompt(
            &facts,
            &[
                event(knowledge("workout_history", 7), 1),
                event(EventBody::UserMessage { text: "hi".into() }, 2),
            ],
        );
        assert_eq!(turn_one.stable_prefix, turn_two.stable_prefix);
    }

    #[test]
    fn profile_rendering_is_key_order_independent() {
        let a = serde_json::json!({"goal": "strength", "age": 31});
        let b: serde_json::Value =
            serde_json::from_str(r#"{"age": 31, "goal": "strength"}"#).unwrap();
        assert_eq!(
            build_prompt(&a, &[]).stable_prefix,
            build_prompt(&b, &[]).stable_prefix
        );
    }

    #[test]
    fn knowledge_keeps_append_order_and_survives_checkpoints() {
        let events = vec![
            event(knowledge("workout_history", 7), 1),
            event(EventBody::UserMessage { text: "hi".into() }, 2),
            event(knowledge("exercise_catalog", 0), 3),
            event(
                EventBody::CheckpointSummary {
                    text: "we planned push day".into(),
                    carried_from_segment: Uuid::now_v7(),
                },
                4,
            ),
        ];
        let prompt = build_prompt(&serde_json::json!({}), &events);
        let sources: Vec<&str> = prompt.knowledge.iter().map(|k| k.source.as_str()).collect();
        assert_eq!(sources, vec!["workout_history", "exercise_catalog"]);
    }

    #[test]
    fn transcript_restarts_at_the_latest_checkpoint() {
        let events = vec![
            event(EventBody::UserMessage { text: "old".into() }, 1),
            event(
                EventBody::CheckpointSummary {
                    text: "summary".into(),
                    carried_from_segment: Uuid::now_v7(),
                },
                2,
            ),
            event(EventBody::UserMessage { text: "new".into() }, 3),
        ];
        let prompt = build_prompt(&serde_json::json!({}), &events);
        assert_eq!(
            prompt.transcript,
            vec![
                TranscriptEntry::Summary("summary".into()),
                TranscriptEntry::User("new".into()),
            ]
        );
    }

    #[test]
    fn rendered_knowledge_message_only_grows_at_the_end() {
        let first = vec![event(knowledge("workout_history", 7), 1)];
        let mut second = first.clone();
        second.push(event(knowledge("exercise_catalog", 0), 2));

        let before = build_prompt(&serde_json::json!({}), &first).render_messages();
        let after = build_prompt(&serde_json::json!({}), &second).render_messages();
        assert!(after[0].content.starts_with(&before[0].content));
    }

    #[test]
    fn transcript_estimate_ignores_knowledge_and_resets_on_checkpoint() {
        let big_data = "x".repeat(4000);
        let events = vec![
            event(
                EventBody::Knowledge {
                    source: "workout_history".into(),
                    params: serde_json::json!({}),
                    data: serde_json::json!(big_data),
                },
                1,
            ),
            event(EventBody::UserMessage { text: "x".repeat(400) }, 2),
        ];
        let estimate = transcript_token_estimate(&events);
        assert!(estimate >= 100 && estimate < 200, "knowledge excluded, got {estimate}");

        let mut rolled = events;
        rolled.push(event(
            EventBody::CheckpointSummary {
                text: "s".into(),
                carried_from_segment: Uuid::now_v7(),
            },
            3,
        ));
        assert_eq!(transcript_token_estimate(&rolled), 0);
    }
}
