use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::engine::context::{PromptRole, ProviderPrompt};
use crate::engine::registry::ToolDefinition;

const DEFAULT_PROVIDER_URL: &str = "https://api.anthropic.com/v1/messages";
const PROVIDER_API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 2048;

const SUMMARIZER_INSTRUCTIONS: &str = "\
Summarize this coaching conversation transcript in at most 150 words. \
Keep decisions, workout changes and open questions; drop pleasantries. \
Respond with the summary text only.";

/// The provider chose one action from the declared vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionChoice {
    pub tool: String,
    pub arguments: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The response violated the one-action contract or was unparseable.
    /// The control loop retries this once, then surfaces it.
    #[error("provider returned an unusable response: {0}")]
    Protocol(String),
    #[error("provider request failed: {0}")]
    Transport(String),
    /// Hard per-call timeout. Recorded as a failed action attempt so the
    /// transcript stays a faithful audit trail.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// External text-completion boundary. Stateless: each call carries the
/// full prompt; nothing is retained between calls.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Ask for exactly one action from the declared set.
    async fn choose_action(
        &self,
        prompt: &ProviderPrompt,
        tools: &[ToolDefinition],
    ) -> Result<ActionChoice, ProviderError>;

    /// Compact a transcript into checkpoint-summary text.
    async fn summarize(&self, transcript: &str) -> Result<String, ProviderError>;
}

/// Production provider speaking an Anthropic-style messages API.
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpProvider {
    pub fn from_env(timeout: Duration) -> Self {
        let url =
            std::env::var("FORMA_PROVIDER_URL").unwrap_or_else(|_| DEFAULT_PROVIDER_URL.to_string());
        let api_key = std::env::var("FORMA_PROVIDER_API_KEY")
            .expect("FORMA_PROVIDER_API_KEY must be set");
        let model =
            std::env::var("FORMA_PROVIDER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build provider HTTP client");

        Self {
            client,
            url,
            api_key,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout,
        }
    }

    async fn post(&self, body: Value) -> Result<Value, ProviderError> {
        let request = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", PROVIDER_API_VERSION)
            .json(&body)
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => return Err(ProviderError::Timeout(self.timeout)),
            Ok(Err(err)) if err.is_timeout() => return Err(ProviderError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(ProviderError::Transport(err.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("unreadable response body: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "provider returned {status}: {payload}"
            )));
        }
        Ok(payload)
    }

    fn render_body(&self, prompt: &ProviderPrompt, tools: &[ToolDefinition]) -> Value {
        let messages: Vec<Value> = prompt
            .render_messages()
            .into_iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        PromptRole::User => "user",
                        PromptRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let tool_schemas: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": prompt.stable_prefix,
            "messages": messages,
            "tools": tool_schemas,
            // The loop consumes exactly one action per iteration; force the
            // provider to pick one rather than reply with prose.
            "tool_choice": { "type": "any" },
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpProvider {
    async fn choose_action(
        &self,
        prompt: &ProviderPrompt,
        tools: &[ToolDefinition],
    ) -> Result<ActionChoice, ProviderError> {
        let payload = self.post(self.render_body(prompt, tools)).await?;
        parse_action_response(&payload)
    }

    async fn summarize(&self, transcript: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SUMMARIZER_INSTRUCTIONS,
            "messages": [{ "role": "user", "content": transcript }],
        });
        let payload = self.post(body).await?;
        parse_text_response(&payload)
    }
}

/// Extract the single tool_use block from a messages-API response.
/// Zero or multiple chosen actions violate the loop's contract.
pub fn parse_action_response(payload: &Value) -> Result<ActionChoice, ProviderError> {
    let blocks = payload["content"]
        .as_array()
        .ok_or_else(|| ProviderError::Protocol("response has no content array".to_string()))?;

    let mut choices = Vec::new();
    for block in blocks {
        if block["type"] == "tool_use" {
            let tool = block["name"]
                .as_str()
                .ok_or_else(|| ProviderError::Protocol("tool_use block has no name".to_string()))?
                .to_string();
            choices.push(ActionChoice {
                tool,
                arguments: block["input"].clone(),
            });
        }
    }

    if choices.len() == 1 {
        return Ok(choices.remove(0));
    }
    match choices.len() {
        0 => Err(ProviderError::Protocol(
            "provider chose no action".to_string(),
        )),
        n => Err(ProviderError::Protocol(format!(
            "provider chose {n} actions, expected exactly one"
        ))),
    }
}

fn parse_text_response(payload: &Value) -> Result<String, ProviderError> {
    let blocks = payload["content"]
        .as_array()
        .ok_or_else(|| ProviderError::Protocol("response has no content array".to_string()))?;

    let text: String = blocks
        .iter()
        .filter_map(|b| {
            if b["type"] == "text" {
                b["text"].as_str()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(ProviderError::Protocol(
            "summarization returned no text".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tool_use_parses() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "picking a tool"},
                {"type": "tool_use", "id": "t1", "name": "send_message", "input": {"text": "hi"}}
            ]
        });
        let choice = parse_action_response(&payload).unwrap();
        assert_eq!(choice.tool, "send_message");
        assert_eq!(choice.arguments["text"], "hi");
    }

    #[test]
    fn zero_actions_is_a_protocol_error() {
        let payload = json!({"content": [{"type": "text", "text": "just chatting"}]});
        assert!(matches!(
            parse_action_response(&payload),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[test]
    fn multiple_actions_is_a_protocol_error() {
        let payload = json!({
            "content": [
                {"type": "tool_use", "id": "t1", "name": "idle", "input": {}},
                {"type": "tool_use", "id": "t2", "name": "send_message", "input": {"text": "hi"}}
            ]
        });
        let err = parse_action_response(&payload).unwrap_err();
        assert!(err.to_string().contains("2 actions"));
    }

    #[test]
    fn summarization_text_concatenates_blocks() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "part two"}
            ]
        });
        assert_eq!(parse_text_response(&payload).unwrap(), "part one\npart two");
    }
}
