//! Completion provider abstraction.
//!
//! Defines the [`CompletionProvider`] trait with a single-shot and a
//! streaming entry point, plus the OpenAI chat-completions implementation.
//! Non-streaming calls retry 429/5xx/network failures with exponential
//! backoff; streaming calls are single-attempt, since replaying a partial
//! stream would duplicate output already relayed to the client.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::pin::Pin;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::{Error, Result};

/// Conversation role for a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prompt message sent to the completion provider.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental text tokens from a streaming completion.
pub type TokenStream = Pin<Box<dyn futures_util::Stream<Item = Result<String>> + Send>>;

/// A text-generation service invoked with a system prompt and messages.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a full completion in one call.
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a completion as an incremental token stream.
    async fn complete_stream(&self, system: &str, messages: &[ChatMessage])
        -> Result<TokenStream>;
}

// ============ Disabled Provider ============

/// Errors on every call; used when `completion.provider = "disabled"`.
pub struct DisabledCompletions;

#[async_trait]
impl CompletionProvider for DisabledCompletions {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _messages: &[ChatMessage]) -> Result<String> {
        Err(Error::provider("completion provider is disabled"))
    }

    async fn complete_stream(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
    ) -> Result<TokenStream> {
        Err(Error::provider("completion provider is disabled"))
    }
}

// ============ OpenAI Provider ============

/// Completion provider using the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL can be
/// overridden with `OPENAI_BASE_URL` for compatible gateways.
pub struct OpenAiCompletions {
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompletions {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("completion.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::validation("OPENAI_API_KEY environment variable not set"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn endpoint() -> String {
        let base = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        format!("{}/chat/completions", base)
    }

    fn build_body(&self, system: &str, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let mut wire_messages = vec![serde_json::json!({
            "role": "system",
            "content": system,
        })];
        for m in messages {
            wire_messages.push(serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            }));
        }

        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": wire_messages,
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::provider("OPENAI_API_KEY not set"))?;

        let response = self
            .client
            .post(Self::endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = self.build_body(system, messages, false);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.send(&body).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_message_content(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::provider(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::provider(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::provider("completion failed after retries")))
    }

    async fn complete_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream> {
        let body = self.build_body(system, messages, true);
        let response = self.send(&body).await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            // Lines are only decoded once complete, so a UTF-8 sequence
            // split across network chunks never gets mangled.
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Error::provider(format!("stream read: {}", e)))?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim();
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    if let Some(token) = parse_stream_delta(payload) {
                        yield token;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::provider("invalid completion response: missing message content"))
}

fn parse_stream_delta(payload: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(payload).ok()?;
    let token = json
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Create the appropriate [`CompletionProvider`] based on configuration.
pub fn create_provider(config: &CompletionConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletions)),
        "openai" => Ok(Box::new(OpenAiCompletions::new(config)?)),
        other => Err(Error::validation(format!(
            "unknown completion provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "All set."}}]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "All set.");
    }

    #[test]
    fn test_extract_message_content_missing() {
        let json = serde_json::json!({"choices": []});
        assert!(extract_message_content(&json).is_err());
    }

    #[test]
    fn test_parse_stream_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_stream_delta(payload), Some("Hel".to_string()));
    }

    #[test]
    fn test_parse_stream_delta_role_only() {
        let payload = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_delta(payload), None);
    }

    #[test]
    fn test_parse_stream_delta_garbage() {
        assert_eq!(parse_stream_delta("not json"), None);
    }
}
