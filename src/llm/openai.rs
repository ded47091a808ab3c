//! OpenAI-compatible chat completions client
//!
//! Serves both OpenAI and xAI (Grok), which expose the same
//! `/chat/completions` contract. Streaming uses explicit deltas.

use crate::error::{AssistantError, Result};
use crate::llm::provider::{ChunkStream, Completion, LlmProvider, StreamChunk};
use crate::llm::stream::sse_data;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

pub struct OpenAiCompatibleProvider {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AssistantError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("{} API call failed: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Llm(format!(
                "{} API error ({}): {}",
                self.name, status, error_text
            )));
        }
        Ok(response)
    }
}

/// Pull the assistant text out of a non-streaming response body.
pub fn completion_from_response(response: &Value) -> Result<Completion> {
    if let Some(error) = response.get("error") {
        return Err(AssistantError::Llm(format!("LLM API error: {}", error)));
    }

    let choice = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| AssistantError::Llm(format!("No choices in LLM response: {}", response)))?;

    match choice.get("finish_reason").and_then(Value::as_str) {
        Some("content_filter") => {
            return Err(AssistantError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    let completion = match choice.pointer("/message/content") {
        Some(Value::String(text)) => Completion::Text(text.clone()),
        Some(Value::Array(parts)) => Completion::Segments(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
        ),
        _ => {
            return Err(AssistantError::Llm(format!(
                "No content in LLM response: {}",
                response
            )))
        }
    };

    if completion.clone().into_text().trim().is_empty() {
        return Err(AssistantError::Llm("Empty content in LLM response".to_string()));
    }
    Ok(completion)
}

/// Decode one SSE payload. `Ok(None)` for keep-alives, role-only chunks and
/// the `[DONE]` marker.
pub fn delta_from_event(data: &str) -> Result<Option<String>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let event: Value = serde_json::from_str(data)
        .map_err(|e| AssistantError::Stream(format!("Malformed stream chunk: {}", e)))?;
    if let Some(error) = event.get("error") {
        return Err(AssistantError::Stream(format!("LLM stream error: {}", error)));
    }
    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let body = self.request_body(system_prompt, user_prompt, false);
        let response = self.post(&body).await?;
        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        completion_from_response(&response_json)
    }

    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<ChunkStream> {
        let body = self.request_body(system_prompt, user_prompt, true);
        let response = self.post(&body).await?;
        let chunks = sse_data(response.bytes_stream()).filter_map(|event| async move {
            match event.and_then(|data| delta_from_event(&data)) {
                Ok(Some(delta)) => Some(Ok(StreamChunk::Delta(delta))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_from_string_content() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "SELECT 1;"}, "finish_reason": "stop"}]
        });
        assert_eq!(
            completion_from_response(&response).unwrap(),
            Completion::Text("SELECT 1;".into())
        );
    }

    #[test]
    fn test_completion_from_content_parts() {
        let response = json!({
            "choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]
        });
        assert_eq!(completion_from_response(&response).unwrap().into_text(), "ab");
    }

    #[test]
    fn test_completion_errors() {
        assert!(completion_from_response(&json!({"error": {"message": "bad key"}})).is_err());
        assert!(completion_from_response(&json!({"choices": []})).is_err());
        assert!(completion_from_response(&json!({"choices": [{"message": {"content": "  "}}]})).is_err());
        assert!(completion_from_response(
            &json!({"choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]})
        )
        .is_err());
    }

    #[test]
    fn test_delta_from_event() {
        assert_eq!(
            delta_from_event(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(delta_from_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(delta_from_event("[DONE]").unwrap(), None);
        assert!(delta_from_event("not json").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OpenAiCompatibleProvider::new(
            "openai",
            "key",
            "gpt-4o-mini",
            "https://api.openai.com/v1/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
        assert_eq!(provider.name(), "openai");
    }
}
