//! Anthropic Messages API client
//!
//! Non-streaming replies arrive as a list of content blocks and are reported as
//! [`Completion::Segments`]. Streaming decodes `content_block_delta` events.

use crate::error::{AssistantError, Result};
use crate::llm::provider::{ChunkStream, Completion, LlmProvider, StreamChunk};
use crate::llm::stream::sse_data;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(
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
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
            "temperature": 0.1,
            "stream": stream,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("anthropic API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Llm(format!(
                "anthropic API error ({}): {}",
                status, error_text
            )));
        }
        Ok(response)
    }
}

pub fn completion_from_message(response: &Value) -> Result<Completion> {
    if let Some(error) = response.get("error") {
        return Err(AssistantError::Llm(format!("LLM API error: {}", error)));
    }
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AssistantError::Llm(format!("No content in LLM response: {}", response)))?;

    let segments: Vec<String> = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    if segments.iter().all(|s| s.trim().is_empty()) {
        return Err(AssistantError::Llm("Empty content in LLM response".to_string()));
    }
    Ok(Completion::Segments(segments))
}

/// Decode one SSE payload. Only text deltas carry content; `error` events fail
/// the stream.
pub fn delta_from_event(data: &str) -> Result<Option<String>> {
    let event: Value = serde_json::from_str(data)
        .map_err(|e| AssistantError::Stream(format!("Malformed stream chunk: {}", e)))?;
    match event.get("type").and_then(Value::as_str) {
        Some("error") => Err(AssistantError::Stream(format!(
            "LLM stream error: {}",
            event.get("error").unwrap_or(&Value::Null)
        ))),
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)),
        _ => Ok(None),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let body = self.request_body(system_prompt, user_prompt, false);
        let response = self.post(&body).await?;
        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        completion_from_message(&response_json)
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
