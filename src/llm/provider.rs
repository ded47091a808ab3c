//! Provider contract shared by every LLM backend

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A chunk as reported by a backend's streaming protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// New text only.
    Delta(String),
    /// Full text generated so far.
    Snapshot(String),
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// Uniform text deltas after protocol normalization.
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Result shapes differ between backends; the gateway flattens them with
/// [`Completion::into_text`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Segments(Vec<String>),
    Structured(Value),
}

impl Completion {
    pub fn into_text(self) -> String {
        match self {
            Completion::Text(text) => text,
            Completion::Segments(parts) => parts.concat(),
            Completion::Structured(Value::String(text)) => text,
            Completion::Structured(Value::Null) => String::new(),
            Completion::Structured(other) => other.to_string(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion>;

    /// Backends without a streaming endpoint report the whole completion as a
    /// single snapshot.
    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<ChunkStream> {
        let text = self.complete(system_prompt, user_prompt).await?.into_text();
        Ok(Box::pin(futures::stream::once(async move {
            Ok(StreamChunk::Snapshot(text))
        })))
    }
}

/// Backends the gateway knows how to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Xai,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Xai, ProviderKind::OpenAi, ProviderKind::Anthropic];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Xai => "xai",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Xai => "XAI",
            ProviderKind::OpenAi => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Xai => "grok-2-1212",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-haiku-20240307",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Xai => "https://api.x.ai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "xai" | "grok" => Ok(ProviderKind::Xai),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(AssistantError::Config(format!("Unknown LLM provider '{}'", other))),
        }
    }
}
