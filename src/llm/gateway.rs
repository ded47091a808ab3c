//! Provider fallback gateway
//!
//! Tries LLM backends in priority order. Uninitialized entries are skipped,
//! the first success wins, and the caller only sees an error once every
//! provider has failed.

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::openai::OpenAiCompatibleProvider;
use crate::llm::provider::{DeltaStream, LlmProvider, ProviderKind};
use crate::llm::stream::DeltaNormalizer;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One backend slot. `provider` is `None` when the credential is missing or
/// the client could not be built.
pub struct ProviderEntry {
    pub name: String,
    pub priority: usize,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl ProviderEntry {
    pub fn available(name: impl Into<String>, priority: usize, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            priority,
            provider: Some(provider),
        }
    }

    pub fn unavailable(name: impl Into<String>, priority: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            provider: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: usize,
    pub available: bool,
}

pub struct ProviderGateway {
    entries: Vec<ProviderEntry>,
}

impl ProviderGateway {
    pub fn new(mut entries: Vec<ProviderEntry>) -> Self {
        entries.sort_by_key(|entry| entry.priority);
        Self { entries }
    }

    /// Every provider is available; priority follows vector order.
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let entries = providers
            .into_iter()
            .enumerate()
            .map(|(priority, provider)| {
                ProviderEntry::available(provider.name().to_string(), priority, provider)
            })
            .collect();
        Self::new(entries)
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        let mut entries = Vec::new();
        for (priority, settings) in config.providers.iter().enumerate() {
            let name = settings.kind.name();
            let Some(api_key) = settings.api_key.as_deref() else {
                warn!("{} API key not set; provider disabled", settings.kind.env_prefix());
                entries.push(ProviderEntry::unavailable(name, priority));
                continue;
            };

            let built: Result<Arc<dyn LlmProvider>> = match settings.kind {
                ProviderKind::Xai | ProviderKind::OpenAi => OpenAiCompatibleProvider::new(
                    name,
                    api_key,
                    settings.model.clone(),
                    &settings.base_url,
                    config.llm_timeout,
                )
                .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => AnthropicProvider::new(
                    api_key,
                    settings.model.clone(),
                    &settings.base_url,
                    config.llm_timeout,
                )
                .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match built {
                Ok(provider) => {
                    info!("Initialized {} provider (model {})", name, settings.model);
                    entries.push(ProviderEntry::available(name, priority, provider));
                }
                Err(e) => {
                    warn!("Failed to initialize {} provider: {}", name, e);
                    entries.push(ProviderEntry::unavailable(name, priority));
                }
            }
        }
        Self::new(entries)
    }

    pub fn available_providers(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.is_available())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        self.entries
            .iter()
            .map(|entry| ProviderStatus {
                name: entry.name.clone(),
                priority: entry.priority,
                available: entry.is_available(),
            })
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = (&str, &Arc<dyn LlmProvider>)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.provider.as_ref().map(|p| (entry.name.as_str(), p)))
    }

    fn exhausted(failures: Vec<String>) -> AssistantError {
        if failures.is_empty() {
            AssistantError::AllProvidersFailed("no providers configured".to_string())
        } else {
            AssistantError::AllProvidersFailed(failures.join("; "))
        }
    }

    /// First successful completion, flattened to plain text.
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut failures = Vec::new();
        for (name, provider) in self.live() {
            info!("Trying provider {}", name);
            match provider.complete(system_prompt, user_prompt).await {
                Ok(completion) => {
                    let text = completion.into_text();
                    if text.trim().is_empty() {
                        warn!("Provider {} returned empty text", name);
                        failures.push(format!("{}: empty response", name));
                        continue;
                    }
                    info!("Provider {} succeeded", name);
                    return Ok(text);
                }
                Err(e) => {
                    warn!("Provider {} failed: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }
        Err(Self::exhausted(failures))
    }

    /// Delta stream from the first provider that produces any text. Once a
    /// delta has been handed out there is no fallback: later failures surface
    /// as `Stream` errors.
    pub async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<DeltaStream> {
        let mut failures = Vec::new();
        for (name, provider) in self.live() {
            info!("Streaming from provider {}", name);
            let mut chunks = match provider.stream(system_prompt, user_prompt).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Provider {} failed to start stream: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            let mut normalizer = DeltaNormalizer::default();
            let first = loop {
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        if let Some(delta) = normalizer.push(chunk) {
                            break Ok(Some(delta));
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(None),
                }
            };

            match first {
                Ok(Some(first_delta)) => {
                    let name = name.to_string();
                    return Ok(Box::pin(async_stream::try_stream! {
                        yield first_delta;
                        while let Some(chunk) = chunks.next().await {
                            let chunk = chunk.map_err(|e| {
                                AssistantError::Stream(format!("{} stream interrupted: {}", name, e))
                            })?;
                            if let Some(delta) = normalizer.push(chunk) {
                                yield delta;
                            }
                        }
                    }));
                }
                Ok(None) => {
                    warn!("Provider {} produced an empty stream", name);
                    failures.push(format!("{}: empty stream", name));
                }
                Err(e) => {
                    warn!("Provider {} failed before first token: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }
        Err(Self::exhausted(failures))
    }
}
