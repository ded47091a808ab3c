//! Mock LLM provider for tests
//!
//! Lets the gateway, cascade and pipeline run end to end without network
//! access. Replies can be fixed, failing, scripted per call or computed from
//! the prompts.

use crate::error::{AssistantError, Result};
use crate::llm::provider::{ChunkStream, Completion, LlmProvider, StreamChunk};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Router = Box<dyn Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync>;

enum Behavior {
    Reply(String),
    Fail(String),
    Script(Mutex<VecDeque<std::result::Result<String, String>>>),
    Route(Router),
}

/// How `stream` reports the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStyle {
    /// One delta per word.
    Deltas,
    /// Growing snapshots of the full text.
    Cumulative,
    /// `n` deltas, then a stream error.
    FailAfter(usize),
}

pub struct MockProvider {
    name: String,
    behavior: Behavior,
    stream_style: StreamStyle,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    prompts: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    fn with_behavior(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            stream_style: StreamStyle::Deltas,
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::Reply(reply.into()))
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::Fail(message.into()))
    }

    /// Replies are consumed one per call; an exhausted script fails.
    pub fn scripted(name: impl Into<String>, replies: Vec<std::result::Result<String, String>>) -> Self {
        Self::with_behavior(name, Behavior::Script(Mutex::new(replies.into())))
    }

    /// The closure receives `(system_prompt, user_prompt)`.
    pub fn routing<F>(name: impl Into<String>, router: F) -> Self
    where
        F: Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        Self::with_behavior(name, Behavior::Route(Box::new(router)))
    }

    pub fn with_stream_style(mut self, style: StreamStyle) -> Self {
        self.stream_style = style;
        self
    }

    /// Number of `complete` and `stream` invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn respond(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((system_prompt.to_string(), user_prompt.to_string()));

        let reply = match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail(message) => Err(message.clone()),
            Behavior::Script(queue) => queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Err("mock script exhausted".to_string())),
            Behavior::Route(router) => router(system_prompt, user_prompt),
        };
        reply.map_err(|message| AssistantError::Llm(format!("{}: {}", self.name, message)))
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        self.respond(system_prompt, user_prompt).map(Completion::Text)
    }

    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<ChunkStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let text = self.respond(system_prompt, user_prompt)?;
        let words: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();

        let chunks: Vec<Result<StreamChunk>> = match self.stream_style {
            StreamStyle::Deltas => words.into_iter().map(|w| Ok(StreamChunk::Delta(w))).collect(),
            StreamStyle::Cumulative => {
                let mut so_far = String::new();
                words
                    .into_iter()
                    .map(|w| {
                        so_far.push_str(&w);
                        Ok(StreamChunk::Snapshot(so_far.clone()))
                    })
                    .collect()
            }
            StreamStyle::FailAfter(n) => words
                .into_iter()
                .take(n)
                .map(|w| Ok(StreamChunk::Delta(w)))
                .chain(std::iter::once(Err(AssistantError::Stream(format!(
                    "{}: connection reset",
                    self.name
                )))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
