//! Conversational turn orchestration
//!
//! Runs the node graph for one turn, checkpoints the resulting state under
//! the session id and optionally streams progress. Turns for the same
//! session are serialized; different sessions run independently.

use crate::analytics::QueryCascade;
use crate::entity_resolver::EntityResolver;
use crate::error::{AssistantError, Result};
use crate::llm::ProviderGateway;
use crate::pipeline::checkpoint::{Checkpoint, CheckpointStore};
use crate::pipeline::events::PipelineEvent;
use crate::pipeline::nodes::{self, TurnContext};
use crate::pipeline::prompts::{narration_prompt, NARRATOR_SYSTEM_PROMPT};
use crate::pipeline::router::{next_node, PipelineNode};
use crate::pipeline::state::{ChatMessage, ConversationState, StateUpdate};
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Holds a session's turn lock; dropping it releases the lock and forgets
/// the session's mutex once nobody else is waiting on it.
struct SessionTurn<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct Pipeline {
    gateway: Arc<ProviderGateway>,
    cascade: Arc<QueryCascade>,
    resolver: EntityResolver,
    checkpoints: Arc<dyn CheckpointStore>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        cascade: Arc<QueryCascade>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            gateway,
            cascade,
            resolver: EntityResolver::default(),
            checkpoints,
            session_locks: DashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn cascade(&self) -> &QueryCascade {
        &self.cascade
    }

    async fn acquire_session(&self, session_id: &str) -> SessionTurn<'_> {
        let lock = self
            .session_locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        SessionTurn {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of sessions with a turn running or waiting.
    pub fn active_sessions(&self) -> usize {
        self.session_locks.len()
    }

    async fn begin_turn(&self, initial: ConversationState, session_id: &str) -> Result<ConversationState> {
        let mut state = initial;
        state.session_id = session_id.to_string();
        match self.checkpoints.load(session_id).await? {
            Some(checkpoint) => {
                debug!(
                    "Resuming session {} with {} messages",
                    session_id,
                    checkpoint.state.messages.len()
                );
                Ok(state.continue_from(checkpoint.state))
            }
            None => Ok(state),
        }
    }

    async fn finish_turn(&self, state: &ConversationState) -> Result<()> {
        self.checkpoints
            .save(&Checkpoint::new(state.session_id.clone(), state.clone()))
            .await?;
        info!("Checkpointed session {}", state.session_id);
        Ok(())
    }

    async fn run_node(&self, node: PipelineNode, state: &ConversationState, context: &TurnContext) -> StateUpdate {
        let (stage, result) = match node {
            PipelineNode::ExtractIntent => (
                "Intent extraction",
                nodes::extract_intent(&self.gateway, state).await,
            ),
            PipelineNode::ResolveEntities => (
                "Entity resolution",
                nodes::resolve_entities(&self.resolver, context.records.as_ref(), state).await,
            ),
            PipelineNode::QueryDatabase => (
                "Database query",
                nodes::query_database(&self.cascade, context, state).await,
            ),
            PipelineNode::GenerateResponse => {
                return nodes::generate_response(&self.gateway, state).await;
            }
        };
        match result {
            Ok(update) => update,
            Err(e) => {
                warn!("{} failed: {}", stage, e);
                StateUpdate::error(format!("{} failed: {}", stage, e))
            }
        }
    }

    /// Run one turn to completion and checkpoint it.
    pub async fn invoke(
        &self,
        initial: ConversationState,
        session_id: &str,
        context: &TurnContext,
    ) -> Result<ConversationState> {
        let _turn = self.acquire_session(session_id).await;
        let mut state = self.begin_turn(initial, session_id).await?;

        let mut node = Some(PipelineNode::ENTRY);
        while let Some(current) = node {
            debug!("Running node {}", current);
            let update = self.run_node(current, &state, context).await;
            state.apply(update);
            node = next_node(current, &state);
        }

        self.finish_turn(&state).await?;
        Ok(state)
    }

    /// Run one turn, emitting an event per completed node and narration
    /// tokens as they arrive. The stream always ends with `Done` or `Error`.
    pub fn stream(
        self: Arc<Self>,
        initial: ConversationState,
        session_id: impl Into<String>,
        context: TurnContext,
    ) -> BoxStream<'static, PipelineEvent> {
        let pipeline = self;
        let session_id = session_id.into();
        Box::pin(async_stream::stream! {
            let _turn = pipeline.acquire_session(&session_id).await;
            let mut state = match pipeline.begin_turn(initial, &session_id).await {
                Ok(state) => state,
                Err(e) => {
                    yield PipelineEvent::Error { message: e.to_string() };
                    return;
                }
            };

            let mut narration_error: Option<AssistantError> = None;
            let mut node = Some(PipelineNode::ENTRY);
            while let Some(current) = node {
                let update = if current == PipelineNode::GenerateResponse && state.error.is_none() {
                    match pipeline
                        .gateway
                        .stream(NARRATOR_SYSTEM_PROMPT, &narration_prompt(&state))
                        .await
                    {
                        Ok(mut deltas) => {
                            let mut text = String::new();
                            let mut interrupted = None;
                            while let Some(delta) = deltas.next().await {
                                match delta {
                                    Ok(delta) => {
                                        text.push_str(&delta);
                                        yield PipelineEvent::Token { delta };
                                    }
                                    Err(e) => {
                                        interrupted = Some(e);
                                        break;
                                    }
                                }
                            }
                            match interrupted {
                                None => nodes::response_update(&state, text.trim().to_string()),
                                Some(e) => {
                                    warn!("Narration stream interrupted: {}", e);
                                    let update = nodes::fallback_update(&state, &e);
                                    narration_error = Some(e);
                                    update
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Narration stream failed to start: {}", e);
                            let update = nodes::fallback_update(&state, &e);
                            narration_error = Some(e);
                            update
                        }
                    }
                } else {
                    pipeline.run_node(current, &state, &context).await
                };

                yield PipelineEvent::NodeCompleted { node: current, output: update.clone() };
                state.apply(update);
                node = next_node(current, &state);
            }

            if let Err(e) = pipeline.finish_turn(&state).await {
                yield PipelineEvent::Error { message: e.to_string() };
                return;
            }
            match narration_error {
                Some(e) => {
                    yield PipelineEvent::Error { message: e.to_string() };
                }
                None => {
                    yield PipelineEvent::Done {
                        session_id: session_id.clone(),
                        response: state.response.clone(),
                    };
                }
            }
        })
    }

    /// Message history from the session's last checkpoint.
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .checkpoints
            .load(session_id)
            .await?
            .map(|checkpoint| checkpoint.state.messages)
            .unwrap_or_default())
    }

    pub async fn reset(&self, session_id: &str) -> Result<bool> {
        self.checkpoints.delete(session_id).await
    }
}
