//! Per-session checkpoints
//!
//! The full conversation state is saved under the session id after every
//! turn and loaded at the start of the next one.

use crate::error::{AssistantError, Result};
use crate::pipeline::state::ConversationState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row as _;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub state: ConversationState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>, state: ConversationState) -> Self {
        Self {
            session_id: session_id.into(),
            state,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Returns whether a checkpoint existed.
    async fn delete(&self, session_id: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(session_id).map(|c| c.value().clone()))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.checkpoints.remove(session_id).is_some())
    }
}

/// Checkpoints in a `conversation_checkpoints` table, state as JSONB.
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_checkpoints (
                session_id TEXT PRIMARY KEY,
                state JSONB NOT NULL,
                saved_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AssistantError::Checkpoint(format!("Failed to create checkpoint table: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT state, saved_at FROM conversation_checkpoints WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AssistantError::Checkpoint(format!("Failed to load checkpoint: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: Json<ConversationState> = row
            .try_get("state")
            .map_err(|e| AssistantError::Checkpoint(format!("Corrupt checkpoint for {}: {}", session_id, e)))?;
        let saved_at: DateTime<Utc> = row
            .try_get("saved_at")
            .map_err(|e| AssistantError::Checkpoint(e.to_string()))?;
        Ok(Some(Checkpoint {
            session_id: session_id.to_string(),
            state: state.0,
            saved_at,
        }))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_checkpoints (session_id, state, saved_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO UPDATE SET state = EXCLUDED.state, saved_at = EXCLUDED.saved_at
            "#,
        )
        .bind(&checkpoint.session_id)
        .bind(Json(&checkpoint.state))
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AssistantError::Checkpoint(format!("Failed to save checkpoint: {}", e)))?;
        debug!("Saved checkpoint for session {}", checkpoint.session_id);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversation_checkpoints WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AssistantError::Checkpoint(format!("Failed to delete checkpoint: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}
