//! Conversation state carried between pipeline nodes
//!
//! Plain data only: database handles and clients travel in the per-turn
//! context, so the whole state can be checkpointed as JSON.

use crate::db::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Detail,
    Summarize,
    Analytics,
    Chitchat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Search => "search",
            Intent::Detail => "detail",
            Intent::Summarize => "summarize",
            Intent::Analytics => "analytics",
            Intent::Chitchat => "chitchat",
        }
    }

    /// Classifier labels outside the known set become chitchat.
    pub fn coerce(label: &str) -> Intent {
        match label.trim().to_lowercase().as_str() {
            "search" => Intent::Search,
            "detail" => Intent::Detail,
            "summarize" => Intent::Summarize,
            "analytics" => Intent::Analytics,
            _ => Intent::Chitchat,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub query: String,
    pub session_id: String,
    pub intent: Option<Intent>,
    pub filters: Map<String, Value>,
    pub entity_to_resolve: Option<String>,
    pub resolved_ids: BTreeMap<String, i64>,
    pub results: Vec<Row>,
    pub response: String,
    pub messages: Vec<ChatMessage>,
    pub error: Option<String>,
}

impl ConversationState {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Start a new turn on top of a checkpointed one: history carries over,
    /// per-turn fields come from `self`.
    pub fn continue_from(mut self, previous: ConversationState) -> Self {
        let mut messages = previous.messages;
        messages.append(&mut self.messages);
        self.messages = messages;
        self
    }

    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(filters) = update.filters {
            self.filters = filters;
        }
        if let Some(entity) = update.entity_to_resolve {
            self.entity_to_resolve = entity;
        }
        if let Some(resolved_ids) = update.resolved_ids {
            self.resolved_ids = resolved_ids;
        }
        if let Some(results) = update.results {
            self.results = results;
        }
        if let Some(response) = update.response {
            self.response = response;
        }
        self.messages.extend(update.messages);
        if let Some(error) = update.error {
            self.error = Some(error);
        }
    }
}

/// Partial state produced by one node. Absent fields leave the state alone;
/// messages are appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_to_resolve: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_ids: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
