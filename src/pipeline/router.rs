//! Node graph and conditional routing
//!
//! ```text
//! extract_intent ─┬─ error / chitchat ──────────────► generate_response
//!                 ├─ analytics ───────► query_database ─► generate_response
//!                 └─ search / detail / summarize
//!                        └─► resolve_entities ─► query_database ─► generate_response
//! ```

use crate::pipeline::state::{ConversationState, Intent};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineNode {
    ExtractIntent,
    ResolveEntities,
    QueryDatabase,
    GenerateResponse,
}

impl PipelineNode {
    pub const ENTRY: PipelineNode = PipelineNode::ExtractIntent;

    pub fn name(&self) -> &'static str {
        match self {
            PipelineNode::ExtractIntent => "extract_intent",
            PipelineNode::ResolveEntities => "resolve_entities",
            PipelineNode::QueryDatabase => "query_database",
            PipelineNode::GenerateResponse => "generate_response",
        }
    }
}

impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch taken after intent extraction.
pub fn route_by_intent(state: &ConversationState) -> PipelineNode {
    if state.error.is_some() {
        return PipelineNode::GenerateResponse;
    }
    match state.intent.unwrap_or(Intent::Chitchat) {
        Intent::Chitchat => PipelineNode::GenerateResponse,
        Intent::Analytics => PipelineNode::QueryDatabase,
        Intent::Search | Intent::Detail | Intent::Summarize => PipelineNode::ResolveEntities,
    }
}

/// `None` once the turn is finished.
pub fn next_node(current: PipelineNode, state: &ConversationState) -> Option<PipelineNode> {
    match current {
        PipelineNode::ExtractIntent => Some(route_by_intent(state)),
        PipelineNode::ResolveEntities => Some(PipelineNode::QueryDatabase),
        PipelineNode::QueryDatabase => Some(PipelineNode::GenerateResponse),
        PipelineNode::GenerateResponse => None,
    }
}
