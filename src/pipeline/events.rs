//! Streaming events emitted while a turn runs

use crate::pipeline::router::PipelineNode;
use crate::pipeline::state::StateUpdate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A node finished; `output` is the update it produced.
    NodeCompleted { node: PipelineNode, output: StateUpdate },
    /// A piece of the narrated answer, emitted before `generate_response`
    /// completes.
    Token { delta: String },
    Done { session_id: String, response: String },
    /// Terminal; replaces `Done` when the turn could not complete.
    Error { message: String },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }

    /// One server-sent-event frame.
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "message": format!("unserializable event: {}", e)}).to_string()
        });
        format!("data: {}\n\n", payload)
    }
}
