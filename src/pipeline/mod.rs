//! Conversational pipeline
//!
//! A turn flows through `extract_intent`, then optionally `resolve_entities`
//! and `query_database`, and always ends in `generate_response`.

pub mod checkpoint;
pub mod events;
pub mod nodes;
pub mod orchestrator;
pub mod prompts;
pub mod router;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, PgCheckpointStore};
pub use events::PipelineEvent;
pub use nodes::TurnContext;
pub use orchestrator::Pipeline;
pub use router::{next_node, route_by_intent, PipelineNode};
pub use state::{ChatMessage, ConversationState, Intent, Role, StateUpdate};
