pub mod analytics;
pub mod config;
pub mod db;
pub mod entity_resolver;
pub mod error;
pub mod fields;
pub mod llm;
pub mod observability;
pub mod pipeline;

pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
