//! LLM access
//!
//! Backends implement [`LlmProvider`]; everything else in the crate talks to
//! them through [`ProviderGateway`].

pub mod anthropic;
pub mod gateway;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod stream;

pub use gateway::{ProviderEntry, ProviderGateway, ProviderStatus};
pub use provider::{ChunkStream, Completion, DeltaStream, LlmProvider, ProviderKind, StreamChunk};

/// Body of the first markdown code fence, or the trimmed text when there is
/// none. A single word on the opening fence line is a language tag and is
/// dropped; anything longer is content.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[start + 3..];
    let body = match after_open.find('\n') {
        Some(newline) if !after_open[..newline].trim().contains(char::is_whitespace) => {
            &after_open[newline + 1..]
        }
        _ => after_open,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
