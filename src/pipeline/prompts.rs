//! Prompts for intent classification and answer narration

use crate::pipeline::state::{ChatMessage, ConversationState, Role};

pub const HISTORY_WINDOW: usize = 5;
pub const PREVIEW_ROWS: usize = 10;

pub const INTENT_SYSTEM_PROMPT: &str = r#"You are an intent classifier for a medical assistant.
Given a user query, extract:
1. intent: One of "search", "detail", "summarize", "analytics", "chitchat"
2. filters: Relevant filters like patient_name, date_start, date_end (YYYY-MM-DD), diagnosis
3. entity_to_resolve: Any name that needs to be looked up (e.g., "John Smith")

Return ONLY valid JSON:
{"intent": "search", "filters": {"patient_name": "..."}, "entity_to_resolve": null}

Examples:
- "Show me patients with diabetes" -> {"intent": "search", "filters": {"diagnosis": "diabetes"}, "entity_to_resolve": null}
- "What visits did John Smith have?" -> {"intent": "search", "filters": {}, "entity_to_resolve": "John Smith"}
- "How many patients visited last month?" -> {"intent": "analytics", "filters": {}, "entity_to_resolve": null}
- "Hello" -> {"intent": "chitchat", "filters": {}, "entity_to_resolve": null}"#;

pub const NARRATOR_SYSTEM_PROMPT: &str = "You are a helpful medical assistant for doctors.
Generate professional, concise responses based on query results.
Always cite specific data from results when available.
Be clear and actionable in your responses.";

pub const FALLBACK_RESPONSE: &str = "I apologize, but I couldn't generate a response. Please try again.";

fn render_history(messages: &[ChatMessage]) -> String {
    let start = messages.len().saturating_sub(HISTORY_WINDOW);
    messages[start..]
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn intent_prompt(state: &ConversationState) -> String {
    let history = render_history(&state.messages);
    format!(
        "Query: {}\nRecent conversation:\n{}",
        state.query,
        if history.is_empty() { "(none)" } else { history.as_str() }
    )
}

pub fn narration_prompt(state: &ConversationState) -> String {
    let summary = if state.results.is_empty() {
        "No results found".to_string()
    } else {
        format!("{} results found", state.results.len())
    };
    let preview: Vec<_> = state.results.iter().take(PREVIEW_ROWS).collect();
    format!(
        "User Query: {}\nIntent: {}\nResults: {}\nSummary: {}\n\n\
         Generate a helpful, professional response for a medical professional.\n\
         If there are results, summarize them clearly. If no results, suggest alternatives.",
        state.query,
        state.intent.map(|i| i.as_str()).unwrap_or("unknown"),
        serde_json::to_string(&preview).unwrap_or_default(),
        summary
    )
}

pub fn apology(error: &str) -> String {
    format!(
        "I encountered an issue: {}. Please try rephrasing your question.",
        error
    )
}
