//! Pipeline node implementations
//!
//! Each node reads the current state and returns a [`StateUpdate`]. Nodes
//! that can fail return `Err`; the orchestrator turns that into an error
//! update so the turn still ends with a response.

use crate::analytics::{AnalyticsOutcome, QueryCascade};
use crate::db::{RecordStore, SqlExecutor, VisitQuery};
use crate::entity_resolver::EntityResolver;
use crate::error::{AssistantError, Result};
use crate::fields::FieldAccess;
use crate::llm::{strip_code_fences, ProviderGateway};
use crate::pipeline::prompts::{
    apology, intent_prompt, narration_prompt, FALLBACK_RESPONSE, INTENT_SYSTEM_PROMPT, NARRATOR_SYSTEM_PROMPT,
};
use crate::pipeline::state::{ChatMessage, ConversationState, Intent, StateUpdate};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// I/O handles for one turn. Supplied per invocation and never stored in
/// the conversation state.
#[derive(Clone)]
pub struct TurnContext {
    pub records: Arc<dyn RecordStore>,
    pub executor: Arc<dyn SqlExecutor>,
}

impl TurnContext {
    pub fn new(records: Arc<dyn RecordStore>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self { records, executor }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub filters: Map<String, Value>,
    pub entity_to_resolve: Option<String>,
}

/// Parse classifier output. Anything that is not a JSON object is a
/// `Classification` error; an unknown intent label is coerced to chitchat.
pub fn parse_classification(reply: &str) -> Result<Classification> {
    let value: Value = serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| AssistantError::Classification(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(AssistantError::Classification(format!(
            "expected a JSON object, got {}",
            value
        )));
    }
    Ok(Classification {
        intent: Intent::coerce(value.text_or("intent", "chitchat")),
        filters: value.object("filters").cloned().unwrap_or_default(),
        entity_to_resolve: value.text("entity_to_resolve").map(str::to_string),
    })
}

pub async fn extract_intent(gateway: &ProviderGateway, state: &ConversationState) -> Result<StateUpdate> {
    let reply = gateway.complete(INTENT_SYSTEM_PROMPT, &intent_prompt(state)).await?;
    let classification = match parse_classification(&reply) {
        Ok(c) => c,
        Err(e) => {
            warn!("{}; defaulting to chitchat", e);
            Classification {
                intent: Intent::Chitchat,
                filters: Map::new(),
                entity_to_resolve: None,
            }
        }
    };
    info!(
        "Extracted intent: {}, filters: {}",
        classification.intent,
        serde_json::Value::Object(classification.filters.clone())
    );
    Ok(StateUpdate {
        intent: Some(classification.intent),
        filters: Some(classification.filters),
        entity_to_resolve: Some(classification.entity_to_resolve),
        ..StateUpdate::default()
    })
}

pub async fn resolve_entities(
    resolver: &EntityResolver,
    records: &dyn RecordStore,
    state: &ConversationState,
) -> Result<StateUpdate> {
    if state.error.is_some() {
        return Ok(StateUpdate::default());
    }
    let resolution = resolver.resolve(records, state.entity_to_resolve.as_deref()).await?;
    Ok(StateUpdate {
        resolved_ids: Some(resolution.resolved_ids()),
        ..StateUpdate::default()
    })
}

/// Accepts `YYYY-MM-DD` or any timestamp that starts with one.
fn parse_filter_date(filters: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    let raw = filters.text(key)?;
    let parsed = raw
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());
    if parsed.is_none() {
        warn!("Ignoring unparseable {} filter: {}", key, raw);
    }
    parsed
}

pub fn visit_query(state: &ConversationState) -> VisitQuery {
    VisitQuery {
        patient_id: state.resolved_ids.get("patient_id").copied(),
        date_start: parse_filter_date(&state.filters, "date_start"),
        date_end: parse_filter_date(&state.filters, "date_end"),
        diagnosis: state.filters.text("diagnosis").map(str::to_string),
        ..VisitQuery::default()
    }
}

pub async fn query_database(
    cascade: &QueryCascade,
    context: &TurnContext,
    state: &ConversationState,
) -> Result<StateUpdate> {
    if state.error.is_some() {
        return Ok(StateUpdate::default());
    }

    if state.intent == Some(Intent::Analytics) {
        return match cascade.resolve(&state.query, context.executor.as_ref(), false).await {
            AnalyticsOutcome::Answered(answer) => {
                info!("Analytics answered from {:?} with {} rows", answer.source, answer.row_count);
                Ok(StateUpdate {
                    results: Some(answer.rows),
                    ..StateUpdate::default()
                })
            }
            AnalyticsOutcome::Failed(failure) => Err(AssistantError::Analytics(failure.error)),
        };
    }

    let rows = context.records.recent_visits(&visit_query(state)).await?;
    info!("Query returned {} results", rows.len());
    Ok(StateUpdate {
        results: Some(rows),
        ..StateUpdate::default()
    })
}

/// Final update for a turn that produced `response`.
pub fn response_update(state: &ConversationState, response: String) -> StateUpdate {
    StateUpdate {
        messages: vec![ChatMessage::user(&state.query), ChatMessage::assistant(&response)],
        response: Some(response),
        ..StateUpdate::default()
    }
}

/// Reply used when narration itself fails; records the failure on the turn.
pub fn fallback_update(state: &ConversationState, error: &AssistantError) -> StateUpdate {
    StateUpdate {
        error: Some(error.to_string()),
        ..response_update(state, FALLBACK_RESPONSE.to_string())
    }
}

/// Always yields a well-formed reply. Errors from earlier nodes produce an
/// apology without any model call.
pub async fn generate_response(gateway: &ProviderGateway, state: &ConversationState) -> StateUpdate {
    if let Some(error) = &state.error {
        return response_update(state, apology(error));
    }
    match gateway.complete(NARRATOR_SYSTEM_PROMPT, &narration_prompt(state)).await {
        Ok(text) => {
            info!("Generated response for intent: {:?}", state.intent);
            response_update(state, text.trim().to_string())
        }
        Err(e) => {
            warn!("Response generation failed: {}", e);
            fallback_update(state, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_classification() {
        let c = parse_classification(
            r#"```json
{"intent": "search", "filters": {"diagnosis": "diabetes"}, "entity_to_resolve": "John Smith"}
```"#,
        )
        .unwrap();
        assert_eq!(c.intent, Intent::Search);
        assert_eq!(c.filters.get("diagnosis"), Some(&json!("diabetes")));
        assert_eq!(c.entity_to_resolve.as_deref(), Some("John Smith"));
    }

    #[test]
    fn test_unknown_intent_and_missing_fields() {
        let c = parse_classification(r#"{"intent": "triage", "entity_to_resolve": null}"#).unwrap();
        assert_eq!(c.intent, Intent::Chitchat);
        assert!(c.filters.is_empty());
        assert!(c.entity_to_resolve.is_none());
    }

    #[test]
    fn test_unparseable_classification() {
        assert!(matches!(
            parse_classification("I think this is a search"),
            Err(AssistantError::Classification(_))
        ));
        assert!(matches!(
            parse_classification(r#"["search"]"#),
            Err(AssistantError::Classification(_))
        ));
    }

    #[test]
    fn test_visit_query_from_state() {
        let mut state = ConversationState::new("q", "s");
        state.resolved_ids.insert("patient_id".into(), 7);
        state.filters = json!({
            "date_start": "2024-01-01",
            "date_end": "2024-01-31T23:59:59",
            "diagnosis": " asthma ",
            "patient_name": "ignored"
        })
        .as_object()
        .cloned()
        .unwrap();
        let query = visit_query(&state);
        assert_eq!(query.patient_id, Some(7));
        assert_eq!(query.date_start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(query.date_end, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(query.diagnosis.as_deref(), Some("asthma"));
        assert_eq!(query.limit, 20);

        state.filters = json!({"date_start": "last month"}).as_object().cloned().unwrap();
        assert_eq!(visit_query(&state).date_start, None);
    }

    #[test]
    fn test_fallback_update_records_error() {
        let state = ConversationState::new("q", "s");
        let update = fallback_update(&state, &AssistantError::AllProvidersFailed("x".into()));
        assert_eq!(update.response.as_deref(), Some(FALLBACK_RESPONSE));
        assert_eq!(update.messages.len(), 2);
        assert!(update.error.unwrap().contains("All AI providers failed"));
    }
}
