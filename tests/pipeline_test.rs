mod common;

use common::{assistant_llm, cascade, classification, harness, row, sample_records, ReadOnlyCheckpointStore};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use visit_assistant::db::{InMemoryRecordStore, StaticExecutor};
use visit_assistant::entity_resolver::EntityResolver;
use visit_assistant::llm::mock::{MockProvider, StreamStyle};
use visit_assistant::llm::{LlmProvider, ProviderGateway};
use visit_assistant::pipeline::prompts::{FALLBACK_RESPONSE, NARRATOR_SYSTEM_PROMPT};
use visit_assistant::pipeline::{
    ConversationState, Intent, Pipeline, PipelineEvent, PipelineNode, Role, TurnContext,
};
use visit_assistant::AssistantError;

fn providers(llm: MockProvider) -> (Arc<MockProvider>, Vec<Arc<dyn LlmProvider>>) {
    let llm = Arc::new(llm);
    (llm.clone(), vec![llm as Arc<dyn LlmProvider>])
}

#[tokio::test]
async fn test_chitchat_skips_the_database() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "Hello! How can I help with your patients today?",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let state = h
        .pipeline
        .invoke(ConversationState::new("Hello", "s1"), "s1", &h.context)
        .await
        .unwrap();

    assert_eq!(state.intent, Some(Intent::Chitchat));
    assert_eq!(state.response, "Hello! How can I help with your patients today?");
    assert!(state.error.is_none());
    assert!(state.results.is_empty());
    assert_eq!(h.records.patient_lookups(), 0);
    assert_eq!(h.records.visit_lookups(), 0);
    assert_eq!(h.executor.calls(), 0);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.messages[0].content, "Hello");
}

#[tokio::test]
async fn test_search_resolves_patient_and_filters_visits() {
    let (llm, providers) = providers(assistant_llm(
        "primary",
        classification("search", Some("John Smith")),
        "SELECT 1;",
        "John Smith had two visits.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let state = h
        .pipeline
        .invoke(
            ConversationState::new("What visits did John Smith have?", "s1"),
            "s1",
            &h.context,
        )
        .await
        .unwrap();

    assert_eq!(state.intent, Some(Intent::Search));
    assert_eq!(state.resolved_ids.get("patient_id"), Some(&1));
    let ids: Vec<_> = state.results.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(11), json!(10)]);
    assert_eq!(state.response, "John Smith had two visits.");
    assert_eq!(h.executor.calls(), 0);

    let (system, user) = llm.prompts().last().cloned().unwrap();
    assert_eq!(system, NARRATOR_SYSTEM_PROMPT);
    assert!(user.contains("2 results found"));
}

#[tokio::test]
async fn test_search_by_diagnosis_filter() {
    let reply = json!({
        "intent": "search",
        "filters": {"diagnosis": "diabetes"},
        "entity_to_resolve": null
    })
    .to_string();
    let (_, providers) = providers(assistant_llm("primary", reply, "SELECT 1;", "One visit."));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let state = h
        .pipeline
        .invoke(
            ConversationState::new("Show me patients with diabetes", "s1"),
            "s1",
            &h.context,
        )
        .await
        .unwrap();

    assert!(state.resolved_ids.is_empty());
    assert_eq!(h.records.patient_lookups(), 0);
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.results[0]["diagnosis"], json!("Type 2 diabetes"));
}

#[tokio::test]
async fn test_analytics_runs_through_cascade() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("analytics", None),
        "SELECT 1;",
        "You have 42 patients.",
    ));
    let h = harness(
        providers,
        sample_records(),
        StaticExecutor::returning(vec![row(&[("patient_count", json!(42))])]),
    );

    let state = h
        .pipeline
        .invoke(
            ConversationState::new("How many patients do we have?", "s1"),
            "s1",
            &h.context,
        )
        .await
        .unwrap();

    assert_eq!(state.intent, Some(Intent::Analytics));
    assert_eq!(state.results, vec![row(&[("patient_count", json!(42.0))])]);
    assert_eq!(h.executor.executed(), vec!["SELECT COUNT(*) as patient_count FROM patients;"]);
    assert_eq!(h.records.visit_lookups(), 0);
    assert_eq!(h.records.patient_lookups(), 0);
    assert_eq!(state.response, "You have 42 patients.");
}

#[tokio::test]
async fn test_analytics_failure_becomes_apology() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("analytics", None),
        "SELECT 1;",
        "unused",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::failing("connection refused"));

    let state = h
        .pipeline
        .invoke(ConversationState::new("How many patients?", "s1"), "s1", &h.context)
        .await
        .unwrap();

    let error = state.error.clone().unwrap();
    assert!(error.starts_with("Database query failed:"));
    assert!(error.contains("connection refused"));
    assert!(state.response.starts_with("I encountered an issue: Database query failed:"));
    assert!(state.results.is_empty());
}

#[tokio::test]
async fn test_unparseable_classification_defaults_to_chitchat() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        "Sure! This looks like a search to me.".to_string(),
        "SELECT 1;",
        "Happy to help.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let state = h
        .pipeline
        .invoke(ConversationState::new("Find John", "s1"), "s1", &h.context)
        .await
        .unwrap();

    assert_eq!(state.intent, Some(Intent::Chitchat));
    assert!(state.error.is_none());
    assert_eq!(h.records.patient_lookups(), 0);
    assert_eq!(state.response, "Happy to help.");
}

#[tokio::test]
async fn test_all_providers_failing_yields_apology() {
    let a = Arc::new(MockProvider::failing("a", "timeout"));
    let b = Arc::new(MockProvider::failing("b", "overloaded"));
    let h = harness(
        vec![a as Arc<dyn LlmProvider>, b as Arc<dyn LlmProvider>],
        sample_records(),
        StaticExecutor::returning(vec![]),
    );

    let state = h
        .pipeline
        .invoke(ConversationState::new("Hello", "s1"), "s1", &h.context)
        .await
        .unwrap();

    assert!(state
        .error
        .as_deref()
        .unwrap()
        .starts_with("Intent extraction failed: All AI providers failed"));
    assert!(state.response.starts_with("I encountered an issue:"));
    assert_eq!(h.records.visit_lookups(), 0);
    assert_eq!(state.messages.len(), 2);
}

#[tokio::test]
async fn test_history_carries_across_turns() {
    let (llm, providers) = providers(assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "Hi there.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    h.pipeline
        .invoke(ConversationState::new("Hello", "s1"), "s1", &h.context)
        .await
        .unwrap();
    let second = h
        .pipeline
        .invoke(ConversationState::new("Thanks", "s1"), "s1", &h.context)
        .await
        .unwrap();

    let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Hello", "Hi there.", "Thanks", "Hi there."]);

    let history = h.pipeline.history("s1").await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(h.pipeline.history("other").await.unwrap().is_empty());

    // The second classification saw the first exchange.
    let classifier_prompts: Vec<_> = llm
        .prompts()
        .into_iter()
        .filter(|(system, _)| system != NARRATOR_SYSTEM_PROMPT)
        .collect();
    assert!(classifier_prompts[1].1.contains("user: Hello"));

    assert!(h.pipeline.reset("s1").await.unwrap());
    assert!(h.pipeline.history("s1").await.unwrap().is_empty());
    assert_eq!(h.checkpoints.len(), 0);
    assert_eq!(h.pipeline.active_sessions(), 0);
}

#[tokio::test]
async fn test_stream_emits_nodes_tokens_then_done() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("search", Some("Mary Jones")),
        "SELECT 1;",
        "Mary Jones had influenza.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let events: Vec<PipelineEvent> = h
        .pipeline
        .clone()
        .stream(ConversationState::new("Show Mary Jones", "s2"), "s2", h.context.clone())
        .collect()
        .await;

    let nodes: Vec<PipelineNode> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::NodeCompleted { node, .. } => Some(*node),
            _ => None,
        })
        .collect();
    assert_eq!(
        nodes,
        vec![
            PipelineNode::ExtractIntent,
            PipelineNode::ResolveEntities,
            PipelineNode::QueryDatabase,
            PipelineNode::GenerateResponse,
        ]
    );

    let tokens: String = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Token { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, "Mary Jones had influenza.");

    let first_token = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::Token { .. }))
        .unwrap();
    let generate_done = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::NodeCompleted { node: PipelineNode::GenerateResponse, .. }))
        .unwrap();
    assert!(first_token < generate_done);

    assert_eq!(
        events.last(),
        Some(&PipelineEvent::Done {
            session_id: "s2".to_string(),
            response: "Mary Jones had influenza.".to_string(),
        })
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(h.pipeline.history("s2").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stream_interrupted_narration_ends_in_error() {
    let llm = assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "partial answer then nothing",
    )
    .with_stream_style(StreamStyle::FailAfter(1));
    let (_, providers) = providers(llm);
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let events: Vec<PipelineEvent> = h
        .pipeline
        .clone()
        .stream(ConversationState::new("Hello", "s3"), "s3", h.context.clone())
        .collect()
        .await;

    assert!(events.contains(&PipelineEvent::Token {
        delta: "partial ".to_string()
    }));
    assert!(matches!(events.last(), Some(PipelineEvent::Error { message }) if message.contains("interrupted")));
    let saved = h.pipeline.history("s3").await.unwrap();
    assert_eq!(saved.last().map(|m| m.content.as_str()), Some(FALLBACK_RESPONSE));
}

#[tokio::test]
async fn test_checkpoint_failure_is_reported() {
    let llm = Arc::new(assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "Hi.",
    ));
    let gateway = Arc::new(ProviderGateway::from_providers(vec![llm as Arc<dyn LlmProvider>]));
    let pipeline = Arc::new(Pipeline::new(
        gateway.clone(),
        cascade(gateway),
        Arc::new(ReadOnlyCheckpointStore),
    ));
    let context = TurnContext::new(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(StaticExecutor::returning(vec![])),
    );

    let err = pipeline
        .invoke(ConversationState::new("Hello", "s4"), "s4", &context)
        .await
        .unwrap_err();
    assert!(matches!(err, AssistantError::Checkpoint(_)));

    let events: Vec<PipelineEvent> = pipeline
        .clone()
        .stream(ConversationState::new("Hello", "s4"), "s4", context)
        .collect()
        .await;
    assert!(matches!(events.last(), Some(PipelineEvent::Error { message }) if message.contains("read-only")));
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Done { .. })));
}

#[tokio::test]
async fn test_sessions_run_independently() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "Hi.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let (a, b) = tokio::join!(
        h.pipeline.invoke(ConversationState::new("Hello", "a"), "a", &h.context),
        h.pipeline.invoke(ConversationState::new("Hello", "b"), "b", &h.context),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.checkpoints.len(), 2);
    assert_eq!(h.pipeline.history("a").await.unwrap().len(), 2);
    assert_eq!(h.pipeline.active_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_session_turns_are_serialized() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("chitchat", None),
        "SELECT 1;",
        "Hi.",
    ));
    let h = harness(providers, sample_records(), StaticExecutor::returning(vec![]));

    let turns: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = h.pipeline.clone();
            let context = h.context.clone();
            tokio::spawn(async move {
                pipeline
                    .invoke(ConversationState::new(format!("Hello {}", i), "s"), "s", &context)
                    .await
            })
        })
        .collect();
    for turn in turns {
        turn.await.unwrap().unwrap();
    }

    // Every turn saw the previous checkpoint, so no exchange was lost.
    let history = h.pipeline.history("s").await.unwrap();
    assert_eq!(history.len(), 16);
    let mut questions: Vec<_> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .collect();
    questions.sort();
    let mut expected: Vec<_> = (0..8).map(|i| format!("Hello {}", i)).collect();
    expected.sort();
    assert_eq!(questions, expected);
    assert_eq!(h.pipeline.active_sessions(), 0);
}

#[tokio::test]
async fn test_candidate_limit_bounds_name_lookup() {
    let (_, providers) = providers(assistant_llm(
        "primary",
        classification("search", Some("Smith")),
        "SELECT 1;",
        "Found visits.",
    ));
    let records = InMemoryRecordStore::new()
        .with_patient(1, "Anna", "Smithson")
        .with_patient(2, "John", "Smith")
        .with_visit(common::visit(20, 1, "2024-04-02 09:00", "Asthma"))
        .with_visit(common::visit(21, 2, "2024-04-03 09:00", "Migraine"));
    let gateway = Arc::new(ProviderGateway::from_providers(providers));
    let pipeline = Pipeline::new(
        gateway.clone(),
        cascade(gateway),
        Arc::new(visit_assistant::pipeline::MemoryCheckpointStore::new()),
    )
    .with_resolver(EntityResolver::new(1));
    let context = TurnContext::new(Arc::new(records), Arc::new(StaticExecutor::returning(vec![])));

    let state = pipeline
        .invoke(ConversationState::new("Visits for Smith", "s5"), "s5", &context)
        .await
        .unwrap();

    // Only the first candidate is fetched, so the closer "Smith" is never seen.
    assert_eq!(state.resolved_ids.get("patient_id"), Some(&1));
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.results[0]["diagnosis"], json!("Asthma"));
}
