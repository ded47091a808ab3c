#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::json;
use std::sync::Arc;
use visit_assistant::analytics::{QueryCache, QueryCascade, TemplateMatcher};
use visit_assistant::db::{InMemoryRecordStore, Row, StaticExecutor, VisitRecord};
use visit_assistant::error::{AssistantError, Result};
use visit_assistant::llm::mock::MockProvider;
use visit_assistant::llm::{LlmProvider, ProviderGateway};
use visit_assistant::pipeline::prompts::INTENT_SYSTEM_PROMPT;
use visit_assistant::pipeline::{Checkpoint, CheckpointStore, MemoryCheckpointStore, Pipeline, TurnContext};

pub const AI_CALL_COST: f64 = 0.0006;

pub fn classification(intent: &str, entity: Option<&str>) -> String {
    json!({"intent": intent, "filters": {}, "entity_to_resolve": entity}).to_string()
}

/// A provider that answers classifier prompts with `classification`, SQL
/// prompts with `sql` and everything else with `narration`.
pub fn assistant_llm(name: &str, classification: String, sql: &str, narration: &str) -> MockProvider {
    let sql = sql.to_string();
    let narration = narration.to_string();
    MockProvider::routing(name, move |system, _| {
        if system == INTENT_SYSTEM_PROMPT {
            Ok(classification.clone())
        } else if system.contains("SQL expert") {
            Ok(sql.clone())
        } else {
            Ok(narration.clone())
        }
    })
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn visit(id: i64, patient_id: i64, date: &str, diagnosis: &str) -> VisitRecord {
    VisitRecord {
        id,
        patient_id,
        visit_date: NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M").unwrap(),
        visit_type: "routine".to_string(),
        chief_complaint: Some("follow-up".to_string()),
        diagnosis: Some(diagnosis.to_string()),
    }
}

pub fn sample_records() -> InMemoryRecordStore {
    InMemoryRecordStore::new()
        .with_patient(1, "John", "Smith")
        .with_patient(2, "Mary", "Jones")
        .with_visit(visit(10, 1, "2024-01-05 09:00", "Hypertension"))
        .with_visit(visit(11, 1, "2024-03-01 10:30", "Type 2 diabetes"))
        .with_visit(visit(12, 2, "2024-02-10 08:15", "Influenza"))
}

pub fn cascade(gateway: Arc<ProviderGateway>) -> Arc<QueryCascade> {
    Arc::new(QueryCascade::new(
        gateway,
        Arc::new(QueryCache::new(chrono::Duration::hours(24))),
        TemplateMatcher::builtin().unwrap(),
        AI_CALL_COST,
    ))
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub records: Arc<InMemoryRecordStore>,
    pub executor: Arc<StaticExecutor>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub context: TurnContext,
}

pub fn harness(providers: Vec<Arc<dyn LlmProvider>>, records: InMemoryRecordStore, executor: StaticExecutor) -> Harness {
    let gateway = Arc::new(ProviderGateway::from_providers(providers));
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let pipeline = Arc::new(Pipeline::new(
        gateway.clone(),
        cascade(gateway),
        checkpoints.clone(),
    ));
    let records = Arc::new(records);
    let executor = Arc::new(executor);
    let context = TurnContext::new(records.clone(), executor.clone());
    Harness {
        pipeline,
        records,
        executor,
        checkpoints,
        context,
    }
}

/// Loads fine, refuses every save.
pub struct ReadOnlyCheckpointStore;

#[async_trait]
impl CheckpointStore for ReadOnlyCheckpointStore {
    async fn load(&self, _session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(None)
    }

    async fn save(&self, _checkpoint: &Checkpoint) -> Result<()> {
        Err(AssistantError::Checkpoint("checkpoint table is read-only".to_string()))
    }

    async fn delete(&self, _session_id: &str) -> Result<bool> {
        Ok(false)
    }
}
