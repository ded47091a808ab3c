//! Query resolution cascade
//!
//! cache → template → LLM-generated SQL, then the read-only gate, then
//! execution. Each source is cheaper than the next, so the counters kept here
//! double as a cost report. Failures at any stage come back as an
//! [`AnalyticsOutcome::Failed`] value instead of an error.

use crate::analytics::cache::{CacheStats, QueryCache};
use crate::analytics::safety::validate_read_only;
use crate::analytics::schema::{explain_prompt, sql_system_prompt, sql_user_prompt, EXPLAIN_SYSTEM_PROMPT};
use crate::analytics::templates::TemplateMatcher;
use crate::db::{Row, SqlExecutor};
use crate::error::{AssistantError, Result};
use crate::llm::{strip_code_fences, ProviderGateway};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlSource {
    Cache,
    Template,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsAnswer {
    pub question: String,
    pub sql: String,
    pub source: SqlSource,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub explanation: Option<String>,
    pub cost_estimate_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsFailure {
    pub error: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SqlSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalyticsOutcome {
    Answered(AnalyticsAnswer),
    Failed(AnalyticsFailure),
}

impl AnalyticsOutcome {
    pub fn rows(&self) -> &[Row] {
        match self {
            AnalyticsOutcome::Answered(answer) => &answer.rows,
            AnalyticsOutcome::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AnalyticsOutcome::Answered(_) => None,
            AnalyticsOutcome::Failed(failure) => Some(&failure.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub template_matches: u64,
    pub ai_generations: u64,
    pub cache_hit_rate: f64,
    pub template_match_rate: f64,
    pub ai_usage_rate: f64,
    pub estimated_cost_saved_usd: f64,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    cache_hits: AtomicU64,
    template_matches: AtomicU64,
    ai_generations: AtomicU64,
}

/// Pull a single statement out of a model reply: fences and a leading
/// `SQL:`/`Query:` label are dropped, the text is cut after the first `;`
/// and a `;` is appended when missing.
pub fn extract_sql(response: &str) -> Result<String> {
    let mut body = strip_code_fences(response);
    for label in ["sql:", "query:"] {
        if body
            .get(..label.len())
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case(label))
        {
            body = body[label.len()..].trim_start();
        }
    }
    let statement = match body.find(';') {
        Some(end) => body[..=end].trim().to_string(),
        None => format!("{};", body.trim()),
    };
    if statement == ";" {
        return Err(AssistantError::Llm("Model reply contained no SQL".to_string()));
    }
    Ok(statement)
}

/// Numbers become floats; everything else is kept as decoded.
pub fn normalize_row(row: Row) -> Row {
    row.into_iter()
        .map(|(column, value)| {
            let value = match value {
                Value::Number(n) => n.as_f64().map(Value::from).unwrap_or(Value::Number(n)),
                other => other,
            };
            (column, value)
        })
        .collect()
}

pub struct QueryCascade {
    gateway: Arc<ProviderGateway>,
    cache: Arc<QueryCache>,
    templates: TemplateMatcher,
    ai_call_cost_usd: f64,
    counters: Counters,
}

impl QueryCascade {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        cache: Arc<QueryCache>,
        templates: TemplateMatcher,
        ai_call_cost_usd: f64,
    ) -> Self {
        Self {
            gateway,
            cache,
            templates,
            ai_call_cost_usd,
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn templates(&self) -> &TemplateMatcher {
        &self.templates
    }

    /// Resolve, validate and run `question`. `explain` adds a short model
    /// summary when rows come back.
    pub async fn resolve(&self, question: &str, executor: &dyn SqlExecutor, explain: bool) -> AnalyticsOutcome {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let (sql, source) = match self.lookup(question).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not resolve SQL for '{}': {}", question, e);
                return Self::failure(question, e, None, None);
            }
        };

        if let Err(e) = validate_read_only(&sql) {
            warn!("Rejected {:?} SQL for '{}': {}", source, question, e);
            if source == SqlSource::Cache {
                self.cache.remove(question);
            }
            return Self::failure(question, e, Some(sql), Some(source));
        }
        if source != SqlSource::Cache {
            self.cache.set(question, &sql);
        }

        let rows: Vec<Row> = match executor.execute(&sql).await {
            Ok(rows) => rows.into_iter().map(normalize_row).collect(),
            Err(e) => {
                warn!("Execution failed for '{}': {}", question, e);
                return Self::failure(question, e, Some(sql), Some(source));
            }
        };
        info!("Analytics query returned {} rows (source {:?})", rows.len(), source);

        let explanation = if explain && !rows.is_empty() {
            match self
                .gateway
                .complete(EXPLAIN_SYSTEM_PROMPT, &explain_prompt(question, &rows))
                .await
            {
                Ok(text) => Some(text.trim().to_string()),
                Err(e) => {
                    warn!("Result explanation skipped: {}", e);
                    None
                }
            }
        } else {
            None
        };

        AnalyticsOutcome::Answered(AnalyticsAnswer {
            question: question.to_string(),
            row_count: rows.len(),
            rows,
            explanation,
            cost_estimate_usd: if source == SqlSource::Ai { self.ai_call_cost_usd } else { 0.0 },
            sql,
            source,
        })
    }

    async fn lookup(&self, question: &str) -> Result<(String, SqlSource)> {
        if let Some(sql) = self.cache.get(question) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            info!("Cache hit for: {}", question);
            return Ok((sql, SqlSource::Cache));
        }

        if let Some(matched) = self.templates.resolve(question)? {
            self.counters.template_matches.fetch_add(1, Ordering::Relaxed);
            info!("Template {} matched: {}", matched.template, question);
            return Ok((matched.sql, SqlSource::Template));
        }

        self.counters.ai_generations.fetch_add(1, Ordering::Relaxed);
        info!("Generating SQL with AI for: {}", question);
        let reply = self
            .gateway
            .complete(&sql_system_prompt(), &sql_user_prompt(question))
            .await?;
        Ok((extract_sql(&reply)?, SqlSource::Ai))
    }

    fn failure(
        question: &str,
        error: AssistantError,
        sql: Option<String>,
        source: Option<SqlSource>,
    ) -> AnalyticsOutcome {
        AnalyticsOutcome::Failed(AnalyticsFailure {
            error: error.to_string(),
            question: question.to_string(),
            sql,
            source,
        })
    }

    pub fn stats(&self) -> CascadeStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let template_matches = self.counters.template_matches.load(Ordering::Relaxed);
        let ai_generations = self.counters.ai_generations.load(Ordering::Relaxed);
        let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        CascadeStats {
            total_queries: total,
            cache_hits,
            template_matches,
            ai_generations,
            cache_hit_rate: rate(cache_hits),
            template_match_rate: rate(template_matches),
            ai_usage_rate: rate(ai_generations),
            estimated_cost_saved_usd: (cache_hits + template_matches) as f64 * self.ai_call_cost_usd,
            cache: self.cache.stats(),
        }
    }

    pub fn example_questions() -> &'static [&'static str] {
        &[
            "How many visits were made in the last 30 days?",
            "What is the average duration of visits?",
            "Which patient has the most visits?",
            "How many urgent visits vs routine visits?",
            "What's the average heart rate across all visits?",
            "Show patients who haven't visited in 60 days",
            "What are the most common diagnoses?",
            "How many patients do we have?",
            "Show visit trends by month",
        ]
    }
}
