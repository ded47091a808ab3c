//! SQL execution
//!
//! The cascade only needs `execute(sql) -> rows`. Rows are JSON maps so they
//! can flow straight into prompts, checkpoints and API responses.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

pub type Row = Map<String, Value>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        debug!("Executing SQL: {}", sql);
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AssistantError::Execution(format!("Query execution failed: {}", e)))?;
        rows.iter().map(row_to_json).collect()
    }
}

/// Convert a Postgres row. Timestamps become ISO-8601 strings.
pub fn row_to_json(row: &PgRow) -> Result<Row> {
    let mut out = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name())
            .map_err(|e| AssistantError::Execution(format!("Failed to decode column '{}': {}", column.name(), e)))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }
    let value = match type_name {
        "INT2" => json!(row.try_get::<i16, _>(index)?),
        "INT4" => json!(row.try_get::<i32, _>(index)?),
        "INT8" => json!(row.try_get::<i64, _>(index)?),
        "FLOAT4" => json!(row.try_get::<f32, _>(index)?),
        "FLOAT8" => json!(row.try_get::<f64, _>(index)?),
        "NUMERIC" => {
            let decimal: BigDecimal = row.try_get(index)?;
            match decimal.to_f64() {
                Some(f) => json!(f),
                None => json!(decimal.to_string()),
            }
        }
        "BOOL" => json!(row.try_get::<bool, _>(index)?),
        "TIMESTAMP" => {
            let ts: NaiveDateTime = row.try_get(index)?;
            json!(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        "TIMESTAMPTZ" => json!(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "DATE" => json!(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => json!(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "UUID" => json!(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => json!(text),
            Err(_) => {
                warn!("Unsupported column type {}; returning null", type_name);
                Value::Null
            }
        },
    };
    Ok(value)
}

/// Executor returning canned rows and recording every statement it sees.
#[derive(Default)]
pub struct StaticExecutor {
    rows: Vec<Row>,
    failure: Option<String>,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl StaticExecutor {
    pub fn returning(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SqlExecutor for StaticExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
        match &self.failure {
            Some(message) => Err(AssistantError::Execution(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}
