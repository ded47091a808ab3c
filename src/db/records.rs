//! Patient and visit lookups
//!
//! The pipeline never owns the patient/visit schema; it only needs filtered,
//! ordered and limited reads, expressed through [`RecordStore`].

use crate::db::executor::{row_to_json, Row};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder, Row as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub const DEFAULT_VISIT_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: i64,
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
}

impl PatientRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub id: i64,
    pub patient_id: i64,
    pub visit_date: NaiveDateTime,
    pub visit_type: String,
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
}

impl VisitRecord {
    /// Same shape the Postgres store returns.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(self.id));
        row.insert(
            "date".into(),
            json!(self.visit_date.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        );
        row.insert("chief_complaint".into(), json!(self.chief_complaint));
        row.insert("diagnosis".into(), json!(self.diagnosis));
        row.insert("visit_type".into(), json!(self.visit_type));
        row
    }
}

/// Visit lookup. `date_end` is inclusive of the whole day.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitQuery {
    pub patient_id: Option<i64>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub diagnosis: Option<String>,
    pub limit: i64,
}

impl Default for VisitQuery {
    fn default() -> Self {
        Self {
            patient_id: None,
            date_start: None,
            date_end: None,
            diagnosis: None,
            limit: DEFAULT_VISIT_LIMIT,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Case-insensitive partial match on first, last or full name.
    async fn find_patients_by_name(&self, fragment: &str, limit: i64) -> Result<Vec<PatientRecord>>;

    /// Visits matching `query`, most recent first.
    async fn recent_visits(&self, query: &VisitQuery) -> Result<Vec<Row>>;
}

fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_patients_by_name(&self, fragment: &str, limit: i64) -> Result<Vec<PatientRecord>> {
        let pattern = format!("%{}%", escape_like(fragment.trim()));
        let rows = sqlx::query(
            r#"
            SELECT id::bigint AS id,
                   COALESCE(patient_id, '') AS patient_id,
                   first_name,
                   last_name
            FROM patients
            WHERE first_name ILIKE $1
               OR last_name ILIKE $1
               OR (first_name || ' ' || last_name) ILIKE $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AssistantError::Database(format!("Patient lookup failed: {}", e)))?;

        rows.iter()
            .map(|row| -> Result<PatientRecord> {
                Ok(PatientRecord {
                    id: row.try_get("id")?,
                    patient_id: row.try_get("patient_id")?,
                    first_name: row.try_get("first_name")?,
                    last_name: row.try_get("last_name")?,
                })
            })
            .collect()
    }

    async fn recent_visits(&self, query: &VisitQuery) -> Result<Vec<Row>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id::bigint AS id, visit_date AS date, chief_complaint, diagnosis, visit_type \
             FROM visits WHERE TRUE",
        );
        if let Some(patient_id) = query.patient_id {
            builder.push(" AND patient_id = ").push_bind(patient_id);
        }
        if let Some(start) = query.date_start {
            builder.push(" AND visit_date >= ").push_bind(start);
        }
        if let Some(end) = query.date_end.and_then(|d| d.succ_opt()) {
            builder.push(" AND visit_date < ").push_bind(end);
        }
        if let Some(diagnosis) = &query.diagnosis {
            builder
                .push(" AND diagnosis ILIKE ")
                .push_bind(format!("%{}%", escape_like(diagnosis)));
        }
        builder.push(" ORDER BY visit_date DESC LIMIT ").push_bind(query.limit);

        debug!("Visit lookup: {}", builder.sql());
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AssistantError::Database(format!("Visit lookup failed: {}", e)))?;
        rows.iter().map(row_to_json).collect()
    }
}

/// Record store over in-process vectors that counts every lookup.
#[derive(Default)]
pub struct InMemoryRecordStore {
    patients: Vec<PatientRecord>,
    visits: Vec<VisitRecord>,
    failure: Option<String>,
    patient_lookups: AtomicUsize,
    visit_lookups: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, id: i64, first_name: &str, last_name: &str) -> Self {
        self.patients.push(PatientRecord {
            id,
            patient_id: format!("P{:05}", id),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        });
        self
    }

    pub fn with_visit(mut self, visit: VisitRecord) -> Self {
        self.visits.push(visit);
        self
    }

    /// Every lookup fails with a `Database` error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn patient_lookups(&self) -> usize {
        self.patient_lookups.load(Ordering::SeqCst)
    }

    pub fn visit_lookups(&self) -> usize {
        self.visit_lookups.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(AssistantError::Database(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_patients_by_name(&self, fragment: &str, limit: i64) -> Result<Vec<PatientRecord>> {
        self.patient_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let needle = fragment.trim().to_lowercase();
        Ok(self
            .patients
            .iter()
            .filter(|p| {
                p.first_name.to_lowercase().contains(&needle)
                    || p.last_name.to_lowercase().contains(&needle)
                    || p.full_name().to_lowercase().contains(&needle)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent_visits(&self, query: &VisitQuery) -> Result<Vec<Row>> {
        self.visit_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let needle = query.diagnosis.as_ref().map(|d| d.to_lowercase());
        let mut visits: Vec<&VisitRecord> = self
            .visits
            .iter()
            .filter(|v| query.patient_id.map_or(true, |id| v.patient_id == id))
            .filter(|v| query.date_start.map_or(true, |start| v.visit_date.date() >= start))
            .filter(|v| query.date_end.map_or(true, |end| v.visit_date.date() <= end))
            .filter(|v| match (&needle, &v.diagnosis) {
                (None, _) => true,
                (Some(n), Some(d)) => d.to_lowercase().contains(n),
                (Some(_), None) => false,
            })
            .collect();
        visits.sort_by(|a, b| b.visit_date.cmp(&a.visit_date));
        Ok(visits
            .into_iter()
            .take(query.limit.max(0) as usize)
            .map(VisitRecord::to_row)
            .collect())
    }
}
