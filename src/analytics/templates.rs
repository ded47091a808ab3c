//! Regex-to-SQL templates for common analytics questions
//!
//! Templates are tried in definition order, patterns within a template in
//! definition order, and the first regex hit wins. Placeholders form a closed
//! set: each one must be a declared parameter, numeric captures must be plain
//! integers, and synonym parameters only ever substitute canonical values from
//! their own table. No question text reaches the SQL unchecked.

use crate::error::{AssistantError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// A captured positive integer.
    Count,
    /// Resolved by scanning `(key, canonical)` pairs for the first key that
    /// appears in the question.
    Synonym(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParam {
    pub name: String,
    pub kind: ParamKind,
}

impl TemplateParam {
    pub fn count(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Count,
        }
    }

    pub fn synonym(name: &str, table: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Synonym(
                table
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryTemplate {
    pub name: String,
    patterns: Vec<Regex>,
    sql: String,
    params: Vec<TemplateParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub template: String,
    pub sql: String,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

fn is_canonical_value(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl QueryTemplate {
    /// Compile and check a template. Every placeholder in `sql` must be a
    /// declared parameter and every synonym value must be a bare identifier.
    pub fn new(name: &str, patterns: &[&str], sql: &str, params: Vec<TemplateParam>) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    AssistantError::Config(format!("Template '{}' has invalid pattern '{}': {}", name, p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for caps in placeholder_regex().captures_iter(sql) {
            let placeholder = &caps[1];
            if !params.iter().any(|p| p.name == placeholder) {
                return Err(AssistantError::Config(format!(
                    "Template '{}' uses undeclared placeholder {{{}}}",
                    name, placeholder
                )));
            }
        }
        for param in &params {
            if let ParamKind::Synonym(table) = &param.kind {
                if let Some((key, value)) = table.iter().find(|(_, v)| !is_canonical_value(v)) {
                    return Err(AssistantError::Config(format!(
                        "Template '{}' maps '{}' to non-canonical value '{}'",
                        name, key, value
                    )));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            patterns: compiled,
            sql: sql.to_string(),
            params,
        })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&self, question: &str, captures: &regex::Captures<'_>) -> Result<HashMap<&str, String>> {
        let mut values = HashMap::new();
        for (index, param) in self.params.iter().enumerate() {
            let captured = captures.get(index + 1).map(|m| m.as_str());
            match &param.kind {
                ParamKind::Count => {
                    if let Some(raw) = captured {
                        let count: u32 = raw.parse().map_err(|_| {
                            AssistantError::TemplateRender(format!(
                                "Template '{}' parameter '{}' is not a number: '{}'",
                                self.name, param.name, raw
                            ))
                        })?;
                        values.insert(param.name.as_str(), count.to_string());
                    }
                }
                ParamKind::Synonym(table) => {
                    if let Some((_, canonical)) = table.iter().find(|(key, _)| question.contains(key.as_str())) {
                        values.insert(param.name.as_str(), canonical.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    /// Substitute every placeholder; any placeholder without a value fails.
    fn render(&self, values: &HashMap<&str, String>) -> Result<String> {
        let missing: Vec<String> = placeholder_regex()
            .captures_iter(&self.sql)
            .map(|caps| caps[1].to_string())
            .filter(|name| !values.contains_key(name.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(AssistantError::TemplateRender(format!(
                "Template '{}' has unresolved placeholders: {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(placeholder_regex()
            .replace_all(&self.sql, |caps: &regex::Captures<'_>| values[&caps[1]].clone())
            .into_owned())
    }
}

pub struct TemplateMatcher {
    templates: Vec<QueryTemplate>,
}

impl TemplateMatcher {
    pub fn new(templates: Vec<QueryTemplate>) -> Self {
        Self { templates }
    }

    pub fn builtin() -> Result<Self> {
        Ok(Self::new(builtin_templates()?))
    }

    pub fn templates(&self) -> &[QueryTemplate] {
        &self.templates
    }

    /// `Ok(None)` when no pattern matches. A matching template that cannot be
    /// fully rendered is an error, never a partial statement.
    pub fn resolve(&self, question: &str) -> Result<Option<TemplateMatch>> {
        let normalized = question.trim().to_lowercase();
        for template in &self.templates {
            for pattern in &template.patterns {
                if let Some(captures) = pattern.captures(&normalized) {
                    debug!("Question matched template {} via /{}/", template.name, pattern.as_str());
                    let values = template.bind(&normalized, &captures)?;
                    let sql = template.render(&values)?;
                    return Ok(Some(TemplateMatch {
                        template: template.name.clone(),
                        sql,
                    }));
                }
            }
        }
        Ok(None)
    }
}

const VITAL_SIGN_FIELDS: [(&str, &str); 7] = [
    ("heart rate", "heart_rate"),
    ("hr", "heart_rate"),
    ("blood pressure", "blood_pressure_systolic"),
    ("bp", "blood_pressure_systolic"),
    ("temperature", "temperature"),
    ("temp", "temperature"),
    ("weight", "weight"),
];

/// Templates shipped with the service, in matching order.
pub fn builtin_templates() -> Result<Vec<QueryTemplate>> {
    Ok(vec![
        QueryTemplate::new(
            "visits_count_days",
            &[
                r"how many visits.*(?:in|during|over).*(?:last|past)\s+(\d+)\s+days?",
                r"visits.*count.*(\d+)\s+days?",
                r"number of visits.*(\d+)\s+days?",
            ],
            "SELECT COUNT(*) as visit_count FROM visits WHERE visit_date >= NOW() - INTERVAL '{days} days';",
            vec![TemplateParam::count("days")],
        )?,
        QueryTemplate::new(
            "avg_visit_duration",
            &[r"average.*visit.*duration", r"avg.*visit.*time", r"mean.*visit.*length"],
            "SELECT AVG(duration_minutes) as avg_duration_minutes FROM visits WHERE duration_minutes IS NOT NULL;",
            vec![],
        )?,
        QueryTemplate::new(
            "patient_count",
            &[r"how many patients", r"total.*patients", r"number of patients", r"patient count"],
            "SELECT COUNT(*) as patient_count FROM patients;",
            vec![],
        )?,
        QueryTemplate::new(
            "most_visits_patient",
            &[r"which patient.*most visits", r"patient.*most.*visits", r"who.*most visits"],
            "SELECT p.first_name, p.last_name, p.patient_id, COUNT(v.id) as visit_count \
             FROM patients p JOIN visits v ON p.id = v.patient_id \
             GROUP BY p.id, p.first_name, p.last_name, p.patient_id \
             ORDER BY visit_count DESC LIMIT 1;",
            vec![],
        )?,
        QueryTemplate::new(
            "visit_type_count",
            &[
                r"how many.*(?:urgent|routine|follow-up|consultation).*visits",
                r"count.*visit.*type",
                r"visits by type",
            ],
            "SELECT visit_type, COUNT(*) as count FROM visits GROUP BY visit_type ORDER BY count DESC;",
            vec![],
        )?,
        QueryTemplate::new(
            "avg_vital_sign",
            &[
                r"average.*(?:heart rate|blood pressure|temperature|weight)",
                r"avg.*(?:hr|bp|temp)",
            ],
            "SELECT AVG((vital_signs::jsonb ->> '{field}')::float) as avg_{field} \
             FROM visits WHERE vital_signs IS NOT NULL;",
            vec![TemplateParam::synonym("field", &VITAL_SIGN_FIELDS)],
        )?,
        QueryTemplate::new(
            "inactive_patients",
            &[
                r"patients.*(?:haven't|have not|no).*visit.*(\d+)\s+days",
                r"inactive.*patients.*(\d+)\s+days",
            ],
            "SELECT p.patient_id, p.first_name, p.last_name, MAX(v.visit_date) as last_visit \
             FROM patients p LEFT JOIN visits v ON p.id = v.patient_id \
             GROUP BY p.id, p.patient_id, p.first_name, p.last_name \
             HAVING MAX(v.visit_date) IS NULL OR MAX(v.visit_date) < NOW() - INTERVAL '{days} days' \
             ORDER BY last_visit NULLS FIRST;",
            vec![TemplateParam::count("days")],
        )?,
        QueryTemplate::new(
            "common_diagnoses",
            &[r"most common.*diagnos", r"top.*diagnos", r"frequent.*diagnos"],
            "SELECT diagnosis, COUNT(*) as count FROM visits \
             WHERE diagnosis IS NOT NULL AND diagnosis != '' \
             GROUP BY diagnosis ORDER BY count DESC LIMIT 10;",
            vec![],
        )?,
    ])
}
