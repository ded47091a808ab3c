//! Schema description and prompts for LLM-authored SQL

use crate::db::Row;

pub const SCHEMA_DESCRIPTION: &str = "\
TABLES:

1. patients (id, patient_id, first_name, last_name, date_of_birth, gender,
             phone, email, medical_history, allergies, current_medications)

2. visits (id, visit_id, patient_id -> patients.id, visit_date TIMESTAMP, visit_type,
          chief_complaint, symptoms, diagnosis, treatment_plan, medications_prescribed,
          doctor_notes, vital_signs TEXT (JSON object), lab_results TEXT (JSON array),
          duration_minutes INTEGER)

vital_signs keys: blood_pressure_systolic, blood_pressure_diastolic, heart_rate,
temperature, respiratory_rate, oxygen_saturation, weight, height
";

pub fn sql_system_prompt() -> String {
    format!(
        r#"You are a SQL expert for a PostgreSQL medical records database. Generate safe, read-only SQL queries.

DATABASE SCHEMA:
{schema}
RULES:
1. ONLY generate SELECT queries (no INSERT, UPDATE, DELETE, DROP, ALTER)
2. Use proper JOIN syntax when querying multiple tables
3. vital_signs and lab_results are JSON stored as text: cast with ::jsonb and use ->> for values
4. Always use table aliases for clarity
5. Include a LIMIT clause for large result sets (default 100)
6. Use PostgreSQL date functions (NOW(), INTERVAL, DATE_TRUNC) for time-based queries
7. Return ONLY the SQL query as a single statement, no explanations

EXAMPLES:
Question: "How many visits in the last 30 days?"
SQL: SELECT COUNT(*) as visit_count FROM visits v WHERE v.visit_date >= NOW() - INTERVAL '30 days';

Question: "What's the average heart rate?"
SQL: SELECT AVG((v.vital_signs::jsonb ->> 'heart_rate')::float) as avg_heart_rate FROM visits v WHERE v.vital_signs IS NOT NULL;

Question: "Which patient has the most visits?"
SQL: SELECT p.first_name, p.last_name, COUNT(v.id) as visit_count FROM patients p JOIN visits v ON p.id = v.patient_id GROUP BY p.id, p.first_name, p.last_name ORDER BY visit_count DESC LIMIT 1;

Now generate SQL for the user's question."#,
        schema = SCHEMA_DESCRIPTION
    )
}

pub fn sql_user_prompt(question: &str) -> String {
    format!("Question: {}\nSQL:", question)
}

pub const EXPLAIN_SYSTEM_PROMPT: &str =
    "You are a data analyst for a medical practice. Summarize query results accurately and briefly.";

pub fn explain_prompt(question: &str, rows: &[Row]) -> String {
    let preview = serde_json::to_string(&rows.iter().take(5).collect::<Vec<_>>()).unwrap_or_default();
    format!(
        "Given this analytics question and results, provide a concise summary.\n\n\
         Question: {}\nResults: {}\nTotal Rows: {}\n\n\
         Provide a 2-3 sentence summary.",
        question,
        preview,
        rows.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explain_prompt_previews_five_rows() {
        let rows: Vec<Row> = (0..8)
            .map(|i| {
                let mut row = Row::new();
                row.insert("n".into(), json!(i));
                row
            })
            .collect();
        let prompt = explain_prompt("q", &rows);
        assert!(prompt.contains(r#"{"n":4}"#));
        assert!(!prompt.contains(r#"{"n":5}"#));
        assert!(prompt.contains("Total Rows: 8"));
    }

    #[test]
    fn test_sql_prompt_embeds_schema() {
        assert!(sql_system_prompt().contains("duration_minutes"));
        assert_eq!(sql_user_prompt("x"), "Question: x\nSQL:");
    }
}
