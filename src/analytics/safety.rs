//! Read-only gate for SQL headed to the executor
//!
//! The statement must start with `SELECT` and must not contain any write or
//! DDL verb anywhere, including inside identifiers and string literals.

use crate::error::{AssistantError, Result};

pub const FORBIDDEN_KEYWORDS: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "GRANT", "REVOKE",
];

pub fn validate_read_only(sql: &str) -> Result<()> {
    let upper = sql.trim().to_uppercase();
    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| upper.contains(*k)) {
        return Err(AssistantError::UnsafeQuery(format!(
            "query contains forbidden operation {}",
            keyword
        )));
    }
    if !upper.starts_with("SELECT") {
        return Err(AssistantError::UnsafeQuery(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    Ok(())
}

pub fn is_read_only(sql: &str) -> bool {
    validate_read_only(sql).is_ok()
}
