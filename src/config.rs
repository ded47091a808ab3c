//! Runtime configuration
//!
//! Read once from the environment (after loading `.env`) and passed to the
//! services that need it.

use crate::error::{AssistantError, Result};
use crate::llm::ProviderKind;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROVIDER_ORDER: &str = "xai,openai,anthropic";

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub database_url: Option<String>,
    /// Priority order; earlier entries are tried first.
    pub providers: Vec<ProviderSettings>,
    pub llm_timeout: Duration,
    pub cache_ttl: chrono::Duration,
    pub ai_call_cost_usd: f64,
    pub db_max_connections: u32,
    /// Upper bound on patients fetched per name lookup.
    pub entity_candidate_limit: i64,
    pub log_level: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            providers: ProviderKind::ALL
                .iter()
                .map(|kind| ProviderSettings {
                    kind: *kind,
                    api_key: None,
                    model: kind.default_model().to_string(),
                    base_url: kind.default_base_url().to_string(),
                })
                .collect(),
            llm_timeout: Duration::from_secs(60),
            cache_ttl: chrono::Duration::hours(24),
            ai_call_cost_usd: 0.0006,
            db_max_connections: 10,
            entity_candidate_limit: 10,
            log_level: "info".to_string(),
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Blank values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let order = get("LLM_PROVIDER_ORDER").unwrap_or_else(|| DEFAULT_PROVIDER_ORDER.to_string());
        let mut providers = Vec::new();
        for name in order.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = ProviderKind::from_str(name)?;
            if providers.iter().any(|p: &ProviderSettings| p.kind == kind) {
                return Err(AssistantError::Config(format!(
                    "Provider '{}' listed twice in LLM_PROVIDER_ORDER",
                    kind
                )));
            }
            let prefix = kind.env_prefix();
            providers.push(ProviderSettings {
                kind,
                api_key: get(&format!("{}_API_KEY", prefix)),
                model: get(&format!("{}_MODEL", prefix))
                    .unwrap_or_else(|| kind.default_model().to_string()),
                base_url: get(&format!("{}_BASE_URL", prefix))
                    .unwrap_or_else(|| kind.default_base_url().to_string()),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            providers,
            llm_timeout: Duration::from_secs(parse_or(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", 60)?),
            cache_ttl: cache_ttl(get("QUERY_CACHE_TTL_HOURS"), defaults.cache_ttl)?,
            ai_call_cost_usd: parse_or(
                get("AI_CALL_COST_USD"),
                "AI_CALL_COST_USD",
                defaults.ai_call_cost_usd,
            )?,
            db_max_connections: parse_or(
                get("DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            entity_candidate_limit: parse_or(
                get("ENTITY_CANDIDATE_LIMIT"),
                "ENTITY_CANDIDATE_LIMIT",
                defaults.entity_candidate_limit,
            )?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AssistantError::Config("DATABASE_URL must be set".to_string()))
    }
}

/// Positive whole hours that fit a `chrono::Duration`.
fn cache_ttl(value: Option<String>, default: chrono::Duration) -> Result<chrono::Duration> {
    let Some(raw) = value else {
        return Ok(default);
    };
    raw.parse::<i64>()
        .ok()
        .filter(|hours| *hours > 0)
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| AssistantError::Config(format!("Invalid value for QUERY_CACHE_TTL_HOURS: '{}'", raw)))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AssistantError::Config(format!("Invalid value for {}: '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AssistantConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AssistantConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AssistantConfig::default());
        let kinds: Vec<ProviderKind> = config.providers.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProviderKind::Xai, ProviderKind::OpenAi, ProviderKind::Anthropic]);
        assert_eq!(config.cache_ttl, chrono::Duration::hours(24));
        assert_eq!(config.entity_candidate_limit, 10);
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LLM_PROVIDER_ORDER", "anthropic, openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("ANTHROPIC_API_KEY", "  "),
            ("QUERY_CACHE_TTL_HOURS", "2"),
            ("DATABASE_URL", "postgres://localhost/visits"),
        ])
        .unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::Anthropic);
        assert_eq!(config.providers[0].api_key, None);
        assert_eq!(config.providers[1].api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.providers[1].model, "gpt-4o");
        assert_eq!(config.cache_ttl, chrono::Duration::hours(2));
        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/visits");
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            config_from(&[("LLM_TIMEOUT_SECS", "soon")]),
            Err(AssistantError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("LLM_PROVIDER_ORDER", "xai,mistral")]),
            Err(AssistantError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("LLM_PROVIDER_ORDER", "xai,grok")]),
            Err(AssistantError::Config(_))
        ));
    }

    #[test]
    fn test_cache_ttl_out_of_range_is_config_error() {
        for raw in ["9223372036854775807", "0", "-3", "a day"] {
            assert!(
                matches!(
                    config_from(&[("QUERY_CACHE_TTL_HOURS", raw)]),
                    Err(AssistantError::Config(_))
                ),
                "{}",
                raw
            );
        }
    }
}
