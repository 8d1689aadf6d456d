use anyhow::{Context, Result};

use crate::discovery::decision::DecisionConfig;
use crate::discovery::guards::ContaminationGuard;

/// Application configuration loaded from environment variables.
/// Required variables fail startup; tunables fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub llm_model: String,
    pub taxonomy_service_url: String,
    pub similarity_service_url: String,
    pub dictionary_service_url: String,
    pub signal_timeout_secs: u64,
    pub decision: DecisionConfig,
    /// Deployment-specific guards appended after the built-in list.
    pub extra_guards: Vec<ContaminationGuard>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = DecisionConfig::default();
        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            llm_model: env_or("LLM_MODEL", "claude-sonnet-4-5"),
            taxonomy_service_url: require_env("TAXONOMY_SERVICE_URL")?,
            similarity_service_url: require_env("SIMILARITY_SERVICE_URL")?,
            dictionary_service_url: require_env("DICTIONARY_SERVICE_URL")?,
            signal_timeout_secs: parse_env("SIGNAL_TIMEOUT_SECS", 10)?,
            decision: DecisionConfig {
                sim_threshold: parse_env("SIM_THRESHOLD", defaults.sim_threshold)?,
                freq_threshold: parse_env("FREQ_THRESHOLD", defaults.freq_threshold)?,
                conf_threshold: parse_env("CONF_THRESHOLD", defaults.conf_threshold)?,
                domain_pattern_confidence: parse_env(
                    "DOMAIN_PATTERN_CONFIDENCE",
                    defaults.domain_pattern_confidence,
                )?,
            },
            extra_guards: match std::env::var("EXTRA_GUARDS") {
                Ok(raw) => parse_guards(&raw)?,
                Err(_) => Vec::new(),
            },
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Parses `EXTRA_GUARDS`, a JSON array of guard definitions.
fn parse_guards(raw: &str) -> Result<Vec<ContaminationGuard>> {
    serde_json::from_str(raw).context("'EXTRA_GUARDS' must be a JSON array of guard definitions")
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid value")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::guards::{default_guards, GuardFilter, GuardPattern};

    #[test]
    fn test_parse_guards_accepts_json_definitions() {
        let raw = r#"[{
            "name": "acme-internal-codename",
            "pattern": { "exact": "falcon" },
            "allowed_contexts": ["programming"],
            "blocked_domains": ["general"],
            "severity": 9
        }]"#;
        let guards = parse_guards(raw).unwrap();
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].name, "acme-internal-codename");
        assert!(matches!(guards[0].pattern, GuardPattern::Exact(ref p) if p == "falcon"));

        // Extra guards take part in filtering alongside the built-in list.
        let all = default_guards().into_iter().chain(guards).collect();
        let filter = GuardFilter::new(all);
        assert!(!filter.evaluate("falcon", "general").allowed);
        assert!(filter.evaluate("falcon", "programming").allowed);
    }

    #[test]
    fn test_parse_guards_rejects_malformed_json() {
        assert!(parse_guards("not json").is_err());
        assert!(parse_guards(r#"[{"name": "incomplete"}]"#).is_err());
    }
}
