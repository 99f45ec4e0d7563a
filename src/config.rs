use std::time::Duration;

use anyhow::{bail, Context};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub llm: LlmConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_connections: u32 = match non_empty("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got '{raw}'"))?,
            None => 5,
        };
        if max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be a positive integer, got '0'");
        }
        let timeout_secs: u64 = match non_empty("LLM_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("LLM_TIMEOUT_SECS must be a number of seconds, got '{raw}'"))?,
            None => 60,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            max_connections,
            llm: LlmConfig {
                api_key: non_empty("LLM_API_KEY"),
                base_url: non_empty("LLM_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                model: non_empty("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, "https://api.openai.com");
        assert_eq!(config.llm.timeout, Duration::from_secs(60));
        assert!(config.llm.api_key.is_none());
        assert!(config.database_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/tacticalgrade"),
            ("DB_MAX_CONNECTIONS", "12"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_MODEL", "gpt-4o-mini"),
            ("LLM_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/tacticalgrade");
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.timeout, Duration::from_secs(5));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[("LLM_API_KEY", "  ")])).unwrap();
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn rejects_unparseable_numbers() {
        assert!(Config::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "many")])).is_err());
        assert!(Config::from_lookup(lookup(&[("LLM_TIMEOUT_SECS", "-1")])).is_err());
    }

    #[test]
    fn rejects_empty_connection_pool() {
        let err = Config::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
        assert!(Config::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "00")])).is_err());
    }
}
