//! Process configuration from environment variables

use std::time::Duration;

use crate::agent::AgentConfig;
use crate::sandbox::HttpSandboxSettings;

pub const DEFAULT_LLM_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LLM_MODEL: &str = "deepseek/deepseek-chat";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Everything the binary needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm_api_base: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// Absent when no sandbox features will be used; the sandbox manager
    /// refuses to start without it
    pub sandbox_api_key: Option<String>,
    pub sandbox_api_url: String,
    pub sandbox_domain: String,
    pub sandbox_template: String,
    pub store_url: String,
    pub otlp_endpoint: Option<String>,
    pub max_turns: usize,
}

impl AppConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any name → value lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let sandbox_defaults = HttpSandboxSettings::default();

        let max_turns = match get("AGENT_MAX_TURNS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "AGENT_MAX_TURNS",
                        value: raw,
                    })
                }
            },
            None => AgentConfig::default().max_turns,
        };

        Ok(Self {
            llm_api_base: get("LLM_API_BASE").unwrap_or_else(|| DEFAULT_LLM_API_BASE.to_string()),
            llm_api_key: required("LLM_API_KEY")?,
            llm_model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            sandbox_api_key: get("SANDBOX_API_KEY"),
            sandbox_api_url: get("SANDBOX_API_URL").unwrap_or(sandbox_defaults.api_url),
            sandbox_domain: get("SANDBOX_DOMAIN").unwrap_or(sandbox_defaults.domain),
            sandbox_template: get("SANDBOX_TEMPLATE").unwrap_or(sandbox_defaults.template),
            store_url: required("STORE_URL")?,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            max_turns,
        })
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.llm_model.clone(),
            max_turns: self.max_turns,
            ..AgentConfig::default()
        }
    }

    pub fn sandbox_settings(&self) -> HttpSandboxSettings {
        HttpSandboxSettings {
            api_url: self.sandbox_api_url.clone(),
            api_key: self.sandbox_api_key.clone(),
            domain: self.sandbox_domain.clone(),
            template: self.sandbox_template.clone(),
            ..HttpSandboxSettings::default()
        }
    }

    /// Timeout for one completion request
    pub fn completion_timeout(&self) -> Duration {
        self.agent_config().completion_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("LLM_API_KEY", "k"), ("STORE_URL", "memory://")])).unwrap();
        assert_eq!(config.llm_api_base, DEFAULT_LLM_API_BASE);
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(config.max_turns, 5);
        assert!(config.sandbox_api_key.is_none());
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sandbox_domain, "e2b.app");
    }

    #[test]
    fn test_missing_required_values() {
        let err = AppConfig::from_lookup(lookup(&[("STORE_URL", "memory://")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("LLM_API_KEY")));

        let err = AppConfig::from_lookup(lookup(&[("LLM_API_KEY", "k"), ("STORE_URL", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STORE_URL")));
    }

    #[test]
    fn test_invalid_max_turns() {
        let err = AppConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "k"),
            ("STORE_URL", "memory://"),
            ("AGENT_MAX_TURNS", "zero"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AGENT_MAX_TURNS", .. }));
    }

    #[test]
    fn test_overrides_flow_into_settings() {
        let config = AppConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "k"),
            ("STORE_URL", "memory://"),
            ("LLM_MODEL", "openai/gpt-4o"),
            ("AGENT_MAX_TURNS", "8"),
            ("SANDBOX_API_KEY", "sk"),
            ("SANDBOX_DOMAIN", "sandbox.test"),
        ]))
        .unwrap();
        let agent = config.agent_config();
        assert_eq!(agent.model, "openai/gpt-4o");
        assert_eq!(agent.max_turns, 8);
        let sandbox = config.sandbox_settings();
        assert_eq!(sandbox.api_key.as_deref(), Some("sk"));
        assert_eq!(sandbox.domain, "sandbox.test");
    }
}
