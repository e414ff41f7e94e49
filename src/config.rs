//! Runtime configuration
//!
//! Everything the core consumes but does not own: the model endpoint,
//! the checkpoint database and per-tool credentials. Loaded from the
//! environment (after `.env`) by the binaries and injected downward.

use crate::error::OrchestrationError;
use crate::prompt::FINVOICE_SYSTEM_PROMPT;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "finvoice_ai";
pub const DEFAULT_MAX_ROUND_TRIPS: u32 = 10;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

/// Knobs for a single turn of the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub namespace: String,
    pub max_round_trips: u32,
    pub model_timeout: Duration,
    /// Capacity of the fragment channel to the caller.
    pub fragment_buffer: usize,
    pub system_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            model_timeout: Duration::from_secs(60),
            fragment_buffer: 64,
            system_prompt: FINVOICE_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolCredentials {
    pub alpha_vantage_api_key: Option<String>,
    pub alpha_vantage_base_url: Option<String>,
    pub serper_api_key: Option<String>,
    pub serper_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub turn: TurnConfig,
    pub tools: ToolCredentials,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model = ModelConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: parse_or(&get, "MODEL_TEMPERATURE", 0.0)?,
        };

        let turn = TurnConfig {
            namespace: get("CHECKPOINT_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            max_round_trips: parse_or(&get, "MAX_ROUND_TRIPS", DEFAULT_MAX_ROUND_TRIPS)?,
            model_timeout: Duration::from_secs(parse_or(&get, "MODEL_TIMEOUT_SECS", 60)?),
            ..TurnConfig::default()
        };

        if turn.max_round_trips == 0 {
            return Err(OrchestrationError::ConfigError(
                "MAX_ROUND_TRIPS must be at least 1".to_string(),
            ));
        }

        let tools = ToolCredentials {
            alpha_vantage_api_key: get("ALPHA_VANTAGE_API_KEY"),
            alpha_vantage_base_url: get("ALPHA_VANTAGE_BASE_URL"),
            serper_api_key: get("SERPER_API_KEY"),
            serper_base_url: get("SERPER_BASE_URL"),
        };

        let database_url = get("POSTGRES_URL").or_else(|| get("DATABASE_URL"));

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw.parse().map_err(|_| {
                OrchestrationError::ConfigError(format!("PORT is not a valid port: {}", raw))
            })?,
            None => 8080,
        };

        Ok(Self {
            model,
            turn,
            tools,
            database_url,
            port,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
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
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.turn.namespace, "finvoice_ai");
        assert_eq!(config.turn.max_round_trips, DEFAULT_MAX_ROUND_TRIPS);
        assert_eq!(config.port, 8080);
        assert!(config.database_url.is_none());
        assert!(config.model.api_key.is_none());
    }

    #[test]
    fn test_overrides_and_fallback_keys() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENAI_BASE_URL", "http://localhost:9000/v1/"),
            ("DATABASE_URL", "postgres://localhost/finvoice"),
            ("API_PORT", "9090"),
            ("MAX_ROUND_TRIPS", "4"),
            ("MODEL_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.model.base_url, "http://localhost:9000/v1");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/finvoice"));
        assert_eq!(config.port, 9090);
        assert_eq!(config.turn.max_round_trips, 4);
        assert_eq!(config.turn.model_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = AppConfig::from_lookup(lookup(&[("MAX_ROUND_TRIPS", "many")])).unwrap_err();
        assert!(matches!(err, OrchestrationError::ConfigError(_)));
    }

    #[test]
    fn test_zero_round_trips_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("MAX_ROUND_TRIPS", "0")])).is_err());
    }
}
