use chatrelay_core::{RelayError, RelayResult};
use chatrelay_session::{SessionPolicy, DEFAULT_EXPIRY_HOURS};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted chat lifetime, in hours (one year).
pub const MAX_EXPIRY_HOURS: i64 = 24 * 365;

/// Environment variable consulted when `api_key` is left empty.
pub const API_KEY_ENV: &str = "CHATRELAY_API_KEY";

/// OpenAI-compatible completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// api.openai.com
    OpenAi,
    /// openrouter.ai
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible.
    Groq,
}

/// Completion model settings (`[model]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sent as the first message of every completion.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model_id: "gpt-4o-mini".into(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// Fills an empty `api_key` from [`API_KEY_ENV`].
    pub fn with_env_key(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.api_key = key;
            }
        }
        self
    }
}

/// Façade settings (`[session]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Completed exchanges after which a chat ends.
    pub max_exchanges: usize,
    /// Chat lifetime in hours.
    pub expiry_hours: i64,
    /// Upper bound of one completion call, queueing included.
    pub completion_timeout_secs: u64,
    /// Completion calls allowed to run at once.
    pub max_concurrent_completions: usize,
    /// Attempts made by `end_session` when the chat keeps changing under it.
    pub end_retry_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_exchanges: chatrelay_session::DEFAULT_MAX_EXCHANGES,
            expiry_hours: DEFAULT_EXPIRY_HOURS,
            completion_timeout_secs: 180,
            max_concurrent_completions: 32,
            end_retry_attempts: 3,
        }
    }
}

impl ServiceConfig {
    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> RelayResult<()> {
        if !(1..=MAX_EXPIRY_HOURS).contains(&self.expiry_hours) {
            return Err(RelayError::Config(format!(
                "session.expiry_hours must be between 1 and {MAX_EXPIRY_HOURS}, got {}",
                self.expiry_hours
            )));
        }
        if self.max_concurrent_completions == 0 {
            return Err(RelayError::Config(
                "session.max_concurrent_completions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Expiry policy. An `expiry_hours` that does not fit a [`TimeDelta`]
    /// falls back to the default lifetime; [`ServiceConfig::validate`]
    /// reports it.
    pub fn policy(&self) -> SessionPolicy {
        let expiry = TimeDelta::try_hours(self.expiry_hours)
            .unwrap_or_else(|| TimeDelta::hours(DEFAULT_EXPIRY_HOURS));
        SessionPolicy::new(self.max_exchanges, expiry)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_and_override() {
        let mut config = ModelConfig {
            provider: LlmProvider::Groq,
            ..ModelConfig::default()
        };
        assert_eq!(config.base_url(), "https://api.groq.com/openai");

        config.api_base_url = Some("http://localhost:8080/".into());
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_minimal_model_section() {
        let config: ModelConfig =
            toml::from_str("provider = \"openrouter\"\nmodel_id = \"m\"").unwrap();
        assert_eq!(config.provider, LlmProvider::OpenRouter);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.api_key.is_empty());
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_service_defaults() {
        let config: ServiceConfig = toml::from_str("expiry_hours = 1").unwrap();
        assert_eq!(config.max_exchanges, 20);
        assert_eq!(config.completion_timeout(), Duration::from_secs(180));
        assert_eq!(config.policy().expiry, TimeDelta::hours(1));
    }

    #[test]
    fn test_expiry_hours_bounds() {
        for hours in [0, -5, MAX_EXPIRY_HOURS + 1, i64::MAX] {
            let config = ServiceConfig {
                expiry_hours: hours,
                ..ServiceConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(RelayError::Config(_))),
                "expiry_hours = {hours}"
            );
        }

        let config = ServiceConfig {
            expiry_hours: MAX_EXPIRY_HOURS,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.policy().expiry, TimeDelta::hours(MAX_EXPIRY_HOURS));
    }

    #[test]
    fn test_policy_survives_out_of_range_hours() {
        let config = ServiceConfig {
            expiry_hours: i64::MAX,
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.policy().expiry,
            TimeDelta::hours(DEFAULT_EXPIRY_HOURS)
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ServiceConfig {
            max_concurrent_completions: 0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ServiceConfig::default().validate().is_ok());
    }
}
