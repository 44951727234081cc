//! Runtime configuration for the engine and server.
//!
//! Precedence (highest to lowest): CLI flags, environment variables,
//! built-in defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::{anthropic, gemini, openai};

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
const ENV_ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";
const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
const ENV_GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";
const ENV_DEEPSEEK_API_KEY: &str = "DEEPSEEK_API_KEY";
const ENV_DEEPSEEK_BASE_URL: &str = "DEEPSEEK_BASE_URL";

const ENV_STATE_PATH: &str = "CONCLAVE_STATE_PATH";
const ENV_PORT: &str = "CONCLAVE_PORT";
const ENV_CALL_TIMEOUT_SECS: &str = "CONCLAVE_CALL_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "CONCLAVE_MAX_RETRIES";
const ENV_SESSION_DEADLINE_SECS: &str = "CONCLAVE_SESSION_DEADLINE_SECS";

/// Default DeepSeek endpoint (OpenAI-compatible wire format).
const DEEPSEEK_DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Credentials and endpoint for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub api_key: String,
    pub base_url: String,
}

/// Retry/backoff knobs consumed by the agent runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (2 retries = 3 attempts).
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    /// Jitter as a fraction of the computed delay.
    pub backoff_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_jitter: 0.25,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub openai: ProviderEndpoint,
    pub anthropic: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
    pub deepseek: ProviderEndpoint,

    /// Per-call deadline (`T_call`).
    pub call_timeout: Duration,
    /// Wall-clock deadline for a whole session.
    pub session_deadline: Duration,
    pub retry: RetryConfig,
    /// Soft cap on in-flight calls per provider.
    pub max_in_flight_per_provider: usize,

    /// RocksDB path; `None` selects the ephemeral in-memory store.
    pub state_path: Option<PathBuf>,
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            openai: ProviderEndpoint {
                api_key: String::new(),
                base_url: openai::DEFAULT_BASE_URL.to_string(),
            },
            anthropic: ProviderEndpoint {
                api_key: String::new(),
                base_url: anthropic::DEFAULT_BASE_URL.to_string(),
            },
            gemini: ProviderEndpoint {
                api_key: String::new(),
                base_url: gemini::DEFAULT_BASE_URL.to_string(),
            },
            deepseek: ProviderEndpoint {
                api_key: String::new(),
                base_url: DEEPSEEK_DEFAULT_BASE_URL.to_string(),
            },
            call_timeout: Duration::from_secs(60),
            session_deadline: Duration::from_secs(600),
            retry: RetryConfig::default(),
            max_in_flight_per_provider: 4,
            state_path: None,
            port: 8080,
        }
    }
}

impl EngineConfig {
    /// Build from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai: ProviderEndpoint {
                api_key: env_or(ENV_OPENAI_API_KEY, ""),
                base_url: env_or(ENV_OPENAI_BASE_URL, &defaults.openai.base_url),
            },
            anthropic: ProviderEndpoint {
                api_key: env_or(ENV_ANTHROPIC_API_KEY, ""),
                base_url: env_or(ENV_ANTHROPIC_BASE_URL, &defaults.anthropic.base_url),
            },
            gemini: ProviderEndpoint {
                api_key: env_or(ENV_GEMINI_API_KEY, ""),
                base_url: env_or(ENV_GEMINI_BASE_URL, &defaults.gemini.base_url),
            },
            deepseek: ProviderEndpoint {
                api_key: env_or(ENV_DEEPSEEK_API_KEY, ""),
                base_url: env_or(ENV_DEEPSEEK_BASE_URL, &defaults.deepseek.base_url),
            },
            call_timeout: Duration::from_secs(env_parse(ENV_CALL_TIMEOUT_SECS, 60)),
            session_deadline: Duration::from_secs(env_parse(ENV_SESSION_DEADLINE_SECS, 600)),
            retry: RetryConfig {
                max_retries: env_parse(ENV_MAX_RETRIES, defaults.retry.max_retries),
                ..defaults.retry
            },
            max_in_flight_per_provider: defaults.max_in_flight_per_provider,
            state_path: env::var(ENV_STATE_PATH).ok().map(PathBuf::from),
            port: env_parse(ENV_PORT, defaults.port),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be > 0".to_string());
        }
        if self.session_deadline < self.call_timeout {
            return Err("session_deadline must be >= call_timeout".to_string());
        }
        if self.max_in_flight_per_provider == 0 {
            return Err("max_in_flight_per_provider must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.retry.backoff_jitter) {
            return Err(format!(
                "backoff_jitter must be in [0, 1), got {}",
                self.retry.backoff_jitter
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(format!(
                "backoff_factor must be >= 1, got {}",
                self.retry.backoff_factor
            ));
        }
        Ok(())
    }
}
