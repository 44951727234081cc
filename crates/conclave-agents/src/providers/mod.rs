//! Uniform transport layer over heterogeneous model provider APIs.
//!
//! Adapters are pure transport plus token accounting: they never
//! interpret response text, never retry (retry policy belongs to the
//! agent runner), and honor the per-call deadline handed to them.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registry::{AgentBinding, ProviderRegistry};

/// Typed transport error from a provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("call deadline exceeded after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {:?})", d),
        None => String::new(),
    }
}

impl ProviderError {
    /// Whether the agent runner may retry this call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::InvalidRequest(_) => false,
        }
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Upstream { .. } => "upstream_error",
            Self::Network(_) => "network",
        }
    }
}

/// A completed provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: String,
}

/// Parameters for a single call.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    /// Effective deadline for this call.
    pub deadline: Duration,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            stop: None,
            deadline: Duration::from_secs(60),
        }
    }
}

/// A model provider endpoint.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Issue one completion call. Must not retry internally.
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        params: &CallParams,
    ) -> Result<Completion, ProviderError>;

    /// Cheap reachability check for `/health`.
    async fn is_available(&self) -> bool;
}

/// Map a reqwest transport failure to the provider error taxonomy.
pub(crate) fn map_transport_error(err: reqwest::Error, deadline: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            elapsed_ms: deadline.as_millis() as u64,
        }
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
pub(crate) fn map_status_error(
    status: u16,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after },
        400..=499 => ProviderError::InvalidRequest(format!("({}) {}", status, body)),
        _ => ProviderError::Upstream { status, body },
    }
}

/// Parse a `Retry-After` header value in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
