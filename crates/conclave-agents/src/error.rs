//! Call-error taxonomy with retry classification.
//!
//! Callers query `retry_category()` / `is_retriable()` instead of string
//! matching. A failed call is an ordinary value to the engine: a single
//! bad critique never unwinds an iteration.

use thiserror::Error;

use deliberation::StoreError;

use crate::providers::ProviderError;

/// Classification used by the runner to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Transient transport or backend failure — retry with backoff.
    Transient,
    /// Schema parse failure — retry once with a strict-JSON reprompt.
    ParseFailure,
    /// Budget exhausted, deadline passed, cancelled, bad config — terminal.
    Terminal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

/// Unified error for one logical agent call.
#[derive(Debug, Error)]
pub enum AgentCallError {
    /// Typed transport error from the provider adapter.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Model replied but the output failed schema parsing twice.
    #[error("unparseable output: {reason}")]
    Parse { reason: String },

    /// Model replied with an empty body.
    #[error("empty output from model")]
    EmptyOutput,

    /// Budget gate refused to issue the call.
    #[error("budget exhausted before call")]
    BudgetExhausted,

    /// The session deadline left no time for another call.
    #[error("session deadline exceeded")]
    DeadlineExceeded,

    /// The session was cancelled while the call was pending or in flight.
    #[error("cancelled")]
    Cancelled,

    /// Unknown agent, missing binding, or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store rejected a write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AgentCallError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Provider(e) if e.is_transient() => RetryCategory::Transient,
            Self::Provider(_) => RetryCategory::Terminal,
            Self::Parse { .. } => RetryCategory::ParseFailure,
            Self::EmptyOutput => RetryCategory::Transient,
            Self::BudgetExhausted
            | Self::DeadlineExceeded
            | Self::Cancelled
            | Self::Configuration(_)
            | Self::Store(_) => RetryCategory::Terminal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// Whether the metric for this failure should read `timeout`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::Timeout { .. }))
    }
}
