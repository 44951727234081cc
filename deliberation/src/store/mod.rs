//! Session store facade.
//!
//! Narrow interface over session persistence: one session row, append-only
//! child records, one final result. Two implementations: in-memory
//! (ephemeral, used in tests and when no storage path is configured) and
//! RocksDB (single-node embedded).

pub mod memory;
pub mod rocks;
pub mod schema;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::records::{AgentAnalysis, Critique, FinalResult, RunMetric, Synthesis};
use crate::session::{Session, SessionStatus};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a session store.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Where a store keeps its data; surfaced in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSource {
    Memory,
    Database,
}

impl std::fmt::Display for StoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Database => write!(f, "database"),
        }
    }
}

/// The session store facade. Child-record writes are append-only; the
/// session row itself only moves status forward.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, session: &Session) -> StoreResult<()>;
    fn load_session(&self, session_id: &str) -> StoreResult<Session>;
    fn list_sessions(&self) -> StoreResult<Vec<Session>>;
    fn update_status(&self, session_id: &str, status: SessionStatus) -> StoreResult<()>;

    fn append_analysis(&self, analysis: &AgentAnalysis) -> StoreResult<()>;
    fn append_critique(&self, critique: &Critique) -> StoreResult<()>;
    fn append_synthesis(&self, synthesis: &Synthesis) -> StoreResult<()>;
    fn append_metric(&self, metric: &RunMetric) -> StoreResult<()>;

    fn list_analyses(&self, session_id: &str) -> StoreResult<Vec<AgentAnalysis>>;
    fn list_critiques(&self, session_id: &str) -> StoreResult<Vec<Critique>>;
    fn list_syntheses(&self, session_id: &str) -> StoreResult<Vec<Synthesis>>;
    fn list_metrics(&self, session_id: &str) -> StoreResult<Vec<RunMetric>>;
    /// Every metric in the store, across sessions (for aggregation).
    fn list_all_metrics(&self) -> StoreResult<Vec<RunMetric>>;

    fn finalize(&self, result: &FinalResult) -> StoreResult<()>;
    fn load_final(&self, session_id: &str) -> StoreResult<Option<FinalResult>>;

    /// Delete a session and everything it owns.
    fn delete_session(&self, session_id: &str) -> StoreResult<()>;

    fn source(&self) -> StoreSource;
}

/// Shared append-time validation: domain ranges plus the invariant that
/// the producing agent is enabled for the session.
pub(crate) fn check_analysis(session: &Session, analysis: &AgentAnalysis) -> StoreResult<()> {
    analysis.validate().map_err(StoreError::Invalid)?;
    if !session.settings.enabled_agents.contains(&analysis.agent) {
        return Err(StoreError::Invalid(format!(
            "agent {} is not enabled for session {}",
            analysis.agent, session.id
        )));
    }
    Ok(())
}

pub(crate) fn check_critique(critique: &Critique) -> StoreResult<()> {
    critique.validate().map_err(StoreError::Invalid)
}

pub(crate) fn check_synthesis(synthesis: &Synthesis) -> StoreResult<()> {
    synthesis.validate().map_err(StoreError::Invalid)
}
