//! In-memory session store — ephemeral, single-process only.
//!
//! Used when no storage path is configured and throughout the test
//! suites. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::session::records::{AgentAnalysis, Critique, FinalResult, RunMetric, Synthesis};
use crate::session::{Session, SessionStatus};

use super::{
    check_analysis, check_critique, check_synthesis, SessionStore, StoreError, StoreResult,
    StoreSource,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    analyses: HashMap<String, Vec<AgentAnalysis>>,
    critiques: HashMap<String, Vec<Critique>>,
    syntheses: HashMap<String, Vec<Synthesis>>,
    metrics: HashMap<String, Vec<RunMetric>>,
    finals: HashMap<String, FinalResult>,
}

/// Ephemeral store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn create_session(&self, session: &Session) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> StoreResult<Session> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))
    }

    fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    fn update_status(&self, session_id: &str, status: SessionStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        session.set_status(status);
        Ok(())
    }

    fn append_analysis(&self, analysis: &AgentAnalysis) -> StoreResult<()> {
        let session = self.load_session(&analysis.session_id)?;
        check_analysis(&session, analysis)?;

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let records = inner
            .analyses
            .entry(analysis.session_id.clone())
            .or_default();
        if records
            .iter()
            .any(|a| a.agent == analysis.agent && a.iteration == analysis.iteration)
        {
            return Err(StoreError::Conflict(format!(
                "analysis already recorded for ({}, {}, {})",
                analysis.session_id, analysis.agent, analysis.iteration
            )));
        }
        records.push(analysis.clone());
        Ok(())
    }

    fn append_critique(&self, critique: &Critique) -> StoreResult<()> {
        self.load_session(&critique.session_id)?;
        check_critique(critique)?;

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let records = inner
            .critiques
            .entry(critique.session_id.clone())
            .or_default();
        if records.iter().any(|c| {
            c.iteration == critique.iteration
                && c.from_agent == critique.from_agent
                && c.to_agent == critique.to_agent
        }) {
            return Err(StoreError::Conflict(format!(
                "critique already recorded for ({}, {}, {} -> {})",
                critique.session_id, critique.iteration, critique.from_agent, critique.to_agent
            )));
        }
        records.push(critique.clone());
        Ok(())
    }

    fn append_synthesis(&self, synthesis: &Synthesis) -> StoreResult<()> {
        self.load_session(&synthesis.session_id)?;
        check_synthesis(synthesis)?;

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let records = inner
            .syntheses
            .entry(synthesis.session_id.clone())
            .or_default();
        if records.iter().any(|s| s.iteration == synthesis.iteration) {
            return Err(StoreError::Conflict(format!(
                "synthesis already recorded for ({}, {})",
                synthesis.session_id, synthesis.iteration
            )));
        }
        records.push(synthesis.clone());
        Ok(())
    }

    fn append_metric(&self, metric: &RunMetric) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .metrics
            .entry(metric.session_id.clone())
            .or_default()
            .push(metric.clone());
        Ok(())
    }

    fn list_analyses(&self, session_id: &str) -> StoreResult<Vec<AgentAnalysis>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = inner.analyses.get(session_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| {
            a.iteration
                .cmp(&b.iteration)
                .then(a.agent.as_str().cmp(b.agent.as_str()))
        });
        Ok(records)
    }

    fn list_critiques(&self, session_id: &str) -> StoreResult<Vec<Critique>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = inner.critiques.get(session_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| {
            a.iteration
                .cmp(&b.iteration)
                .then(a.from_agent.as_str().cmp(b.from_agent.as_str()))
                .then(a.to_agent.as_str().cmp(b.to_agent.as_str()))
        });
        Ok(records)
    }

    fn list_syntheses(&self, session_id: &str) -> StoreResult<Vec<Synthesis>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = inner.syntheses.get(session_id).cloned().unwrap_or_default();
        records.sort_by_key(|s| s.iteration);
        Ok(records)
    }

    fn list_metrics(&self, session_id: &str) -> StoreResult<Vec<RunMetric>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.metrics.get(session_id).cloned().unwrap_or_default())
    }

    fn list_all_metrics(&self) -> StoreResult<Vec<RunMetric>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.metrics.values().flatten().cloned().collect())
    }

    fn finalize(&self, result: &FinalResult) -> StoreResult<()> {
        self.load_session(&result.session_id)?;
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.finals.contains_key(&result.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already finalized",
                result.session_id
            )));
        }
        inner.finals.insert(result.session_id.clone(), result.clone());
        Ok(())
    }

    fn load_final(&self, session_id: &str) -> StoreResult<Option<FinalResult>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.finals.get(session_id).cloned())
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.sessions.remove(session_id).is_none() {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }
        inner.analyses.remove(session_id);
        inner.critiques.remove(session_id);
        inner.syntheses.remove(session_id);
        inner.metrics.remove(session_id);
        inner.finals.remove(session_id);
        Ok(())
    }

    fn source(&self) -> StoreSource {
        StoreSource::Memory
    }
}
