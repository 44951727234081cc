//! RocksDB-backed session store.
//!
//! Column families give logical separation per record type; values are
//! bincode-encoded. Compound keys embed zero-padded iterations so prefix
//! scans return records in order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::prompts::{PromptPersistence, PromptTemplate};
use crate::session::records::{AgentAnalysis, Critique, FinalResult, RunMetric, Synthesis};
use crate::session::{Session, SessionStatus};

use super::schema::{self, keys, ALL_CFS};
use super::{
    check_analysis, check_critique, check_synthesis, SessionStore, StoreError, StoreResult,
    StoreSource,
};

/// Persistent store rooted at a filesystem path.
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
    metric_seq: AtomicU64,
}

impl RocksStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            db: RwLock::new(db),
            path,
            metric_seq: AtomicU64::new(0),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", cf_name)))?;
        let bytes =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", cf_name)))?;
        match db
            .get_cf(&cf, key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn raw_exists(&self, cf_name: &str, key: &str) -> StoreResult<bool> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", cf_name)))?;
        Ok(db
            .get_cf(&cf, key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some())
    }

    /// All values whose key starts with `prefix`, in key order.
    fn list_prefix<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", cf_name)))?;

        let mut values = Vec::new();
        let iter = db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward),
        );
        for result in iter {
            let (key, value) = result.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key_str = String::from_utf8_lossy(&key);
            if !key_str.starts_with(prefix) {
                break;
            }
            let decoded = bincode::deserialize(&value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            values.push(decoded);
        }
        Ok(values)
    }

    fn delete_prefix(&self, cf_name: &str, prefix: &str) -> StoreResult<usize> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", cf_name)))?;

        let mut to_delete = Vec::new();
        let iter = db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward),
        );
        for result in iter {
            let (key, _) = result.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            if !key_str.starts_with(prefix) {
                break;
            }
            to_delete.push(key.to_vec());
        }

        let count = to_delete.len();
        for key in to_delete {
            db.delete_cf(&cf, key)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(count)
    }
}

impl SessionStore for RocksStore {
    fn create_session(&self, session: &Session) -> StoreResult<()> {
        let key = keys::session(&session.id);
        if self.raw_exists(schema::CF_SESSIONS, &key)? {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        self.put(schema::CF_SESSIONS, &key, session)
    }

    fn load_session(&self, session_id: &str) -> StoreResult<Session> {
        self.get(schema::CF_SESSIONS, &keys::session(session_id))?
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))
    }

    fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self.list_prefix(schema::CF_SESSIONS, "sess:")?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    fn update_status(&self, session_id: &str, status: SessionStatus) -> StoreResult<()> {
        let mut session = self.load_session(session_id)?;
        session.set_status(status);
        self.put(schema::CF_SESSIONS, &keys::session(session_id), &session)
    }

    fn append_analysis(&self, analysis: &AgentAnalysis) -> StoreResult<()> {
        let session = self.load_session(&analysis.session_id)?;
        check_analysis(&session, analysis)?;

        let key = keys::analysis(
            &analysis.session_id,
            analysis.iteration,
            analysis.agent.as_str(),
        );
        if self.raw_exists(schema::CF_ANALYSES, &key)? {
            return Err(StoreError::Conflict(format!(
                "analysis already recorded for ({}, {}, {})",
                analysis.session_id, analysis.agent, analysis.iteration
            )));
        }
        self.put(schema::CF_ANALYSES, &key, analysis)
    }

    fn append_critique(&self, critique: &Critique) -> StoreResult<()> {
        self.load_session(&critique.session_id)?;
        check_critique(critique)?;

        let key = keys::critique(
            &critique.session_id,
            critique.iteration,
            critique.from_agent.as_str(),
            critique.to_agent.as_str(),
        );
        if self.raw_exists(schema::CF_CRITIQUES, &key)? {
            return Err(StoreError::Conflict(format!(
                "critique already recorded for ({}, {}, {} -> {})",
                critique.session_id, critique.iteration, critique.from_agent, critique.to_agent
            )));
        }
        self.put(schema::CF_CRITIQUES, &key, critique)
    }

    fn append_synthesis(&self, synthesis: &Synthesis) -> StoreResult<()> {
        self.load_session(&synthesis.session_id)?;
        check_synthesis(synthesis)?;

        let key = keys::synthesis(&synthesis.session_id, synthesis.iteration);
        if self.raw_exists(schema::CF_SYNTHESES, &key)? {
            return Err(StoreError::Conflict(format!(
                "synthesis already recorded for ({}, {})",
                synthesis.session_id, synthesis.iteration
            )));
        }
        self.put(schema::CF_SYNTHESES, &key, synthesis)
    }

    fn append_metric(&self, metric: &RunMetric) -> StoreResult<()> {
        let seq = self.metric_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = metric.created_at.timestamp_nanos_opt().unwrap_or(0);
        let key = keys::metric(&metric.session_id, nanos, seq);
        self.put(schema::CF_METRICS, &key, metric)
    }

    fn list_analyses(&self, session_id: &str) -> StoreResult<Vec<AgentAnalysis>> {
        self.list_prefix(schema::CF_ANALYSES, &keys::analysis_prefix(session_id))
    }

    fn list_critiques(&self, session_id: &str) -> StoreResult<Vec<Critique>> {
        self.list_prefix(schema::CF_CRITIQUES, &keys::critique_prefix(session_id))
    }

    fn list_syntheses(&self, session_id: &str) -> StoreResult<Vec<Synthesis>> {
        self.list_prefix(schema::CF_SYNTHESES, &keys::synthesis_prefix(session_id))
    }

    fn list_metrics(&self, session_id: &str) -> StoreResult<Vec<RunMetric>> {
        self.list_prefix(schema::CF_METRICS, &keys::metric_prefix(session_id))
    }

    fn list_all_metrics(&self) -> StoreResult<Vec<RunMetric>> {
        self.list_prefix(schema::CF_METRICS, "metric:")
    }

    fn finalize(&self, result: &FinalResult) -> StoreResult<()> {
        self.load_session(&result.session_id)?;
        let key = keys::final_result(&result.session_id);
        if self.raw_exists(schema::CF_FINALS, &key)? {
            return Err(StoreError::Conflict(format!(
                "session {} already finalized",
                result.session_id
            )));
        }
        self.put(schema::CF_FINALS, &key, result)
    }

    fn load_final(&self, session_id: &str) -> StoreResult<Option<FinalResult>> {
        self.get(schema::CF_FINALS, &keys::final_result(session_id))
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        // Session row first so a concurrent reader cannot observe children
        // of a session that no longer exists.
        let key = keys::session(session_id);
        if !self.raw_exists(schema::CF_SESSIONS, &key)? {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }
        {
            let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
            let cf = db
                .cf_handle(schema::CF_SESSIONS)
                .ok_or_else(|| StoreError::Backend("missing column family sessions".into()))?;
            db.delete_cf(&cf, key.as_bytes())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        self.delete_prefix(schema::CF_ANALYSES, &keys::analysis_prefix(session_id))?;
        self.delete_prefix(schema::CF_CRITIQUES, &keys::critique_prefix(session_id))?;
        self.delete_prefix(schema::CF_SYNTHESES, &keys::synthesis_prefix(session_id))?;
        self.delete_prefix(schema::CF_METRICS, &keys::metric_prefix(session_id))?;
        self.delete_prefix(schema::CF_FINALS, &keys::final_result(session_id))?;
        Ok(())
    }

    fn source(&self) -> StoreSource {
        StoreSource::Database
    }
}

impl PromptPersistence for RocksStore {
    fn persist_template(&self, template: &PromptTemplate) -> Result<(), String> {
        let key = keys::prompt(
            template.agent.as_str(),
            template.prompt_type.as_str(),
            template.version,
        );
        self.put(schema::CF_PROMPTS, &key, template)
            .map_err(|e| e.to_string())
    }

    fn load_templates(&self) -> Result<Vec<PromptTemplate>, String> {
        self.list_prefix(schema::CF_PROMPTS, "prompt:")
            .map_err(|e| e.to_string())
    }
}
