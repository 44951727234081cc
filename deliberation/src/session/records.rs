//! Immutable records produced while a session runs: analyses, critiques,
//! syntheses, the final result, and per-call run metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentId;

/// Which deliberation phase a provider call served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyze,
    Critique,
    Synthesize,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyze => write!(f, "analyze"),
            Self::Critique => write!(f, "critique"),
            Self::Synthesize => write!(f, "synthesize"),
        }
    }
}

/// One agent's independent analysis for one iteration.
///
/// Unique per `(session_id, agent, iteration)`; immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAnalysis {
    pub session_id: String,
    pub agent: AgentId,
    pub iteration: u32,
    pub analysis_text: String,
    pub confidence: f64,
    pub key_points: Vec<String>,
    pub risks: Vec<String>,
    pub assumptions: Vec<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AgentAnalysis {
    /// Domain validation; the stores refuse records that fail this.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be in [0, 1], got {}",
                self.confidence
            ));
        }
        if self.iteration == 0 {
            return Err("iteration is 1-based".to_string());
        }
        Ok(())
    }
}

/// A directed review of one agent's analysis by another.
///
/// `from_agent != to_agent`; at most one per `(session, iteration, from, to)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub session_id: String,
    pub iteration: u32,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub score: f64,
    pub critique_text: String,
    pub weaknesses: Vec<String>,
    pub strengths: Vec<String>,
}

impl Critique {
    pub fn validate(&self) -> Result<(), String> {
        if self.from_agent == self.to_agent {
            return Err("an agent cannot critique itself".to_string());
        }
        if !(0.0..=10.0).contains(&self.score) {
            return Err(format!("score must be in [0, 10], got {}", self.score));
        }
        Ok(())
    }
}

/// A probabilistic conclusion inside a synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conclusion {
    pub statement: String,
    pub probability: f64,
    #[serde(default)]
    pub falsification_condition: Option<String>,
}

/// The integrated output of one iteration. Unique per `(session, iteration)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub session_id: String,
    pub iteration: u32,
    pub summary: String,
    pub conclusions: Vec<Conclusion>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub formalized_result: Option<String>,
    /// Agreement level reported by the synthesizer itself.
    pub consensus_level: f64,
}

impl Synthesis {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.consensus_level) {
            return Err(format!(
                "consensus_level must be in [0, 1], got {}",
                self.consensus_level
            ));
        }
        for c in &self.conclusions {
            if !(0.0..=1.0).contains(&c.probability) {
                return Err(format!(
                    "conclusion probability must be in [0, 1], got {}",
                    c.probability
                ));
            }
        }
        Ok(())
    }
}

/// Why a session stopped short of a clean completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BudgetExhausted,
    TooFewAnalyses,
    TooFewCritiques,
    SynthesisFailed,
    PersistenceFailure,
    DeadlineExceeded,
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::TooFewAnalyses => write!(f, "too_few_analyses"),
            Self::TooFewCritiques => write!(f, "too_few_critiques"),
            Self::SynthesisFailed => write!(f, "synthesis_failed"),
            Self::PersistenceFailure => write!(f, "persistence_failure"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The error block attached to a partial result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationError {
    pub reason: FailureReason,
    pub message: String,
}

/// Aggregate metrics over a whole session, derived from RunMetrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub iterations_used: u32,
    pub agents_used: Vec<AgentId>,
}

/// The synthesis of the terminal iteration plus aggregate metrics.
/// Exactly one per session that reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub session_id: String,
    /// Last synthesis produced, if any iteration got that far.
    pub synthesis: Option<Synthesis>,
    pub analyses: Vec<AgentAnalysis>,
    pub critiques: Vec<Critique>,
    pub metrics: AggregateMetrics,
    /// Present when the session ended in failure or cancellation.
    #[serde(default)]
    pub error: Option<TerminationError>,
}

/// Outcome of a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
    Timeout,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Append-only record of one provider call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetric {
    pub session_id: String,
    pub agent: AgentId,
    pub model: String,
    pub phase: Phase,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub status: CallStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunMetric {
    /// Emit this metric as a structured tracing event.
    pub fn emit(&self) {
        tracing::info!(
            target: "conclave.metrics",
            session = %self.session_id,
            agent = %self.agent,
            model = %self.model,
            phase = %self.phase,
            tokens_in = self.tokens_in,
            tokens_out = self.tokens_out,
            cost_usd = self.cost_usd,
            latency_ms = self.latency_ms,
            status = %self.status,
            "provider_call"
        );
    }
}
