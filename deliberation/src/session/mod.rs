//! Session entities and the deliberation phase machine.

pub mod records;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical agent identity — a persona bound to a provider and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Step-by-step reasoning, evidence weighing.
    LogicalAnalyst,
    /// Structure, dependencies, integration — also the default synthesizer.
    SystemsArchitect,
    /// Divergent options and counterfactuals.
    AlternativesGenerator,
    /// Quantification, formal framing, falsifiability.
    FormalAnalyst,
}

impl AgentId {
    /// All four default agents, in canonical (alphabetical) order.
    pub fn all() -> [AgentId; 4] {
        let mut agents = [
            Self::LogicalAnalyst,
            Self::SystemsArchitect,
            Self::AlternativesGenerator,
            Self::FormalAnalyst,
        ];
        agents.sort_by_key(|a| a.as_str());
        agents
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogicalAnalyst => "logical_analyst",
            Self::SystemsArchitect => "systems_architect",
            Self::AlternativesGenerator => "alternatives_generator",
            Self::FormalAnalyst => "formal_analyst",
        }
    }

    pub fn role_title(&self) -> &'static str {
        match self {
            Self::LogicalAnalyst => "Logical Analyst",
            Self::SystemsArchitect => "Systems Architect",
            Self::AlternativesGenerator => "Alternatives Generator",
            Self::FormalAnalyst => "Formal Analyst",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::LogicalAnalyst => "Structured reasoning, evidence weighing, assumption surfacing",
            Self::SystemsArchitect => {
                "System structure, dependencies, second-order effects, synthesis"
            }
            Self::AlternativesGenerator => "Divergent options, counterfactuals, unconventional paths",
            Self::FormalAnalyst => "Quantification, formal framing, falsifiable predictions",
        }
    }

    pub fn parse(s: &str) -> Option<AgentId> {
        match s {
            "logical_analyst" => Some(Self::LogicalAnalyst),
            "systems_architect" => Some(Self::SystemsArchitect),
            "alternatives_generator" => Some(Self::AlternativesGenerator),
            "formal_analyst" => Some(Self::FormalAnalyst),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of task being deliberated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Strategy,
    Research,
    Investment,
    Development,
    Audit,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Research => "research",
            Self::Investment => "investment",
            Self::Development => "development",
            Self::Audit => "audit",
        }
    }

    pub fn parse(s: &str) -> Option<TaskType> {
        match s {
            "strategy" => Some(Self::Strategy),
            "research" => Some(Self::Research),
            "investment" => Some(Self::Investment),
            "development" => Some(Self::Development),
            "audit" => Some(Self::Audit),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-session tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Agents participating in this session. Must be non-empty to start.
    pub enabled_agents: Vec<AgentId>,
    /// Per-agent model overrides; absent agents use their default model.
    pub models: HashMap<AgentId, String>,
    /// Sampling temperature for analyze/critique calls.
    pub temperature: f64,
    /// Iteration cap, inclusive.
    pub max_iterations: u32,
    /// Consensus level at or above which the session completes.
    pub consensus_threshold: f64,
    /// Hard spend ceiling for the whole session.
    pub budget_usd: f64,
    /// Agent that produces the synthesis each iteration.
    pub synthesizer: AgentId,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled_agents: AgentId::all().to_vec(),
            models: HashMap::new(),
            temperature: 0.7,
            max_iterations: 3,
            consensus_threshold: 0.8,
            budget_usd: 1.0,
            synthesizer: AgentId::SystemsArchitect,
        }
    }
}

impl SessionSettings {
    /// Validate all ranges; returns an error string naming the bad field.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled_agents.is_empty() {
            return Err("enabled_agents must be non-empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be in [0, 1], got {}",
                self.temperature
            ));
        }
        if !(1..=5).contains(&self.max_iterations) {
            return Err(format!(
                "max_iterations must be in [1, 5], got {}",
                self.max_iterations
            ));
        }
        if !(0.5..=0.95).contains(&self.consensus_threshold) {
            return Err(format!(
                "consensus_threshold must be in [0.5, 0.95], got {}",
                self.consensus_threshold
            ));
        }
        if self.budget_usd <= 0.0 {
            return Err(format!("budget_usd must be > 0, got {}", self.budget_usd));
        }
        Ok(())
    }

    /// Enabled agents in canonical alphabetical order (dedup preserved).
    pub fn agents_in_order(&self) -> Vec<AgentId> {
        let mut agents = self.enabled_agents.clone();
        agents.sort_by_key(|a| a.as_str());
        agents.dedup();
        agents
    }
}

/// A deliberation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task_text: String,
    pub task_type: TaskType,
    pub context_text: Option<String>,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(task_text: &str, task_type: TaskType, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_text: task_text.to_string(),
            task_type,
            context_text: None,
            status: SessionStatus::Pending,
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context_text = Some(context.to_string());
        self
    }

    /// Move to a new status, bumping `updated_at` monotonically.
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Phase of a running session. Analyze/Critique/Synthesize/Evaluate carry
/// the 1-based iteration they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "iteration")]
pub enum SessionPhase {
    Pending,
    Analyzing(u32),
    Critiquing(u32),
    Synthesizing(u32),
    Evaluating(u32),
    Completed,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Iteration this phase belongs to, if it is iteration-scoped.
    pub fn iteration(self) -> Option<u32> {
        match self {
            Self::Analyzing(i) | Self::Critiquing(i) | Self::Synthesizing(i)
            | Self::Evaluating(i) => Some(i),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of this phase.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Failure and cancellation are reachable from any live phase.
        if matches!(next, Self::Failed | Self::Cancelled) {
            return true;
        }
        match (self, next) {
            (Self::Pending, Self::Analyzing(1)) => true,
            (Self::Analyzing(i), Self::Critiquing(j)) => i == j,
            // Single-agent sessions skip the critique phase entirely.
            (Self::Analyzing(i), Self::Synthesizing(j)) => i == j,
            (Self::Critiquing(i), Self::Synthesizing(j)) => i == j,
            (Self::Synthesizing(i), Self::Evaluating(j)) => i == j,
            (Self::Evaluating(i), Self::Analyzing(j)) => j == i + 1,
            (Self::Evaluating(_), Self::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Analyzing(i) => write!(f, "analyzing({})", i),
            Self::Critiquing(i) => write!(f, "critiquing({})", i),
            Self::Synthesizing(i) => write!(f, "synthesizing({})", i),
            Self::Evaluating(i) => write!(f, "evaluating({})", i),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Error for illegal phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Tracks a session's phase and transition history while the engine
/// drives it. The engine's owner task is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub phase: SessionPhase,
    pub transitions: Vec<PhaseTransition>,
}

impl SessionProgress {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: SessionPhase::Pending,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new phase, recording the step.
    pub fn transition(&mut self, to: SessionPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Highest iteration reached so far (0 before the first analyze).
    pub fn current_iteration(&self) -> u32 {
        self.transitions
            .iter()
            .filter_map(|t| t.to.iteration())
            .max()
            .unwrap_or(0)
    }

    /// Compact status line for logs.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] session={} transitions={}",
            self.phase,
            self.session_id,
            self.transitions.len()
        )
    }
}
