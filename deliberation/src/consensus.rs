//! Consensus evaluation — the refine-or-stop decision after each iteration.

use serde::{Deserialize, Serialize};

use crate::session::records::{Critique, Synthesis};

/// Why the evaluator stopped the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Synthesizer-reported consensus met the threshold.
    ConsensusReached,
    /// Iteration cap hit.
    MaxIterations,
    /// Remaining budget cannot fund another full iteration.
    BudgetFloor,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConsensusReached => write!(f, "consensus_reached"),
            Self::MaxIterations => write!(f, "max_iterations"),
            Self::BudgetFloor => write!(f, "budget_floor"),
        }
    }
}

/// Evaluator verdict for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum EvaluationDecision {
    Refine { next_iteration: u32 },
    Stop { reason: StopReason },
}

impl EvaluationDecision {
    pub fn is_refine(&self) -> bool {
        matches!(self, Self::Refine { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Refine { next_iteration } => format!("refine({})", next_iteration),
            Self::Stop { reason } => format!("stop({})", reason),
        }
    }
}

/// Inputs the evaluator needs after iteration `i`.
#[derive(Debug, Clone)]
pub struct EvaluationInputs {
    pub consensus_level: f64,
    pub iteration: u32,
    pub max_iterations: u32,
    pub spent_usd: f64,
    pub budget_usd: f64,
    /// Mean cost of a provider call over the session so far.
    pub recent_avg_call_cost: f64,
    /// Provider calls one more iteration would issue.
    pub calls_per_iteration: u32,
}

/// Decides refine vs stop. Checks run in priority order: consensus,
/// iteration cap, then the budget floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusEvaluator {
    pub threshold: f64,
}

impl ConsensusEvaluator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Estimated cost of one more full iteration.
    pub fn refine_cost_floor(inputs: &EvaluationInputs) -> f64 {
        inputs.recent_avg_call_cost * inputs.calls_per_iteration as f64
    }

    pub fn evaluate(&self, inputs: &EvaluationInputs) -> EvaluationDecision {
        if inputs.consensus_level >= self.threshold {
            return EvaluationDecision::Stop {
                reason: StopReason::ConsensusReached,
            };
        }
        if inputs.iteration >= inputs.max_iterations {
            return EvaluationDecision::Stop {
                reason: StopReason::MaxIterations,
            };
        }
        let remaining = inputs.budget_usd - inputs.spent_usd;
        if remaining <= Self::refine_cost_floor(inputs) {
            return EvaluationDecision::Stop {
                reason: StopReason::BudgetFloor,
            };
        }
        EvaluationDecision::Refine {
            next_iteration: inputs.iteration + 1,
        }
    }
}

/// How many provider calls a full iteration issues for `n` agents:
/// n analyses + n(n-1) critiques + 1 synthesis.
pub fn calls_per_iteration(agent_count: usize) -> u32 {
    let n = agent_count as u32;
    if n <= 1 {
        // Single-agent sessions skip the critique phase.
        n + 1
    } else {
        n + n * (n - 1) + 1
    }
}

/// Per-iteration snapshot derived from the critiques, attached to the
/// evaluation decision for observability. Never used for termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSnapshot {
    pub iteration: u32,
    /// Synthesizer-reported consensus (authoritative).
    pub consensus_level: f64,
    /// Mean critique score / 10 — the cross-check estimate.
    pub critique_consensus_estimate: f64,
    pub avg_critique_score: f64,
    /// Critiques scoring below 6.0.
    pub disagreement_count: usize,
    /// Most-cited weaknesses, capped at five.
    pub weak_areas: Vec<String>,
}

impl IterationSnapshot {
    pub fn compute(iteration: u32, critiques: &[Critique], synthesis: &Synthesis) -> Self {
        let avg_score = if critiques.is_empty() {
            0.0
        } else {
            critiques.iter().map(|c| c.score).sum::<f64>() / critiques.len() as f64
        };
        let estimate = if critiques.is_empty() {
            // No critiques to estimate from; fall back to the reported value.
            synthesis.consensus_level
        } else {
            avg_score / 10.0
        };
        let disagreement_count = critiques.iter().filter(|c| c.score < 6.0).count();

        let mut counts: Vec<(String, usize)> = Vec::new();
        for weakness in critiques.iter().flat_map(|c| c.weaknesses.iter()) {
            let key = weakness.to_lowercase();
            match counts.iter_mut().find(|(w, _)| *w == key) {
                Some((_, n)) => *n += 1,
                None => counts.push((key, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let weak_areas = counts.into_iter().take(5).map(|(w, _)| w).collect();

        Self {
            iteration,
            consensus_level: synthesis.consensus_level,
            critique_consensus_estimate: estimate,
            avg_critique_score: avg_score,
            disagreement_count,
            weak_areas,
        }
    }
}
