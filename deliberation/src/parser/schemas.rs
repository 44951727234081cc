//! One schema per phase output, centralized so the parser, the runner,
//! and the prompt templates all agree on field names.

use serde::{Deserialize, Serialize};

use crate::session::records::Conclusion;

/// Analyze-phase payload. `confidence` is optional on the wire; the
/// runner imputes 0.5 when a model omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub analysis: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl AnalysisPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.analysis.trim().is_empty() {
            return Err("analysis text is empty".to_string());
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(format!("confidence must be in [0, 1], got {}", c));
            }
        }
        Ok(())
    }
}

/// Critique-phase payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiquePayload {
    pub critique: String,
    pub score: f64,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

impl CritiquePayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.critique.trim().is_empty() {
            return Err("critique text is empty".to_string());
        }
        if !(0.0..=10.0).contains(&self.score) {
            return Err(format!("score must be in [0, 10], got {}", self.score));
        }
        Ok(())
    }
}

/// Synthesize-phase payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisPayload {
    pub summary: String,
    #[serde(default)]
    pub conclusions: Vec<Conclusion>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub formalized_result: Option<String>,
    pub consensus_level: f64,
}

impl SynthesisPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
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

/// Tagged union of every phase output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PhaseOutput {
    Analysis(AnalysisPayload),
    Critique(CritiquePayload),
    Synthesis(SynthesisPayload),
}

impl PhaseOutput {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Analysis(p) => p.validate(),
            Self::Critique(p) => p.validate(),
            Self::Synthesis(p) => p.validate(),
        }
    }
}
