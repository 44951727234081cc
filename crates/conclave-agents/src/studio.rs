//! Studio surface: prompt A/B experiments and aggregated run metrics.
//!
//! Experiments never participate in normal session flow; they exist to
//! compare candidate prompt contents offline and pick winners.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use deliberation::{AgentId, CallStatus, PromptType, RunMetric};

/// Lifecycle of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Completed,
    Stopped,
}

/// An A/B experiment over candidate prompt contents for one
/// `(agent, prompt_type)` slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub agent: AgentId,
    pub prompt_type: PromptType,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
}

/// One candidate prompt content inside an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub experiment_id: String,
    pub label: String,
    pub content: String,
}

/// One execution of a variant over a test input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRun {
    pub id: String,
    pub variant_id: String,
    pub test_input: String,
    pub quality_score: f64,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// Winner report for a completed experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerReport {
    pub experiment_id: String,
    pub winner_variant_id: Option<String>,
    pub mean_quality: HashMap<String, f64>,
}

#[derive(Default)]
struct StudioInner {
    experiments: HashMap<String, Experiment>,
    variants: HashMap<String, Variant>,
    runs: Vec<VariantRun>,
}

/// In-process experiment registry.
#[derive(Default)]
pub struct ExperimentStore {
    inner: RwLock<StudioInner>,
}

impl ExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_experiment(
        &self,
        name: &str,
        description: &str,
        agent: AgentId,
        prompt_type: PromptType,
    ) -> Experiment {
        let experiment = Experiment {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            agent,
            prompt_type,
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .expect("studio lock poisoned")
            .experiments
            .insert(experiment.id.clone(), experiment.clone());
        experiment
    }

    pub fn get_experiment(&self, id: &str) -> Option<Experiment> {
        self.inner
            .read()
            .expect("studio lock poisoned")
            .experiments
            .get(id)
            .cloned()
    }

    pub fn list_experiments(&self) -> Vec<Experiment> {
        let inner = self.inner.read().expect("studio lock poisoned");
        let mut experiments: Vec<Experiment> = inner.experiments.values().cloned().collect();
        experiments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        experiments
    }

    pub fn set_status(&self, id: &str, status: ExperimentStatus) -> Result<Experiment, String> {
        let mut inner = self.inner.write().expect("studio lock poisoned");
        let experiment = inner
            .experiments
            .get_mut(id)
            .ok_or_else(|| format!("experiment {} not found", id))?;
        experiment.status = status;
        Ok(experiment.clone())
    }

    pub fn delete_experiment(&self, id: &str) -> Result<(), String> {
        let mut inner = self.inner.write().expect("studio lock poisoned");
        inner
            .experiments
            .remove(id)
            .ok_or_else(|| format!("experiment {} not found", id))?;
        let orphaned: Vec<String> = inner
            .variants
            .values()
            .filter(|v| v.experiment_id == id)
            .map(|v| v.id.clone())
            .collect();
        for variant_id in &orphaned {
            inner.variants.remove(variant_id);
        }
        inner.runs.retain(|r| !orphaned.contains(&r.variant_id));
        Ok(())
    }

    pub fn add_variant(
        &self,
        experiment_id: &str,
        label: &str,
        content: &str,
    ) -> Result<Variant, String> {
        let mut inner = self.inner.write().expect("studio lock poisoned");
        if !inner.experiments.contains_key(experiment_id) {
            return Err(format!("experiment {} not found", experiment_id));
        }
        let variant = Variant {
            id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.to_string(),
            label: label.to_string(),
            content: content.to_string(),
        };
        inner.variants.insert(variant.id.clone(), variant.clone());
        Ok(variant)
    }

    pub fn record_run(
        &self,
        variant_id: &str,
        test_input: &str,
        quality_score: f64,
        latency_ms: u64,
        cost_usd: f64,
    ) -> Result<VariantRun, String> {
        let mut inner = self.inner.write().expect("studio lock poisoned");
        if !inner.variants.contains_key(variant_id) {
            return Err(format!("variant {} not found", variant_id));
        }
        let run = VariantRun {
            id: Uuid::new_v4().to_string(),
            variant_id: variant_id.to_string(),
            test_input: test_input.to_string(),
            quality_score,
            latency_ms,
            cost_usd,
            created_at: Utc::now(),
        };
        inner.runs.push(run.clone());
        Ok(run)
    }

    pub fn variants_of(&self, experiment_id: &str) -> Vec<Variant> {
        let inner = self.inner.read().expect("studio lock poisoned");
        let mut variants: Vec<Variant> = inner
            .variants
            .values()
            .filter(|v| v.experiment_id == experiment_id)
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.label.cmp(&b.label));
        variants
    }

    /// Winner = variant with the highest mean quality over its runs.
    pub fn winner(&self, experiment_id: &str) -> WinnerReport {
        let inner = self.inner.read().expect("studio lock poisoned");
        let mut mean_quality = HashMap::new();
        for variant in inner
            .variants
            .values()
            .filter(|v| v.experiment_id == experiment_id)
        {
            let scores: Vec<f64> = inner
                .runs
                .iter()
                .filter(|r| r.variant_id == variant.id)
                .map(|r| r.quality_score)
                .collect();
            if !scores.is_empty() {
                mean_quality.insert(
                    variant.id.clone(),
                    scores.iter().sum::<f64>() / scores.len() as f64,
                );
            }
        }
        let winner_variant_id = mean_quality
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.clone());
        WinnerReport {
            experiment_id: experiment_id.to_string(),
            winner_variant_id,
            mean_quality,
        }
    }
}

/// Aggregation window for `/studio/metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl MetricsPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Self::Hour),
            "24h" => Some(Self::Day),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hour => now - ChronoDuration::hours(1),
            Self::Day => now - ChronoDuration::hours(24),
            Self::Week => now - ChronoDuration::days(7),
            Self::Month => now - ChronoDuration::days(30),
        }
    }
}

/// Aggregated RunMetrics over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub period: String,
    pub total_calls: usize,
    pub success_calls: usize,
    pub error_calls: usize,
    pub timeout_calls: usize,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub cost_by_agent: HashMap<String, f64>,
    pub cost_by_model: HashMap<String, f64>,
}

/// Aggregate metrics created after `period`'s cutoff.
pub fn aggregate_metrics(metrics: &[RunMetric], period: MetricsPeriod) -> MetricsSummary {
    let cutoff = period.cutoff(Utc::now());
    let window: Vec<&RunMetric> = metrics.iter().filter(|m| m.created_at >= cutoff).collect();

    let mut summary = MetricsSummary {
        period: period.as_str().to_string(),
        total_calls: window.len(),
        success_calls: 0,
        error_calls: 0,
        timeout_calls: 0,
        total_tokens_in: 0,
        total_tokens_out: 0,
        total_cost_usd: 0.0,
        avg_latency_ms: 0.0,
        cost_by_agent: HashMap::new(),
        cost_by_model: HashMap::new(),
    };

    let mut latency_total: u64 = 0;
    for metric in &window {
        match metric.status {
            CallStatus::Success => summary.success_calls += 1,
            CallStatus::Error => summary.error_calls += 1,
            CallStatus::Timeout => summary.timeout_calls += 1,
        }
        summary.total_tokens_in += metric.tokens_in;
        summary.total_tokens_out += metric.tokens_out;
        summary.total_cost_usd += metric.cost_usd;
        latency_total += metric.latency_ms;
        *summary
            .cost_by_agent
            .entry(metric.agent.as_str().to_string())
            .or_insert(0.0) += metric.cost_usd;
        *summary
            .cost_by_model
            .entry(metric.model.clone())
            .or_insert(0.0) += metric.cost_usd;
    }
    if !window.is_empty() {
        summary.avg_latency_ms = latency_total as f64 / window.len() as f64;
    }
    summary
}
