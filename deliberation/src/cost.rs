//! Token pricing and per-call cost accounting.
//!
//! Session-level totals are always derived by summing RunMetrics; they
//! are never stored on the session row.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::records::RunMetric;

/// Per-1k-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Fallback pricing applied to models absent from the table.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input_per_1k: 0.001,
    output_per_1k: 0.002,
};

/// Static price table with a documented fallback for unknown models.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPricing>,
}

impl PriceTable {
    /// The builtin table covering the default agent models.
    pub fn builtin() -> Self {
        let mut prices = HashMap::new();
        let mut add = |model: &str, input: f64, output: f64| {
            prices.insert(
                model.to_string(),
                ModelPricing {
                    input_per_1k: input,
                    output_per_1k: output,
                },
            );
        };

        add("gpt-4o", 0.005, 0.015);
        add("gpt-4o-mini", 0.00015, 0.0006);
        add("gpt-4-turbo-preview", 0.01, 0.03);
        add("claude-3-opus-20240229", 0.015, 0.075);
        add("claude-3-sonnet-20240229", 0.003, 0.015);
        add("claude-3-haiku-20240307", 0.00025, 0.00125);
        add("gemini-1.5-pro", 0.00125, 0.005);
        add("gemini-pro", 0.00025, 0.0005);
        add("deepseek-chat", 0.00014, 0.00028);
        add("deepseek-reasoner", 0.00055, 0.00219);

        Self { prices }
    }

    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn insert(&mut self, model: &str, pricing: ModelPricing) {
        self.prices.insert(model.to_string(), pricing);
    }

    /// Pricing for `model`, falling back to [`DEFAULT_PRICING`] with a
    /// warning when the model is unknown.
    pub fn price(&self, model: &str) -> ModelPricing {
        match self.prices.get(model) {
            Some(p) => *p,
            None => {
                tracing::warn!(
                    target: "conclave.metrics",
                    model,
                    "unknown model, applying default pricing"
                );
                DEFAULT_PRICING
            }
        }
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.prices.contains_key(model)
    }

    /// Cost of one call in USD, rounded to 6 decimal places.
    pub fn cost_usd(&self, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        let pricing = self.price(model);
        let raw = (tokens_in as f64 / 1000.0) * pricing.input_per_1k
            + (tokens_out as f64 / 1000.0) * pricing.output_per_1k;
        round6(raw)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Session totals summed over RunMetrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Sum usage over a slice of metrics.
pub fn session_totals(metrics: &[RunMetric]) -> UsageTotals {
    let mut totals = UsageTotals::default();
    for m in metrics {
        totals.tokens_in += m.tokens_in;
        totals.tokens_out += m.tokens_out;
        totals.cost_usd += m.cost_usd;
    }
    totals.cost_usd = round6(totals.cost_usd);
    totals
}

/// Mean cost of a single call, 0.0 when no calls have been made.
pub fn avg_call_cost(metrics: &[RunMetric]) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    let total: f64 = metrics.iter().map(|m| m.cost_usd).sum();
    total / metrics.len() as f64
}
