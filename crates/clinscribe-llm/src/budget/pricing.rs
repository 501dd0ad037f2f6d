//! Per-model pricing with prompt-cache tiers

use crate::completion::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Provider name reported by the local backend
const LOCAL_PROVIDER: &str = "local";

/// Pricing for a model, USD per 1M tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Model name or family key
    pub model: String,
    /// Standard (uncached) input tokens
    pub input_cost_per_million: f64,
    /// Input tokens read from the prompt cache
    pub cache_read_cost_per_million: f64,
    /// Input tokens written to the prompt cache
    pub cache_creation_cost_per_million: f64,
    /// Output tokens
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    /// Build a row with the usual cache ratios (read 0.1x, write 1.25x)
    #[must_use]
    pub fn with_standard_cache(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.to_string(),
            input_cost_per_million: input,
            cache_read_cost_per_million: input * 0.1,
            cache_creation_cost_per_million: input * 1.25,
            output_cost_per_million: output,
        }
    }

    /// Zero-cost row for local models
    #[must_use]
    pub fn free(model: &str) -> Self {
        Self::with_standard_cache(model, 0.0, 0.0)
    }

    /// Cost of one generation
    #[must_use]
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let per = |tokens: u64, rate: f64| (tokens as f64 / TOKENS_PER_MILLION) * rate;

        per(usage.uncached_input_tokens(), self.input_cost_per_million)
            + per(usage.cache_read_tokens, self.cache_read_cost_per_million)
            + per(usage.cache_creation_tokens, self.cache_creation_cost_per_million)
            + per(usage.output_tokens, self.output_cost_per_million)
    }
}

/// Family keys matched by substring, most specific first
const MODEL_FAMILIES: &[&str] = &[
    "haiku", "sonnet", "opus", "llama", "mistral", "qwen", "gemma", "phi",
];

/// Pricing lookup: exact name, then model family, then the default row
#[derive(Debug, Clone)]
pub struct PricingTable {
    rows: HashMap<String, ModelPricing>,
    default: ModelPricing,
    local_default: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut rows = HashMap::new();
        let mut add = |row: ModelPricing| {
            rows.insert(row.model.clone(), row);
        };

        // Hosted tiers
        add(ModelPricing::with_standard_cache("haiku", 1.00, 5.00));
        add(ModelPricing::with_standard_cache("sonnet", 3.00, 15.00));
        add(ModelPricing::with_standard_cache("opus", 5.00, 25.00));

        // Local backends do not bill
        for family in ["llama", "mistral", "qwen", "gemma", "phi"] {
            add(ModelPricing::free(family));
        }

        Self {
            rows,
            default: ModelPricing::with_standard_cache("opus", 5.00, 25.00),
            local_default: ModelPricing::free("local"),
        }
    }
}

impl PricingTable {
    /// Add or replace a row
    pub fn insert(&mut self, pricing: ModelPricing) {
        self.rows.insert(pricing.model.clone(), pricing);
    }

    /// Row used for unrecognised models
    #[must_use]
    pub fn default_row(&self) -> &ModelPricing {
        &self.default
    }

    /// Find pricing for a model name or alias
    #[must_use]
    pub fn lookup(&self, model: &str) -> &ModelPricing {
        self.find(model).unwrap_or(&self.default)
    }

    /// Pricing for a model served by `provider`.
    ///
    /// Unrecognised models on the local backend are free rather than billed
    /// at the default hosted tier.
    #[must_use]
    pub fn lookup_for(&self, provider: &str, model: &str) -> &ModelPricing {
        match self.find(model) {
            Some(row) => row,
            None if provider == LOCAL_PROVIDER => &self.local_default,
            None => &self.default,
        }
    }

    fn find(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(row) = self.rows.get(model) {
            return Some(row);
        }

        let lower = model.to_lowercase();
        MODEL_FAMILIES
            .iter()
            .find(|family| lower.contains(*family))
            .and_then(|family| self.rows.get(*family))
    }
}
