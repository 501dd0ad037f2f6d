//! Application configuration types

use clinscribe_core::AgentOptions;
use clinscribe_llm::{BudgetConfig, CircuitBreakerConfig, ProviderMode, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub local: LocalSection,
    #[serde(default)]
    pub hosted: HostedSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// Backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// disabled | fallback | preferred | claude_only
    #[serde(default)]
    pub mode: String,
}

impl LlmConfig {
    pub fn provider_mode(&self) -> ProviderMode {
        ProviderMode::parse(&self.mode)
    }
}

/// Local inference server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSection {
    #[serde(default = "default_local_url")]
    pub base_url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_local_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            base_url: default_local_url(),
            model: default_local_model(),
            timeout_secs: default_local_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl LocalSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_delay_ms))
    }
}

fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama3.2".to_string()
}
fn default_local_timeout() -> u64 {
    120
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    500
}

/// Hosted backend; the API key comes from the environment only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostedSection {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Circuit breaker applied to both backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

impl BreakerSection {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_failure_threshold(self.failure_threshold)
            .with_reset_timeout(Duration::from_secs(self.reset_timeout_secs))
    }
}

fn default_request_timeout() -> u64 {
    35
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout() -> u64 {
    30
}

/// Spend caps and ledger location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_daily_usd")]
    pub daily_usd: f64,
    #[serde(default = "default_monthly_usd")]
    pub monthly_usd: f64,
    /// Ledger database file; platform data directory when unset
    #[serde(default)]
    pub ledger_path: Option<String>,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            daily_usd: default_daily_usd(),
            monthly_usd: default_monthly_usd(),
            ledger_path: None,
        }
    }
}

impl BudgetSection {
    pub fn budget_config(&self) -> BudgetConfig {
        BudgetConfig::new(self.daily_usd, self.monthly_usd)
    }

    pub fn resolved_ledger_path(&self) -> PathBuf {
        match &self.ledger_path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("data"))
                .join("clinscribe")
                .join("ai_usage.db"),
        }
    }
}

fn default_daily_usd() -> f64 {
    clinscribe_llm::budget::DEFAULT_DAILY_BUDGET_USD
}
fn default_monthly_usd() -> f64 {
    clinscribe_llm::budget::DEFAULT_MONTHLY_BUDGET_USD
}

/// Pipeline defaults applied when a request leaves them unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub include_differential: bool,
    #[serde(default)]
    pub include_letter_draft: bool,
    /// Overall deadline; 0 disables it
    #[serde(default)]
    pub deadline_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            language: default_language(),
            include_differential: true,
            include_letter_draft: false,
            deadline_secs: 0,
        }
    }
}

impl PipelineSection {
    /// Fill the unset fields of `options` from this section
    pub fn apply_defaults(&self, options: AgentOptions) -> AgentOptions {
        AgentOptions {
            language: options.language.or_else(|| Some(self.language.clone())),
            include_differential: options
                .include_differential
                .or(Some(self.include_differential)),
            include_letter_draft: options
                .include_letter_draft
                .or(Some(self.include_letter_draft)),
            deadline_secs: options
                .deadline_secs
                .or(Some(self.deadline_secs).filter(|s| *s > 0)),
        }
    }
}

fn default_language() -> String {
    "no".to_string()
}
fn default_true() -> bool {
    true
}
