//! Clinscribe LLM - inference backends and their resilience layer
//!
//! This crate provides:
//! - Provider: uniform generate/stream/health trait
//! - Local backend: Ollama-compatible server with retry on transient failure
//! - Hosted backend: Anthropic Messages API with prompt caching
//! - FallbackProvider: primary/secondary failover, selected by [`ProviderMode`]
//! - CircuitBreaker: per-provider request timeout and trip guard
//! - BudgetTracker: daily/monthly spend caps with a SQLite usage ledger
//! - PromptCache: cacheable system-instruction segments per task type

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anthropic;
pub mod breaker;
pub mod budget;
pub mod completion;
pub mod error;
pub mod fallback;
pub mod mock;
pub mod ollama;
pub mod prompt_cache;
pub mod provider;
pub mod retry;
pub mod selection;
pub mod util;

pub use anthropic::{HostedConfig, HostedProvider};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use budget::{
    BudgetConfig, BudgetStatus, BudgetTracker, ModelPricing, PeriodStatus, PricingTable,
    SpendDecision, SqliteLedger, UsageInput, UsageLedger, UsageRecord,
};
pub use completion::{
    GenerateOptions, GenerationRequest, GenerationResult, StreamChunk, TaskType, TokenUsage,
};
pub use error::{Error, Result};
pub use fallback::FallbackProvider;
pub use mock::{MockCall, MockProvider};
pub use ollama::{LocalConfig, LocalProvider};
pub use prompt_cache::{CacheStats, PromptCache, SystemBlock};
pub use provider::{Provider, ProviderStatus};
pub use retry::RetryPolicy;
pub use selection::{build_providers, ProviderMode, ProviderSet};
