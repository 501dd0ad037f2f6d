//! Provider trait definition
//!
//! Every inference backend (and the composite fallback provider) implements
//! this trait.

use crate::breaker::CircuitState;
use crate::budget::BudgetStatus;
use crate::completion::{GenerateOptions, GenerationResult, StreamChunk};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Health and configuration snapshot of a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Provider name
    pub name: String,
    /// Whether the backend answered its health probe
    pub available: bool,
    /// Default model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Circuit breaker state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitState>,
    /// Human-readable detail (error text, endpoint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Constituent providers of a composite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ProviderStatus>,
    /// Spend snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetStatus>,
}

/// Trait for inference providers
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider name as reported in [`GenerationResult::provider`]
    fn name(&self) -> &str;

    /// Generate a completion
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<GenerationResult>;

    /// Stream a completion into `sink`.
    ///
    /// The sink receives zero or more [`StreamChunk::Text`] chunks followed by
    /// exactly one terminal chunk ([`StreamChunk::Done`] or
    /// [`StreamChunk::Error`]). Never returns an error itself.
    async fn generate_stream(
        &self,
        model: Option<&str>,
        prompt: &str,
        sink: mpsc::Sender<StreamChunk>,
    );

    /// Health probe; never fails
    async fn is_available(&self) -> bool;

    /// Status snapshot; never fails
    async fn status(&self) -> ProviderStatus;
}
