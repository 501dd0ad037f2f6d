//! Fallback provider - primary/secondary failover
//!
//! The composite never invents a provider name of its own in results: the
//! [`GenerationResult`] it returns is the one produced by whichever backend
//! answered.

use crate::budget::BudgetTracker;
use crate::completion::{GenerateOptions, GenerationResult, StreamChunk};
use crate::error::Result;
use crate::provider::{Provider, ProviderStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Composite of a primary and an optional secondary provider
pub struct FallbackProvider {
    name: String,
    primary: Arc<dyn Provider>,
    secondary: Option<Arc<dyn Provider>>,
    budget: Option<Arc<BudgetTracker>>,
}

impl FallbackProvider {
    /// Wrap a single provider
    #[must_use]
    pub fn new(primary: Arc<dyn Provider>) -> Self {
        Self {
            name: primary.name().to_string(),
            primary,
            secondary: None,
            budget: None,
        }
    }

    /// Fail over to `secondary` when the primary rejects
    #[must_use]
    pub fn with_secondary(mut self, secondary: Arc<dyn Provider>) -> Self {
        self.name = format!("{}+{}", self.primary.name(), secondary.name());
        self.secondary = Some(secondary);
        self
    }

    /// Include a spend snapshot in [`Provider::status`]
    #[must_use]
    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Primary provider
    #[must_use]
    pub fn primary(&self) -> &Arc<dyn Provider> {
        &self.primary
    }

    /// Secondary provider, if any
    #[must_use]
    pub fn secondary(&self) -> Option<&Arc<dyn Provider>> {
        self.secondary.as_ref()
    }
}

#[async_trait::async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let primary_err = match self.primary.generate(prompt, system_prompt, options).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        warn!(
            primary = %self.primary.name(),
            secondary = %secondary.name(),
            error = %primary_err,
            "Primary provider failed, falling back"
        );

        match secondary.generate(prompt, system_prompt, options).await {
            Ok(result) => {
                info!(provider = %result.provider, "Fallback provider answered");
                Ok(result)
            }
            Err(secondary_err) => {
                warn!(error = %secondary_err, "Fallback provider also failed");
                Err(primary_err)
            }
        }
    }

    async fn generate_stream(
        &self,
        model: Option<&str>,
        prompt: &str,
        sink: mpsc::Sender<StreamChunk>,
    ) {
        let Some(secondary) = &self.secondary else {
            self.primary.generate_stream(model, prompt, sink).await;
            return;
        };

        // Buffer the primary so a failure before any text can switch over.
        // The receiver lives in the forwarder so the primary stops once
        // forwarding ends.
        let (tx, mut rx) = mpsc::channel(32);
        let downstream = &sink;
        let forward = async move {
            let mut forwarded_any = false;
            while let Some(chunk) = rx.recv().await {
                if let StreamChunk::Error(message) = &chunk {
                    if !forwarded_any {
                        return Some(message.clone());
                    }
                }
                forwarded_any = true;
                if downstream.send(chunk).await.is_err() {
                    return None;
                }
            }
            None
        };

        let ((), failure) = tokio::join!(self.primary.generate_stream(model, prompt, tx), forward);

        if let Some(message) = failure {
            warn!(
                primary = %self.primary.name(),
                error = %message,
                "Primary stream failed, falling back"
            );
            secondary.generate_stream(model, prompt, sink).await;
        }
    }

    async fn is_available(&self) -> bool {
        if self.primary.is_available().await {
            return true;
        }
        match &self.secondary {
            Some(secondary) => secondary.is_available().await,
            None => false,
        }
    }

    async fn status(&self) -> ProviderStatus {
        let mut components = vec![self.primary.status().await];
        if let Some(secondary) = &self.secondary {
            components.push(secondary.status().await);
        }

        let budget = match &self.budget {
            Some(budget) => Some(budget.status().await),
            None => None,
        };

        ProviderStatus {
            name: self.name.clone(),
            available: components.iter().any(|c| c.available),
            components,
            budget,
            ..Default::default()
        }
    }
}
