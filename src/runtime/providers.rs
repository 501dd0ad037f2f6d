//! Backend resolution
//!
//! Builds the budget tracker, both backends, and the composition selected by
//! `[llm] mode`.

use super::config::AppConfig;
use anyhow::{Context, Result};
use clinscribe_core::ClinicalAgent;
use clinscribe_llm::{
    build_providers, BudgetTracker, HostedConfig, HostedProvider, LocalConfig, LocalProvider,
    Provider, ProviderSet, SqliteLedger,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a command needs
pub struct Runtime {
    pub providers: ProviderSet,
    pub budget: Arc<BudgetTracker>,
    pub hosted: Arc<HostedProvider>,
}

impl Runtime {
    pub fn agent(&self) -> ClinicalAgent {
        ClinicalAgent::from_providers(&self.providers)
    }

    /// Wait for pending ledger writes
    pub async fn shutdown(&self) {
        self.budget.flush().await;
    }
}

async fn build_budget(config: &AppConfig) -> Arc<BudgetTracker> {
    let tracker = BudgetTracker::new(config.budget.budget_config());
    let path = config.budget.resolved_ledger_path();

    let tracker = match SqliteLedger::from_path(&path).await {
        Ok(ledger) => tracker.with_ledger(Arc::new(ledger)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Usage ledger unavailable, spend is tracked in memory only");
            tracker
        }
    };

    let tracker = Arc::new(tracker);
    tracker.init().await;
    tracker
}

/// Resolve backends from configuration
pub async fn build_runtime(config: &AppConfig) -> Result<Runtime> {
    let budget = build_budget(config).await;
    let breaker = config.breaker.breaker_config();

    let local_config = LocalConfig::new()
        .with_base_url(&config.local.base_url)
        .with_model(&config.local.model)
        .with_timeout(Duration::from_secs(config.local.timeout_secs))
        .with_retry(config.local.retry_policy());
    let local = LocalProvider::with_breaker(local_config, breaker.clone())
        .context("Failed to create local provider")?
        .with_budget(Arc::clone(&budget));

    let mut hosted_config = HostedConfig::from_env();
    if let Some(model) = &config.hosted.model {
        hosted_config = hosted_config.with_model(model);
    }
    if let Some(max_tokens) = config.hosted.max_tokens {
        hosted_config = hosted_config.with_max_tokens(max_tokens);
    }
    let hosted = Arc::new(
        HostedProvider::with_breaker(hosted_config, breaker)
            .context("Failed to create hosted provider")?
            .with_budget(Arc::clone(&budget)),
    );

    let mode = config.llm.provider_mode();
    if mode.hosted_enabled() && !hosted.is_configured() {
        warn!(%mode, "Hosted backend enabled but ANTHROPIC_API_KEY is not set");
    }

    let providers = build_providers(
        mode,
        Arc::new(local),
        hosted.clone(),
        Some(Arc::clone(&budget)),
    );
    info!(%mode, provider = %providers.main.name(), "Providers initialized");

    Ok(Runtime {
        providers,
        budget,
        hosted,
    })
}
