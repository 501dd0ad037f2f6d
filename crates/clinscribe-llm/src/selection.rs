//! Provider selection - startup switch between local and hosted backends

use crate::budget::BudgetTracker;
use crate::fallback::FallbackProvider;
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// How the local and hosted backends are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// Local backend only
    #[default]
    Disabled,
    /// Local first, hosted on failure
    Fallback,
    /// Hosted first, local on failure
    Preferred,
    /// Hosted backend only
    ClaudeOnly,
}

impl ProviderMode {
    /// Parse a configuration value; anything unrecognised means `Disabled`
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "disabled" | "" => Self::Disabled,
            "fallback" => Self::Fallback,
            "preferred" => Self::Preferred,
            "claude_only" => Self::ClaudeOnly,
            other => {
                warn!(value = %other, "Unknown provider mode, using local backend only");
                Self::Disabled
            }
        }
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Fallback => "fallback",
            Self::Preferred => "preferred",
            Self::ClaudeOnly => "claude_only",
        }
    }

    /// Whether the hosted backend takes part in this mode
    #[must_use]
    pub fn hosted_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Providers resolved for one process
#[derive(Clone)]
pub struct ProviderSet {
    /// Selected mode
    pub mode: ProviderMode,
    /// Composite used for every generation step
    pub main: Arc<FallbackProvider>,
    /// Hosted backend, present when the mode enables it
    pub hosted: Option<Arc<dyn Provider>>,
}

impl ProviderSet {
    /// Backend for cross-model synthesis, present when the mode enables it
    #[must_use]
    pub fn synthesis_provider(&self) -> Option<Arc<dyn Provider>> {
        self.hosted.clone()
    }
}

/// Compose the local and hosted backends for `mode`
pub fn build_providers(
    mode: ProviderMode,
    local: Arc<dyn Provider>,
    hosted: Arc<dyn Provider>,
    budget: Option<Arc<BudgetTracker>>,
) -> ProviderSet {
    let main = match mode {
        ProviderMode::Disabled => FallbackProvider::new(local),
        ProviderMode::Fallback => FallbackProvider::new(local).with_secondary(Arc::clone(&hosted)),
        ProviderMode::Preferred => FallbackProvider::new(Arc::clone(&hosted)).with_secondary(local),
        ProviderMode::ClaudeOnly => FallbackProvider::new(Arc::clone(&hosted)),
    };
    let main = match budget {
        Some(budget) => main.with_budget(budget),
        None => main,
    };

    info!(mode = %mode, provider = %main.name(), "Provider selection resolved");

    ProviderSet {
        mode,
        main: Arc::new(main),
        hosted: mode.hosted_enabled().then_some(hosted),
    }
}
