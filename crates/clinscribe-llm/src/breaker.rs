//! Circuit breaker guarding every backend call
//!
//! Consecutive failures past the threshold open the circuit; while open,
//! calls fail fast without network I/O. After the reset timeout one probe is
//! let through, and its outcome closes or reopens the circuit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default request timeout for a single backend call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting requests
    Open,
    /// Letting probe requests through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Breaker thresholds and timeouts
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successful probes needed to close it again
    pub success_threshold: u32,
    /// Time spent open before a probe is allowed
    pub reset_timeout: Duration,
    /// Per-call timeout
    pub request_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default thresholds with a 35 s request timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the probe success threshold
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the open duration
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            opened_at: None,
        }
    }
}

/// Trip guard for one backend
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker for the backend called `name`
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    /// Backend name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move an expired open circuit to half-open
    fn refresh(&self, state: &mut BreakerState) {
        let expired = state
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
        if state.circuit == CircuitState::Open && expired {
            info!(name = %self.name, "Circuit half-open, allowing a probe");
            state.circuit = CircuitState::HalfOpen;
            state.probe_successes = 0;
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.circuit
    }

    /// Failures since the last success
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Whether a request may be issued now
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Run `operation` under the breaker and the request timeout.
    ///
    /// Fails fast with [`Error::CircuitOpen`] when open; a timeout is
    /// reported as [`Error::Timeout`] and counted as a failure.
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = self.guarded(operation).await;
        if outcome.is_ok() {
            self.record_success();
        }
        outcome
    }

    /// Run the opening phase of a streamed request (connect and response
    /// headers) under the breaker and the request timeout.
    ///
    /// Failures are counted here. Success is recorded by the caller once the
    /// stream has been read to the end.
    pub async fn open<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guarded(operation).await
    }

    async fn guarded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.can_execute() {
            debug!(name = %self.name, "Circuit open, rejecting call");
            return Err(Error::CircuitOpen(self.name.clone()));
        }

        let limit = self.config.request_timeout;
        let outcome = tokio::time::timeout(limit, operation)
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(limit.as_millis() as u64)));

        match &outcome {
            // Client-side rejections say nothing about backend health
            Ok(_) | Err(Error::NotConfigured(_) | Error::BudgetExceeded(_)) => {}
            Err(_) => self.record_failure(),
        }
        outcome
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut state = self.lock();
        match state.circuit {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                state.probe_successes += 1;
                if state.probe_successes >= self.config.success_threshold {
                    info!(name = %self.name, "Circuit closed");
                    *state = BreakerState::closed();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let trip = match state.circuit {
            CircuitState::Closed => state.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                name = %self.name,
                failures = state.consecutive_failures,
                "Circuit opened"
            );
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(35));
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("local", CircuitBreakerConfig::new().with_failure_threshold(3));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new("local", CircuitBreakerConfig::new().with_failure_threshold(3));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::ZERO);
        let cb = CircuitBreaker::new("hosted", config);

        cb.record_failure();
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_fails_fast_when_open() {
        let cb = CircuitBreaker::new("hosted", CircuitBreakerConfig::new().with_failure_threshold(1));
        cb.record_failure();

        let mut invoked = false;
        let result = cb
            .call(async {
                invoked = true;
                Ok::<_, Error>(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen(name)) if name == "hosted"));
        assert!(!invoked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let config = CircuitBreakerConfig::new().with_request_timeout(Duration::from_millis(50));
        let cb = CircuitBreaker::new("local", config);

        let result = cb
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(1)
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(50))));
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out_and_leaves_success_to_caller() {
        let config = CircuitBreakerConfig::new().with_request_timeout(Duration::from_millis(50));
        let cb = CircuitBreaker::new("hosted", config);

        let stalled = cb
            .open(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await;
        assert!(matches!(stalled, Err(Error::Timeout(50))));
        assert_eq!(cb.failure_count(), 1);

        // Headers arrived, but the body has not been read yet
        let opened = cb.open(async { Ok::<_, Error>(7) }).await;
        assert_eq!(opened.unwrap(), 7);
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_not_configured_does_not_trip() {
        let cb = CircuitBreaker::new("hosted", CircuitBreakerConfig::new().with_failure_threshold(1));
        let result = cb
            .call(async { Err::<(), _>(Error::NotConfigured("no key".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
