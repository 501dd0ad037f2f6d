//! Budget tracking - spend caps over daily and monthly periods
//!
//! [`BudgetTracker`] owns the only cross-request mutable state in the
//! inference layer. Spend counters sit behind a single async mutex so the
//! check-then-increment sequences of concurrent pipelines never interleave.
//! Period rollover is lazy: it happens when `can_spend` or `record_usage`
//! observes a new day or month, never on a timer.
//!
//! Ledger writes are best-effort. They are spawned after the in-memory
//! counters are updated, and a failed write is only logged.

mod ledger;
mod pricing;

pub use ledger::{SqliteLedger, UsageLedger, UsageRecord};
#[cfg(test)]
pub use ledger::MockUsageLedger;
pub use pricing::{ModelPricing, PricingTable};

use crate::completion::{TaskType, TokenUsage};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default daily cap (USD)
pub const DEFAULT_DAILY_BUDGET_USD: f64 = 5.0;

/// Default monthly cap (USD)
pub const DEFAULT_MONTHLY_BUDGET_USD: f64 = 100.0;

/// Fraction of a cap that triggers a warning log
const WARN_RATIO: f64 = 0.8;

/// Spend caps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily cap in USD
    pub daily_usd: f64,
    /// Monthly cap in USD
    pub monthly_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_usd: DEFAULT_DAILY_BUDGET_USD,
            monthly_usd: DEFAULT_MONTHLY_BUDGET_USD,
        }
    }
}

impl BudgetConfig {
    /// Create caps, clamping negatives to zero
    #[must_use]
    pub fn new(daily_usd: f64, monthly_usd: f64) -> Self {
        Self {
            daily_usd: daily_usd.max(0.0),
            monthly_usd: monthly_usd.max(0.0),
        }
    }
}

/// Outcome of a spend check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendDecision {
    /// Whether the request may spend
    pub allowed: bool,
    /// Which period blocked the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SpendDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Spend snapshot for one period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodStatus {
    /// Spent so far (USD)
    pub spent: f64,
    /// Cap (USD)
    pub budget: f64,
    /// `budget - spent`
    pub remaining: f64,
    /// Rounded percentage of the cap used
    pub percent_used: f64,
}

impl PeriodStatus {
    fn new(spent: f64, budget: f64) -> Self {
        let percent_used = if budget > 0.0 {
            (spent / budget * 100.0).round()
        } else {
            100.0
        };
        Self {
            spent,
            budget,
            remaining: budget - spent,
            percent_used,
        }
    }
}

/// Spend snapshot for both periods
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Current day
    pub daily: PeriodStatus,
    /// Current month
    pub monthly: PeriodStatus,
}

/// Usage of one completed generation
#[derive(Debug, Clone)]
pub struct UsageInput {
    /// Backend that served the request
    pub provider: String,
    /// Model name
    pub model: String,
    /// Token counters
    pub usage: TokenUsage,
    /// Task tag
    pub task_type: TaskType,
    /// Duration
    pub duration_ms: u64,
    /// Owning organization
    pub organization_id: Option<String>,
}

#[derive(Debug)]
struct BudgetState {
    daily_spend: f64,
    monthly_spend: f64,
    last_daily_reset: String,
    last_monthly_reset: String,
    daily_warned: bool,
    monthly_warned: bool,
}

fn day_key(now: &DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn month_key(now: &DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

impl BudgetState {
    fn new(now: &DateTime<Utc>) -> Self {
        Self {
            daily_spend: 0.0,
            monthly_spend: 0.0,
            last_daily_reset: day_key(now),
            last_monthly_reset: month_key(now),
            daily_warned: false,
            monthly_warned: false,
        }
    }

    fn roll_periods(&mut self, now: &DateTime<Utc>) {
        let today = day_key(now);
        if self.last_daily_reset != today {
            debug!(from = %self.last_daily_reset, to = %today, "Resetting daily spend");
            self.daily_spend = 0.0;
            self.daily_warned = false;
            self.last_daily_reset = today;
        }

        let month = month_key(now);
        if self.last_monthly_reset != month {
            debug!(from = %self.last_monthly_reset, to = %month, "Resetting monthly spend");
            self.monthly_spend = 0.0;
            self.monthly_warned = false;
            self.last_monthly_reset = month;
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Daily/monthly spend tracker with an optional persisted ledger
pub struct BudgetTracker {
    config: BudgetConfig,
    pricing: PricingTable,
    state: Mutex<BudgetState>,
    ledger: Option<Arc<dyn UsageLedger>>,
    initialized: OnceCell<()>,
    pending_writes: TaskTracker,
    clock: Clock,
}

impl std::fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("config", &self.config)
            .field("has_ledger", &self.ledger.is_some())
            .field("initialized", &self.initialized.initialized())
            .finish()
    }
}

impl BudgetTracker {
    /// Create a tracker without persistence
    #[must_use]
    pub fn new(config: BudgetConfig) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let now = clock();
        Self {
            config,
            pricing: PricingTable::default(),
            state: Mutex::new(BudgetState::new(&now)),
            ledger: None,
            initialized: OnceCell::new(),
            pending_writes: TaskTracker::new(),
            clock,
        }
    }

    /// Attach a usage ledger
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replace the pricing table
    #[must_use]
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Replace the time source; period watermarks restart from its "now"
    #[must_use]
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        let now = (self.clock)();
        *self.state.get_mut() = BudgetState::new(&now);
        self
    }

    /// Spend caps
    #[must_use]
    pub fn config(&self) -> BudgetConfig {
        self.config
    }

    /// Load today's and this month's spend from the ledger, once.
    ///
    /// A missing ledger table counts as zero spend. Any other failure is
    /// logged and the tracker still reports itself initialized.
    pub async fn init(&self) {
        self.initialized
            .get_or_init(|| async {
                self.load_from_ledger().await;
            })
            .await;
    }

    /// Whether `init` has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    async fn load_from_ledger(&self) {
        let Some(ledger) = &self.ledger else {
            return;
        };

        let now = (self.clock)();
        let day_start = start_of_day(&now);
        let month_start = start_of_month(&now);

        let daily = ledger.spend_since(day_start).await;
        let monthly = ledger.spend_since(month_start).await;

        match (daily, monthly) {
            (Ok(daily), Ok(monthly)) => {
                let mut state = self.state.lock().await;
                *state = BudgetState::new(&now);
                state.daily_spend = daily;
                state.monthly_spend = monthly;
                info!(daily, monthly, "Budget tracker loaded prior spend");
            }
            (Err(Error::LedgerMissing), _) | (_, Err(Error::LedgerMissing)) => {
                debug!("Usage ledger table missing, starting from zero spend");
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to load prior spend, starting from zero");
            }
        }
    }

    /// Check whether another billed request may be issued.
    ///
    /// Spend equal to the cap blocks.
    pub async fn can_spend(&self) -> SpendDecision {
        let now = (self.clock)();
        let mut state = self.state.lock().await;
        state.roll_periods(&now);

        if state.daily_spend >= self.config.daily_usd {
            return SpendDecision::deny(format!(
                "Daily budget exceeded (${:.2} of ${:.2})",
                state.daily_spend, self.config.daily_usd
            ));
        }
        if state.monthly_spend >= self.config.monthly_usd {
            return SpendDecision::deny(format!(
                "Monthly budget exceeded (${:.2} of ${:.2})",
                state.monthly_spend, self.config.monthly_usd
            ));
        }
        SpendDecision::allow()
    }

    /// [`Self::can_spend`] as a `Result`
    pub async fn check(&self) -> Result<()> {
        let decision = self.can_spend().await;
        if decision.allowed {
            Ok(())
        } else {
            Err(Error::BudgetExceeded(
                decision.reason.unwrap_or_else(|| "budget exceeded".to_string()),
            ))
        }
    }

    /// Cost of a prospective request; touches no state
    #[must_use]
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing
            .lookup(model)
            .calculate_cost(&TokenUsage::new(input_tokens, output_tokens))
    }

    /// Add a completed generation's cost to both periods and persist it.
    ///
    /// Returns the computed cost.
    pub async fn record_usage(&self, input: UsageInput) -> f64 {
        let cost = self
            .pricing
            .lookup_for(&input.provider, &input.model)
            .calculate_cost(&input.usage);
        let now = (self.clock)();

        {
            let mut state = self.state.lock().await;
            state.roll_periods(&now);
            state.daily_spend += cost;
            state.monthly_spend += cost;
            self.warn_on_threshold(&mut state);
        }

        debug!(
            provider = %input.provider,
            model = %input.model,
            task = %input.task_type,
            cost,
            "Recorded usage"
        );

        if let Some(ledger) = &self.ledger {
            let ledger = Arc::clone(ledger);
            let record = UsageRecord {
                provider: input.provider,
                model: input.model,
                input_tokens: input.usage.input_tokens,
                output_tokens: input.usage.output_tokens,
                cache_read_tokens: input.usage.cache_read_tokens,
                cache_creation_tokens: input.usage.cache_creation_tokens,
                cost_usd: cost,
                task_type: input.task_type.as_str().to_string(),
                duration_ms: input.duration_ms,
                organization_id: input.organization_id,
                created_at: now,
            };
            self.pending_writes.spawn(async move {
                if let Err(e) = ledger.append(&record).await {
                    warn!(error = %e, model = %record.model, "Failed to persist usage record");
                }
            });
        }

        cost
    }

    fn warn_on_threshold(&self, state: &mut BudgetState) {
        if !state.daily_warned && state.daily_spend >= self.config.daily_usd * WARN_RATIO {
            state.daily_warned = true;
            warn!(
                spent = state.daily_spend,
                budget = self.config.daily_usd,
                "Daily AI budget above 80%"
            );
        }
        if !state.monthly_warned && state.monthly_spend >= self.config.monthly_usd * WARN_RATIO {
            state.monthly_warned = true;
            warn!(
                spent = state.monthly_spend,
                budget = self.config.monthly_usd,
                "Monthly AI budget above 80%"
            );
        }
    }

    /// Spend snapshot for both periods.
    ///
    /// A period whose watermark is stale reads as zero; the stored counters
    /// are left for the next spend check to reset.
    pub async fn status(&self) -> BudgetStatus {
        let now = (self.clock)();
        let state = self.state.lock().await;

        let daily = if state.last_daily_reset == day_key(&now) {
            state.daily_spend
        } else {
            0.0
        };
        let monthly = if state.last_monthly_reset == month_key(&now) {
            state.monthly_spend
        } else {
            0.0
        };

        BudgetStatus {
            daily: PeriodStatus::new(daily, self.config.daily_usd),
            monthly: PeriodStatus::new(monthly, self.config.monthly_usd),
        }
    }

    /// Most recent ledger rows; empty without a ledger or on failure
    pub async fn recent_usage(&self, limit: u32) -> Vec<UsageRecord> {
        let Some(ledger) = &self.ledger else {
            return Vec::new();
        };
        match ledger.recent(limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to read usage ledger");
                Vec::new()
            }
        }
    }

    /// Wait for spawned ledger writes to finish
    pub async fn flush(&self) {
        self.pending_writes.close();
        self.pending_writes.wait().await;
        self.pending_writes.reopen();
    }
}

fn start_of_day(now: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN))
}

fn start_of_month(now: &DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .map(|d| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
        .unwrap_or_else(|| start_of_day(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn usage(model: &str, input: u64, output: u64) -> UsageInput {
        UsageInput {
            provider: "hosted".to_string(),
            model: model.to_string(),
            usage: TokenUsage::new(input, output),
            task_type: TaskType::ClinicalSummary,
            duration_ms: 1200,
            organization_id: Some("org-1".to_string()),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_usage_sonnet_standard_rate() {
        let tracker = BudgetTracker::new(BudgetConfig::new(100.0, 1000.0));
        let cost = tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;

        assert!((cost - 3.00).abs() < 1e-9);
        let status = tracker.status().await;
        assert!((status.daily.spent - 3.00).abs() < 1e-9);
        assert!((status.monthly.spent - 3.00).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_can_spend_blocks_at_exact_budget() {
        let tracker = BudgetTracker::new(BudgetConfig::new(3.0, 1000.0));
        assert!(tracker.can_spend().await.allowed);

        tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;

        let decision = tracker.can_spend().await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Daily"));
        assert!(matches!(tracker.check().await, Err(Error::BudgetExceeded(_))));
    }

    #[tokio::test]
    async fn test_monthly_cap_named_in_reason() {
        let tracker = BudgetTracker::new(BudgetConfig::new(100.0, 3.0));
        tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;

        let decision = tracker.can_spend().await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Monthly"));
    }

    #[tokio::test]
    async fn test_estimate_cost_is_pure() {
        let tracker = BudgetTracker::new(BudgetConfig::default());
        let first = tracker.estimate_cost("haiku", 500_000, 100_000);
        let second = tracker.estimate_cost("haiku", 500_000, 100_000);

        assert_eq!(first, second);
        assert_eq!(tracker.status().await.daily.spent, 0.0);
        assert_eq!(tracker.status().await.monthly.spent, 0.0);
    }

    #[tokio::test]
    async fn test_lazy_daily_and_monthly_reset() {
        let now = Arc::new(StdMutex::new(at(2026, 3, 31, 10)));
        let clock = Arc::clone(&now);
        let tracker = BudgetTracker::new(BudgetConfig::new(3.0, 4.0))
            .with_clock(move || *clock.lock().unwrap());

        tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;
        assert!(!tracker.can_spend().await.allowed);

        // First day of the next month: both periods start over
        *now.lock().unwrap() = at(2026, 4, 1, 9);
        assert!(tracker.can_spend().await.allowed);
        let status = tracker.status().await;
        assert_eq!(status.daily.spent, 0.0);
        assert_eq!(status.monthly.spent, 0.0);
    }

    #[tokio::test]
    async fn test_daily_reset_keeps_monthly_spend() {
        let now = Arc::new(StdMutex::new(at(2026, 5, 10, 12)));
        let clock = Arc::clone(&now);
        let tracker = BudgetTracker::new(BudgetConfig::new(3.0, 100.0))
            .with_clock(move || *clock.lock().unwrap());

        tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;
        *now.lock().unwrap() = at(2026, 5, 11, 8);

        assert!(tracker.can_spend().await.allowed);
        let status = tracker.status().await;
        assert_eq!(status.daily.spent, 0.0);
        assert!((status.monthly.spent - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_percent_and_remaining() {
        let tracker = BudgetTracker::new(BudgetConfig::new(10.0, 100.0));
        tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;

        let status = tracker.status().await;
        assert_eq!(status.daily.percent_used, 30.0);
        assert!((status.daily.remaining - 7.0).abs() < 1e-9);
        assert_eq!(status.monthly.percent_used, 3.0);
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_lose_updates() {
        let tracker = Arc::new(BudgetTracker::new(BudgetConfig::new(1000.0, 1000.0)));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.record_usage(usage("sonnet", 100_000, 0)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let status = tracker.status().await;
        assert!((status.daily.spent - 15.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_ledger_failure_never_reverses_spend() {
        let mut ledger = MockUsageLedger::new();
        ledger
            .expect_append()
            .times(1)
            .returning(|_| Err(Error::Ledger("disk full".to_string())));

        let tracker =
            BudgetTracker::new(BudgetConfig::new(100.0, 100.0)).with_ledger(Arc::new(ledger));
        let cost = tracker.record_usage(usage("sonnet", 1_000_000, 0)).await;
        tracker.flush().await;

        assert!((cost - 3.0).abs() < 1e-9);
        assert!((tracker.status().await.daily.spent - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_init_loads_prior_spend_once() {
        let mut ledger = MockUsageLedger::new();
        let mut calls = 0;
        ledger.expect_spend_since().times(2).returning(move |_| {
            calls += 1;
            Ok(if calls == 1 { 1.5 } else { 12.0 })
        });

        let tracker =
            BudgetTracker::new(BudgetConfig::new(10.0, 100.0)).with_ledger(Arc::new(ledger));
        tracker.init().await;
        tracker.init().await;

        assert!(tracker.is_initialized());
        let status = tracker.status().await;
        assert!((status.daily.spent - 1.5).abs() < 1e-9);
        assert!((status.monthly.spent - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_init_tolerates_missing_table() {
        let mut ledger = MockUsageLedger::new();
        ledger
            .expect_spend_since()
            .returning(|_| Err(Error::LedgerMissing));

        let tracker =
            BudgetTracker::new(BudgetConfig::default()).with_ledger(Arc::new(ledger));
        tracker.init().await;

        assert!(tracker.is_initialized());
        assert_eq!(tracker.status().await.daily.spent, 0.0);
    }

    #[tokio::test]
    async fn test_init_other_failure_still_initializes() {
        let mut ledger = MockUsageLedger::new();
        ledger
            .expect_spend_since()
            .returning(|_| Err(Error::Ledger("locked".to_string())));

        let tracker =
            BudgetTracker::new(BudgetConfig::default()).with_ledger(Arc::new(ledger));
        tracker.init().await;
        assert!(tracker.is_initialized());
    }

    #[tokio::test]
    async fn test_records_reach_sqlite_ledger() {
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());
        let tracker = BudgetTracker::new(BudgetConfig::default())
            .with_ledger(Arc::clone(&ledger) as Arc<dyn UsageLedger>);

        tracker.record_usage(usage("haiku", 2_000, 500)).await;
        tracker.flush().await;

        let recent = tracker.recent_usage(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].model, "haiku");
        assert_eq!(recent[0].task_type, "clinical_summary");
    }
}
