use std::time::Duration;

use crate::url::DEFAULT_ORIGIN;

/// Tuning knobs for a channel's lifecycle, reconnection, and delivery.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Origin (scheme + authority) the address resolver builds URLs from.
    pub origin: String,
    /// Base delay before the first reconnect of a cycle.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_growth: f64,
    /// Ceiling of the uniform random jitter added to each backoff delay.
    pub jitter_max: Duration,
    /// Retries allowed per cycle; resets on every successful connect.
    pub cycle_retry_limit: u32,
    /// Retries allowed over the channel's whole life; never resets.
    pub lifetime_retry_limit: u32,
    /// Window that collapses open/close bursts into one connection attempt.
    pub connect_debounce: Duration,
    /// Cadence of inbound batch delivery. Kept below a UI frame budget.
    pub batch_interval: Duration,
    /// Continuous connected time required before a channel counts as stable.
    pub stability_dwell: Duration,
    /// Delay before the first health probe after a suspected restart.
    pub health_poll_initial: Duration,
    /// Ceiling for the growing health-probe interval.
    pub health_poll_cap: Duration,
    /// Multiplier applied to the probe interval per failed probe.
    pub health_poll_growth: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_secs(30),
            backoff_growth: 2.0,
            jitter_max: Duration::from_millis(250),
            cycle_retry_limit: 10,
            lifetime_retry_limit: 60,
            connect_debounce: Duration::from_millis(30),
            batch_interval: Duration::from_millis(10),
            stability_dwell: Duration::from_secs(2),
            health_poll_initial: Duration::from_millis(1000),
            health_poll_cap: Duration::from_secs(10),
            health_poll_growth: 1.5,
        }
    }
}

impl ChannelConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration, growth: f64) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self.backoff_growth = growth;
        self
    }

    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    pub fn with_retry_limits(mut self, cycle: u32, lifetime: u32) -> Self {
        self.cycle_retry_limit = cycle;
        self.lifetime_retry_limit = lifetime;
        self
    }

    pub fn with_connect_debounce(mut self, debounce: Duration) -> Self {
        self.connect_debounce = debounce;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_stability_dwell(mut self, dwell: Duration) -> Self {
        self.stability_dwell = dwell;
        self
    }

    pub fn with_health_poll(mut self, initial: Duration, cap: Duration, growth: f64) -> Self {
        self.health_poll_initial = initial;
        self.health_poll_cap = cap;
        self.health_poll_growth = growth;
        self
    }
}
