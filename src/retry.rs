//! Reconnection policy: decides, per closure, whether to retry, how long to
//! wait, and when to hand control to the health-check poller.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::close_code::{CloseClass, CloseInfo};
use crate::config::ChannelConfig;

/// Retry bookkeeping for one channel.
///
/// The cycle counter resets on every successful connect; the lifetime
/// counter is monotone and bounds the channel's total retry budget,
/// including reconnects triggered through the health-check path.
#[derive(Debug, Clone, Default)]
pub struct RetryAttempt {
    pub cycle: u32,
    pub lifetime: u32,
    pub last_close_at: Option<Instant>,
}

impl RetryAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every Connecting -> Connected transition.
    pub fn mark_connected(&mut self) {
        self.cycle = 0;
    }

    pub fn counts(&self) -> RetryCounts {
        RetryCounts {
            cycle: self.cycle,
            lifetime: self.lifetime,
        }
    }
}

/// Attempt counters surfaced to the fallback callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounts {
    pub cycle: u32,
    pub lifetime: u32,
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Graceful closure; the channel ends Disconnected without fallback.
    NormalClosure,
    /// Permanent application rejection carried in a reserved close code.
    Rejected { close_code: u16 },
    /// A retry budget was exhausted.
    BudgetExhausted,
}

/// Outcome of consulting the policy after a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryNow(Duration),
    RetryViaHealthCheck,
    GiveUp(GiveUpReason),
}

/// Backoff delay before jitter: `min(cap, base * growth^cycle)`.
pub fn base_backoff_delay(config: &ChannelConfig, cycle: u32) -> Duration {
    let exponent = cycle.min(30);
    let grown = config.backoff_base.as_millis() as f64 * config.backoff_growth.powi(exponent as i32);
    let capped = grown.min(config.backoff_cap.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

fn jitter(config: &ChannelConfig) -> Duration {
    let ceiling = config.jitter_max.as_millis() as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

/// Consult the policy for the just-closed transport.
///
/// Transient closures schedule a jittered exponential backoff and burn both
/// budgets. Restart-class closures reset the cycle counter and route to the
/// health-check poller, spending exactly one lifetime attempt for the
/// reconnect the poller will trigger; the lifetime budget still bounds them.
pub fn next_decision(
    config: &ChannelConfig,
    close: &CloseInfo,
    attempt: &mut RetryAttempt,
) -> RetryDecision {
    attempt.last_close_at = Some(Instant::now());

    match close.class() {
        CloseClass::Normal => RetryDecision::GiveUp(GiveUpReason::NormalClosure),
        CloseClass::Rejected => RetryDecision::GiveUp(GiveUpReason::Rejected {
            close_code: close.code,
        }),
        CloseClass::Restart => {
            if attempt.lifetime >= config.lifetime_retry_limit {
                return RetryDecision::GiveUp(GiveUpReason::BudgetExhausted);
            }
            attempt.cycle = 0;
            attempt.lifetime += 1;
            RetryDecision::RetryViaHealthCheck
        }
        CloseClass::Transient => {
            if attempt.cycle >= config.cycle_retry_limit
                || attempt.lifetime >= config.lifetime_retry_limit
            {
                return RetryDecision::GiveUp(GiveUpReason::BudgetExhausted);
            }
            let delay = base_backoff_delay(config, attempt.cycle) + jitter(config);
            attempt.cycle += 1;
            attempt.lifetime += 1;
            RetryDecision::RetryNow(delay)
        }
    }
}
