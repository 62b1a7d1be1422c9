//! Health-check poller for suspected backend restarts.
//!
//! A restarting backend should not be hammered with connection attempts;
//! instead the driver parks here and probes liveness at a growing interval.

use std::time::Duration;

use crate::config::ChannelConfig;
use crate::transport::Connect;

/// Probe `health_url` until one probe succeeds, then return.
///
/// The interval starts at `health_poll_initial` and grows by
/// `health_poll_growth` per failed probe up to `health_poll_cap`.
/// Cancellation is by dropping the future: the caller races it against
/// channel teardown, so no probe or reconnect can fire afterwards.
pub async fn poll_until_healthy<C: Connect>(connector: &C, health_url: &str, config: &ChannelConfig) {
    let mut delay = config.health_poll_initial;

    loop {
        tokio::time::sleep(delay).await;
        if connector.health_check(health_url).await {
            tracing::debug!(health_url, "backend reports healthy");
            return;
        }
        tracing::debug!(health_url, ?delay, "health probe failed, growing interval");
        delay = grow_interval(delay, config);
    }
}

fn grow_interval(delay: Duration, config: &ChannelConfig) -> Duration {
    let grown = delay.as_millis() as f64 * config.health_poll_growth;
    let capped = grown.min(config.health_poll_cap.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::grow_interval;
    use crate::config::ChannelConfig;

    #[test]
    fn interval_grows_to_cap() {
        let config = ChannelConfig::default().with_health_poll(
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
        );
        let first = grow_interval(Duration::from_millis(100), &config);
        let second = grow_interval(first, &config);
        assert_eq!(first.as_millis(), 200);
        assert_eq!(second.as_millis(), 300);
        assert_eq!(grow_interval(second, &config).as_millis(), 300);
    }
}
