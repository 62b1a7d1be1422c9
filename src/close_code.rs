//! Close-code classification for the reconnection policy.
//!
//! The mapping is kept as an explicit table so the retry policy can be unit
//! tested without any transport in the loop.

/// Graceful closure initiated by either side.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (page navigation, server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// No close frame was received.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a closing handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server hit an internal error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Server is restarting.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Server asks the client to retry later.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Gateway received an invalid upstream response.
pub const CLOSE_BAD_GATEWAY: u16 = 1014;

/// Reserved application close-code range signalling a permanent rejection
/// (for example an authorization failure). Never retried.
pub const APP_REJECT_RANGE: std::ops::RangeInclusive<u16> = 4000..=4999;

/// Retry-relevant bucket for a close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Graceful shutdown; no retry.
    Normal,
    /// Permanent application rejection; no retry.
    Rejected,
    /// Backend redeploy signature; retry gated on the health check.
    Restart,
    /// Everything else; retry with bounded exponential backoff.
    Transient,
}

/// Classify a close code into its retry bucket.
///
/// 1006 (abnormal closure) stays in the plain transient bucket: it is the
/// signature of flaky networks at least as often as of restarting backends,
/// and must burn the bounded retry budget rather than loop on the health
/// check indefinitely.
pub fn classify_close(code: u16) -> CloseClass {
    match code {
        CLOSE_NORMAL | CLOSE_GOING_AWAY => CloseClass::Normal,
        CLOSE_INTERNAL_ERROR | CLOSE_SERVICE_RESTART | CLOSE_TRY_AGAIN_LATER
        | CLOSE_BAD_GATEWAY => CloseClass::Restart,
        code if APP_REJECT_RANGE.contains(&code) => CloseClass::Rejected,
        _ => CloseClass::Transient,
    }
}

/// Code and reason recorded from a transport closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Closure without a close frame, e.g. a torn TCP connection or a
    /// failed connection attempt.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Close frame arrived without a status code.
    pub fn no_status() -> Self {
        Self::new(CLOSE_NO_STATUS, "")
    }

    pub fn class(&self) -> CloseClass {
        classify_close(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_codes_are_normal() {
        assert_eq!(classify_close(CLOSE_NORMAL), CloseClass::Normal);
        assert_eq!(classify_close(CLOSE_GOING_AWAY), CloseClass::Normal);
    }

    #[test]
    fn restart_signatures_route_to_health_check() {
        for code in [
            CLOSE_INTERNAL_ERROR,
            CLOSE_SERVICE_RESTART,
            CLOSE_TRY_AGAIN_LATER,
            CLOSE_BAD_GATEWAY,
        ] {
            assert_eq!(classify_close(code), CloseClass::Restart, "code {code}");
        }
    }

    #[test]
    fn app_reject_range_is_rejected() {
        assert_eq!(classify_close(4000), CloseClass::Rejected);
        assert_eq!(classify_close(4401), CloseClass::Rejected);
        assert_eq!(classify_close(4999), CloseClass::Rejected);
    }

    #[test]
    fn abnormal_and_no_status_are_transient() {
        assert_eq!(classify_close(CLOSE_NO_STATUS), CloseClass::Transient);
        assert_eq!(classify_close(CLOSE_ABNORMAL), CloseClass::Transient);
        assert_eq!(classify_close(1002), CloseClass::Transient);
        assert_eq!(classify_close(3000), CloseClass::Transient);
    }
}
