//! SIP retransmission timers (RFC 3261 Section 17)
//!
//! Every retry loop in the engine is two-level: an absolute deadline
//! (Timer B or F, or H while waiting for an ACK) with a bounded wait per
//! attempt (Timer A or E) underneath it.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::SipTimerConfig;

/// SIP timers used by the call engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipTimers {
    /// Timer A: INVITE retransmit interval
    pub a: Duration,
    /// Timer B: INVITE transaction timeout
    pub b: Duration,
    /// Timer E: non-INVITE retransmit interval
    pub e: Duration,
    /// Timer F: non-INVITE transaction timeout
    pub f: Duration,
    /// Timer H: wait time for ACK receipt
    pub h: Duration,
}

impl Default for SipTimers {
    fn default() -> Self {
        Self {
            a: Duration::from_millis(2000),
            b: Duration::from_millis(10000),
            e: Duration::from_millis(500),
            f: Duration::from_millis(16000),
            h: Duration::from_millis(10000),
        }
    }
}

impl From<&SipTimerConfig> for SipTimers {
    fn from(cfg: &SipTimerConfig) -> Self {
        Self {
            a: Duration::from_millis(cfg.a_ms),
            b: Duration::from_millis(cfg.b_ms),
            e: Duration::from_millis(cfg.e_ms),
            f: Duration::from_millis(cfg.f_ms),
            h: Duration::from_millis(cfg.h_ms),
        }
    }
}

/// Absolute give-up point for a retry loop
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Per-attempt wait, clipped so an attempt never outlives the deadline
    pub fn attempt(&self, interval: Duration) -> Duration {
        interval.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timers() {
        let timers = SipTimers::default();
        assert_eq!(timers.a, Duration::from_millis(2000));
        assert_eq!(timers.f, Duration::from_millis(16000));
    }

    #[test]
    fn test_timers_from_config() {
        let cfg = SipTimerConfig {
            a_ms: 1,
            b_ms: 2,
            e_ms: 3,
            f_ms: 4,
            h_ms: 5,
        };
        let timers = SipTimers::from(&cfg);
        assert_eq!(timers.e, Duration::from_millis(3));
        assert_eq!(timers.h, Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(1000));
        assert!(!deadline.expired());
        assert_eq!(
            deadline.attempt(Duration::from_millis(500)),
            Duration::from_millis(500)
        );

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(
            deadline.attempt(Duration::from_millis(500)),
            Duration::from_millis(200)
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
