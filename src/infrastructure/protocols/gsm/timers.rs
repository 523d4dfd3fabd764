//! GSM call control timers (GSM 04.08 Table 11.4, Q.931 Table 9-1)
//!
//! Independent of the SIP timer family; nothing here is shared with
//! [`SipTimers`](crate::infrastructure::protocols::sip::SipTimers).

use crate::config::GsmTimerConfig;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GsmTimer {
    /// recv ALERT -> recv CONN
    T301,
    /// send SETUP ACK -> any progress
    T302,
    /// send SETUP -> recv CALL CONF or REL COMP
    T303,
    /// recv SETUP ACK -> any progress
    T304,
    /// send DISC -> recv REL or DISC
    T305,
    /// send REL -> recv REL or REL COMP
    T308,
    /// recv CALL CONF -> recv ALERT, CONN or DISC
    T310,
    /// send CONNECT -> recv CONNECT ACK
    T313,
}

impl fmt::Display for GsmTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GsmTimer::T301 => "T301",
            GsmTimer::T302 => "T302",
            GsmTimer::T303 => "T303",
            GsmTimer::T304 => "T304",
            GsmTimer::T305 => "T305",
            GsmTimer::T308 => "T308",
            GsmTimer::T310 => "T310",
            GsmTimer::T313 => "T313",
        };
        f.write_str(name)
    }
}

/// Configured durations for the call control timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsmTimers {
    config: GsmTimerConfig,
}

impl GsmTimers {
    pub fn new(config: GsmTimerConfig) -> Self {
        Self { config }
    }

    pub fn duration(&self, timer: GsmTimer) -> Duration {
        let ms = match timer {
            GsmTimer::T301 => self.config.t301_ms,
            GsmTimer::T302 => self.config.t302_ms,
            GsmTimer::T303 => self.config.t303_ms,
            GsmTimer::T304 => self.config.t304_ms,
            GsmTimer::T305 => self.config.t305_ms,
            GsmTimer::T308 => self.config.t308_ms,
            GsmTimer::T310 => self.config.t310_ms,
            GsmTimer::T313 => self.config.t313_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for GsmTimers {
    fn default() -> Self {
        Self::new(GsmTimerConfig::default())
    }
}

impl From<&GsmTimerConfig> for GsmTimers {
    fn from(config: &GsmTimerConfig) -> Self {
        Self::new(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_durations() {
        let timers = GsmTimers::default();
        assert_eq!(timers.duration(GsmTimer::T301), Duration::from_secs(60));
        assert_eq!(timers.duration(GsmTimer::T302), Duration::from_secs(12));
        assert_eq!(timers.duration(GsmTimer::T303), Duration::from_secs(10));
        assert_eq!(timers.duration(GsmTimer::T304), Duration::from_secs(20));
        assert_eq!(timers.duration(GsmTimer::T313), Duration::from_secs(30));
    }

    #[test]
    fn test_configured_override() {
        let config = GsmTimerConfig {
            t303_ms: 400,
            ..GsmTimerConfig::default()
        };
        let timers = GsmTimers::from(&config);
        assert_eq!(timers.duration(GsmTimer::T303), Duration::from_millis(400));
        assert_eq!(GsmTimer::T303.to_string(), "T303");
    }
}
