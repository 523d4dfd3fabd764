//! Configuration management
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables with the `SIPBRIDGE__` prefix (`SIPBRIDGE__SIP__LOCAL_PORT=5062`).
//! Every section has defaults, so an empty file is a valid config.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ::config::ConfigError;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Timer {0} must be greater than zero")]
    ZeroTimer(&'static str),

    #[error("Invalid {field} pattern: {source}")]
    BadPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid address {0}")]
    BadAddress(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sip: SipConfig,
    pub gsm: GsmConfig,
    pub lur: LurConfig,
    pub emergency: EmergencyConfig,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub local_ip: String,
    pub local_port: u16,
    /// Registrar, `host:port`
    pub proxy_registration: String,
    /// Proxy for INVITE/BYE traffic, `host:port`
    pub proxy_speech: String,
    /// SMS gateway, `host:port`
    pub proxy_sms: String,
    /// Minutes; REGISTER Expires is 60 times this
    pub registration_period_min: u32,
    pub timers: SipTimerConfig,
    pub dtmf: DtmfConfig,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            local_ip: "127.0.0.1".to_string(),
            local_port: 5062,
            proxy_registration: "127.0.0.1:5064".to_string(),
            proxy_speech: "127.0.0.1:5060".to_string(),
            proxy_sms: "127.0.0.1:5063".to_string(),
            registration_period_min: 90,
            timers: SipTimerConfig::default(),
            dtmf: DtmfConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipTimerConfig {
    pub a_ms: u64,
    pub b_ms: u64,
    pub e_ms: u64,
    pub f_ms: u64,
    pub h_ms: u64,
}

impl Default for SipTimerConfig {
    fn default() -> Self {
        Self {
            a_ms: 2000,
            b_ms: 10000,
            e_ms: 500,
            f_ms: 16000,
            h_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfConfig {
    /// Send keypresses as RFC 2833 telephone events
    pub rfc2833: bool,
    pub payload_type: u8,
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            rfc2833: false,
            payload_type: 101,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GsmConfig {
    pub mcc: String,
    pub mnc: String,
    pub lac: u16,
    pub ci: u16,
    /// Network short name for MM Information, none to skip it
    pub short_name: Option<String>,
    /// Run the ciphering ceremony during location update
    pub encryption: bool,
    /// L3 response wait used by the MM ceremonies
    pub message_timeout_ms: u64,
    pub timers: GsmTimerConfig,
}

impl Default for GsmConfig {
    fn default() -> Self {
        Self {
            mcc: "001".to_string(),
            mnc: "01".to_string(),
            lac: 1000,
            ci: 10,
            short_name: None,
            encryption: false,
            message_timeout_ms: 20000,
            timers: GsmTimerConfig::default(),
        }
    }
}

/// GSM 04.08 Table 11.4 call control timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GsmTimerConfig {
    pub t301_ms: u64,
    pub t302_ms: u64,
    pub t303_ms: u64,
    pub t304_ms: u64,
    pub t305_ms: u64,
    pub t308_ms: u64,
    pub t310_ms: u64,
    pub t313_ms: u64,
}

impl Default for GsmTimerConfig {
    fn default() -> Self {
        Self {
            t301_ms: 60000,
            t302_ms: 12000,
            t303_ms: 10000,
            t304_ms: 20000,
            t305_ms: 30000,
            t308_ms: 30000,
            t310_ms: 30000,
            t313_ms: 30000,
        }
    }
}

/// Location updating policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LurConfig {
    /// Admit identities matching this pattern when registration fails
    pub open_registration: Option<String>,
    /// Never admit identities matching this pattern through open registration
    pub open_registration_reject: Option<String>,
    pub open_registration_message: Option<String>,
    pub open_registration_short_code: String,
    pub normal_registration_message: Option<String>,
    pub normal_registration_short_code: String,
    pub failed_registration_message: Option<String>,
    pub failed_registration_short_code: String,
    /// Reject cause for unprovisioned identities
    pub unprovisioned_reject_cause: u8,
    /// Pause before releasing the channel after a registration timeout
    pub timeout_release_delay_ms: u64,
    pub query_imei: bool,
    pub query_classmark: bool,
    pub query_rrlp: bool,
    pub send_tmsis: bool,
}

impl Default for LurConfig {
    fn default() -> Self {
        Self {
            open_registration: None,
            open_registration_reject: None,
            open_registration_message: None,
            open_registration_short_code: "101".to_string(),
            normal_registration_message: None,
            normal_registration_short_code: "0000".to_string(),
            failed_registration_message: None,
            failed_registration_short_code: "0000".to_string(),
            unprovisioned_reject_cause: 0x04,
            timeout_release_delay_ms: 4000,
            query_imei: false,
            query_classmark: false,
            query_rrlp: false,
            send_tmsis: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    pub destination_user: String,
    pub destination_host: String,
    /// Address emergency calls as `urn:service:sos`
    pub rfc5031: bool,
    /// GML coordinates for an RFC 4119 PIDF-LO body
    pub geolocation: Option<String>,
    pub gateway_switch: String,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            destination_user: "911".to_string(),
            destination_host: "127.0.0.1".to_string(),
            rfc5031: false,
            geolocation: None,
            gateway_switch: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape listener, none to disable
    pub bind: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind: Some("127.0.0.1:9090".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional file, then `SIPBRIDGE__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix("SIPBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let sip = &self.sip.timers;
        for (name, value) in [
            ("SIP A", sip.a_ms),
            ("SIP B", sip.b_ms),
            ("SIP E", sip.e_ms),
            ("SIP F", sip.f_ms),
            ("SIP H", sip.h_ms),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::ZeroTimer(name));
            }
        }

        let gsm = &self.gsm.timers;
        for (name, value) in [
            ("T301", gsm.t301_ms),
            ("T302", gsm.t302_ms),
            ("T303", gsm.t303_ms),
            ("T304", gsm.t304_ms),
            ("T305", gsm.t305_ms),
            ("T308", gsm.t308_ms),
            ("T310", gsm.t310_ms),
            ("T313", gsm.t313_ms),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::ZeroTimer(name));
            }
        }

        if self.sip.local_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigValidationError::BadAddress(self.sip.local_ip.clone()));
        }

        self.lur.open_registration_patterns()?;
        Ok(())
    }
}

impl LurConfig {
    /// Compiled allow and deny patterns for open registration
    pub fn open_registration_patterns(
        &self,
    ) -> Result<(Option<Regex>, Option<Regex>), ConfigValidationError> {
        let compile = |field: &'static str, pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| ConfigValidationError::BadPattern { field, source })
        };
        Ok((
            compile("open_registration", &self.open_registration)?,
            compile("open_registration_reject", &self.open_registration_reject)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sip.timers.f_ms, 16000);
        assert_eq!(config.gsm.timers.t303_ms, 10000);
        assert_eq!(config.lur.unprovisioned_reject_cause, 0x04);
        assert_eq!(config.sip.dtmf.payload_type, 101);
    }

    #[test]
    fn test_zero_timer_rejected() {
        let mut config = Config::default();
        config.sip.timers.e_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::ZeroTimer("SIP E"))
        ));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut config = Config::default();
        config.lur.open_registration = Some("(unclosed".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::BadPattern {
                field: "open_registration",
                ..
            })
        ));
    }

    #[test]
    fn test_patterns_compile() {
        let lur = LurConfig {
            open_registration: Some("^00101".to_string()),
            ..LurConfig::default()
        };
        let (allow, deny) = lur.open_registration_patterns().unwrap();
        assert!(allow.unwrap().is_match("001010000000001"));
        assert!(deny.is_none());
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.sip.local_port, SipConfig::default().local_port);
    }
}
