//! Shared value objects used across the SIP and GSM sides

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SIP call identifier
///
/// Opaque and immutable once a session is created. It is the only key the
/// transport uses to route inbound messages to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Random numeric call id, the form used for locally originated dialogs
    pub fn generate() -> Self {
        let id: u32 = rand::thread_rng().gen();
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Type of a mobile identity (GSM 04.08 10.5.1.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityType {
    Imsi,
    Imei,
    Imeisv,
    Tmsi,
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityType::Imsi => write!(f, "IMSI"),
            IdentityType::Imei => write!(f, "IMEI"),
            IdentityType::Imeisv => write!(f, "IMEISV"),
            IdentityType::Tmsi => write!(f, "TMSI"),
        }
    }
}

/// Mobile identity as carried in MM messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MobileIdentity {
    Imsi(String),
    Imei(String),
    Imeisv(String),
    Tmsi(u32),
}

impl MobileIdentity {
    pub fn identity_type(&self) -> IdentityType {
        match self {
            MobileIdentity::Imsi(_) => IdentityType::Imsi,
            MobileIdentity::Imei(_) => IdentityType::Imei,
            MobileIdentity::Imeisv(_) => IdentityType::Imeisv,
            MobileIdentity::Tmsi(_) => IdentityType::Tmsi,
        }
    }

    /// Digit string form. TMSIs render as 8 hex digits.
    pub fn digits(&self) -> String {
        match self {
            MobileIdentity::Imsi(d) | MobileIdentity::Imei(d) | MobileIdentity::Imeisv(d) => {
                d.clone()
            }
            MobileIdentity::Tmsi(t) => format!("{:08x}", t),
        }
    }

    pub fn imsi(&self) -> Option<&str> {
        match self {
            MobileIdentity::Imsi(d) => Some(d),
            _ => None,
        }
    }

    /// SIP username for an identity: `IMSI` followed by the digits
    pub fn sip_username(&self) -> String {
        format!("IMSI{}", self.digits())
    }
}

impl fmt::Display for MobileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.identity_type(), self.digits())
    }
}

/// Location area identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationAreaId {
    pub mcc: String,
    pub mnc: String,
    pub lac: u16,
}

impl LocationAreaId {
    pub fn new(mcc: impl Into<String>, mnc: impl Into<String>, lac: u16) -> Self {
        Self {
            mcc: mcc.into(),
            mnc: mnc.into(),
            lac,
        }
    }
}

impl fmt::Display for LocationAreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.mcc, self.mnc, self.lac)
    }
}
