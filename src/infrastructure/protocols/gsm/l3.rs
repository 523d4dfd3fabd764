//! GSM 04.08 Layer 3 messages, as seen by the mobility controller
//!
//! Frames arrive already decoded; this module only models the messages the
//! MM and ciphering ceremonies exchange with a handset.

use crate::domain::shared::{IdentityType, LocationAreaId, MobileIdentity};
use std::fmt;

/// MM reject causes (GSM 04.08 10.5.3.6)
pub mod cause {
    pub const IMSI_UNKNOWN_IN_HLR: u8 = 0x02;
    pub const ILLEGAL_MS: u8 = 0x03;
    pub const IMSI_UNKNOWN_IN_VLR: u8 = 0x04;
    pub const LOCATION_AREA_NOT_ALLOWED: u8 = 0x0c;
    pub const NETWORK_FAILURE: u8 = 0x11;
    pub const SERVICE_OPTION_NOT_SUPPORTED: u8 = 0x20;
}

/// Mobile station classmark 2 (GSM 04.08 10.5.1.6), kept in its packed form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classmark {
    octets: [u8; 3],
}

impl Classmark {
    pub fn new(octets: [u8; 3]) -> Self {
        Self { octets }
    }

    pub fn octets(&self) -> [u8; 3] {
        self.octets
    }

    pub fn revision_level(&self) -> u8 {
        (self.octets[0] >> 5) & 0x03
    }

    /// RF power capability, 1-based class for GSM 900
    pub fn power_class(&self) -> u8 {
        (self.octets[0] & 0x07) + 1
    }

    pub fn supports_a5_1(&self) -> bool {
        // A5/1 bit is "not available" when set
        self.octets[0] & 0x08 == 0
    }

    pub fn supports_a5_3(&self) -> bool {
        self.octets[2] & 0x02 != 0
    }
}

impl fmt::Display for Classmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "revision={} power_class={} A5/1={} A5/3={}",
            self.revision_level(),
            self.power_class(),
            self.supports_a5_1(),
            self.supports_a5_3()
        )
    }
}

/// Decoded L3 messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L3Message {
    LocationUpdatingRequest {
        mobile_id: MobileIdentity,
        lai: LocationAreaId,
    },
    LocationUpdatingAccept {
        lai: LocationAreaId,
        tmsi: Option<u32>,
    },
    LocationUpdatingReject {
        cause: u8,
    },
    ImsiDetachIndication {
        mobile_id: MobileIdentity,
    },
    CmServiceRequest {
        service_type: u8,
        mobile_id: MobileIdentity,
    },
    CmServiceReject {
        cause: u8,
    },
    IdentityRequest(IdentityType),
    IdentityResponse(MobileIdentity),
    AuthenticationRequest {
        cksn: u8,
        rand: [u8; 16],
    },
    AuthenticationResponse {
        sres: u32,
    },
    /// Start ciphering with A5/`algorithm`
    CipheringModeCommand {
        algorithm: u8,
    },
    CipheringModeComplete,
    TmsiReallocationComplete,
    ClassmarkEnquiry,
    ClassmarkChange(Classmark),
    MmInformation {
        short_name: String,
    },
    ChannelRelease,
}

impl L3Message {
    pub fn name(&self) -> &'static str {
        match self {
            L3Message::LocationUpdatingRequest { .. } => "LOCATION UPDATING REQUEST",
            L3Message::LocationUpdatingAccept { .. } => "LOCATION UPDATING ACCEPT",
            L3Message::LocationUpdatingReject { .. } => "LOCATION UPDATING REJECT",
            L3Message::ImsiDetachIndication { .. } => "IMSI DETACH INDICATION",
            L3Message::CmServiceRequest { .. } => "CM SERVICE REQUEST",
            L3Message::CmServiceReject { .. } => "CM SERVICE REJECT",
            L3Message::IdentityRequest(_) => "IDENTITY REQUEST",
            L3Message::IdentityResponse(_) => "IDENTITY RESPONSE",
            L3Message::AuthenticationRequest { .. } => "AUTHENTICATION REQUEST",
            L3Message::AuthenticationResponse { .. } => "AUTHENTICATION RESPONSE",
            L3Message::CipheringModeCommand { .. } => "CIPHERING MODE COMMAND",
            L3Message::CipheringModeComplete => "CIPHERING MODE COMPLETE",
            L3Message::TmsiReallocationComplete => "TMSI REALLOCATION COMPLETE",
            L3Message::ClassmarkEnquiry => "CLASSMARK ENQUIRY",
            L3Message::ClassmarkChange(_) => "CLASSMARK CHANGE",
            L3Message::MmInformation { .. } => "MM INFORMATION",
            L3Message::ChannelRelease => "CHANNEL RELEASE",
        }
    }
}

impl fmt::Display for L3Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L3Message::LocationUpdatingRequest { mobile_id, lai } => {
                write!(f, "{} mobile_id=({}) LAI=({})", self.name(), mobile_id, lai)
            }
            L3Message::LocationUpdatingAccept { lai, tmsi } => match tmsi {
                Some(tmsi) => write!(f, "{} LAI=({}) TMSI=0x{:08x}", self.name(), lai, tmsi),
                None => write!(f, "{} LAI=({})", self.name(), lai),
            },
            L3Message::LocationUpdatingReject { cause } | L3Message::CmServiceReject { cause } => {
                write!(f, "{} cause=0x{:02x}", self.name(), cause)
            }
            L3Message::ImsiDetachIndication { mobile_id }
            | L3Message::IdentityResponse(mobile_id) => {
                write!(f, "{} mobile_id=({})", self.name(), mobile_id)
            }
            L3Message::CmServiceRequest {
                service_type,
                mobile_id,
            } => write!(
                f,
                "{} type={} mobile_id=({})",
                self.name(),
                service_type,
                mobile_id
            ),
            L3Message::IdentityRequest(kind) => write!(f, "{} type={}", self.name(), kind),
            L3Message::AuthenticationRequest { cksn, rand } => write!(
                f,
                "{} cksn={} RAND={}",
                self.name(),
                cksn,
                hex::encode(rand)
            ),
            L3Message::AuthenticationResponse { sres } => {
                write!(f, "{} SRES=0x{:08x}", self.name(), sres)
            }
            L3Message::CipheringModeCommand { algorithm } => {
                write!(f, "{} A5/{}", self.name(), algorithm)
            }
            L3Message::ClassmarkChange(classmark) => write!(f, "{} {}", self.name(), classmark),
            L3Message::MmInformation { short_name } => {
                write!(f, "{} short_name={}", self.name(), short_name)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Data-link primitives that can arrive in place of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Establish,
    Release,
    /// Forced release, sent after a graceful release the handset may ignore
    HardRelease,
    Error,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Establish => write!(f, "ESTABLISH"),
            Primitive::Release => write!(f, "RELEASE"),
            Primitive::HardRelease => write!(f, "HARDRELEASE"),
            Primitive::Error => write!(f, "ERROR"),
        }
    }
}

/// What a channel read yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L3Frame {
    Message(L3Message),
    Primitive(Primitive),
    /// A data frame the decoder could not turn into a message
    Unsupported(String),
}

impl From<L3Message> for L3Frame {
    fn from(message: L3Message) -> Self {
        L3Frame::Message(message)
    }
}
