//! Media processing implementations

pub mod rtp;

pub use rtp::{MediaSession, RtpError, RtpTransport, TelephoneEvent, UdpRtpTransport};
