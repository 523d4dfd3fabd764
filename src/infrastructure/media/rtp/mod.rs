//! RTP (Real-time Transport Protocol) Implementation
//!
//! This module implements RTP according to RFC 3550, with RFC 4733
//! telephone events for keypad signalling.

pub mod media_session;
pub mod packet;
pub mod session;

pub use media_session::{MediaSession, FRAME_SAMPLES, GSM_FRAME_LEN};
pub use packet::{dtmf_event_code, RtpError, RtpPacket, TelephoneEvent};
pub use session::{RtpSession, RtpTransport, UdpRtpTransport};
