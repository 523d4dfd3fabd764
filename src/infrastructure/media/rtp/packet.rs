//! RTP Packet Implementation (RFC 3550) and telephone events (RFC 4733)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// RTP Packet Structure
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
///
/// We never send CSRCs, extensions or padding. Inbound packets that carry
/// them are accepted and the extra fields skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Minimum RTP header size (without CSRC, extension, or padding)
    pub const MIN_HEADER_SIZE: usize = 12;

    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: Bytes) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, RtpError> {
        if data.len() < Self::MIN_HEADER_SIZE {
            return Err(RtpError::PacketTooShort);
        }

        let mut buf = data;

        // Byte 0: V(2), P(1), X(1), CC(4)
        let byte0 = buf.get_u8();
        let version = (byte0 >> 6) & 0x03;
        let padding = (byte0 & 0x20) != 0;
        let extension = (byte0 & 0x10) != 0;
        let csrc_len = (byte0 & 0x0F) as usize * 4;

        if version != 2 {
            return Err(RtpError::InvalidVersion(version));
        }

        // Byte 1: M(1), PT(7)
        let byte1 = buf.get_u8();
        let marker = (byte1 & 0x80) != 0;
        let payload_type = byte1 & 0x7F;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_len {
            return Err(RtpError::PacketTooShort);
        }
        buf.advance(csrc_len);

        if extension {
            if buf.remaining() < 4 {
                return Err(RtpError::PacketTooShort);
            }
            let _profile = buf.get_u16();
            let length = buf.get_u16() as usize * 4;
            if buf.remaining() < length {
                return Err(RtpError::PacketTooShort);
            }
            buf.advance(length);
        }

        let mut payload_len = buf.remaining();
        if padding {
            let padding_len = *buf.last().ok_or(RtpError::InvalidPadding)? as usize;
            if padding_len == 0 || padding_len > payload_len {
                return Err(RtpError::InvalidPadding);
            }
            payload_len -= padding_len;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MIN_HEADER_SIZE + self.payload.len());
        buf.put_u8(2 << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP[PT={}, Seq={}, TS={}, SSRC={:08x}, Marker={}, Payload={}]",
            self.payload_type,
            self.sequence,
            self.timestamp,
            self.ssrc,
            self.marker,
            self.payload.len()
        )
    }
}

/// Volume carried in every event we send
pub const DTMF_VOLUME: u8 = 10;

/// RFC 4733 telephone-event payload
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     event     |E|R| volume    |          duration             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl TelephoneEvent {
    pub const SIZE: usize = 4;

    pub fn new(event: u8, end: bool, duration: u16) -> Self {
        Self {
            event,
            end,
            volume: DTMF_VOLUME,
            duration,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, RtpError> {
        if data.len() < Self::SIZE {
            return Err(RtpError::PacketTooShort);
        }
        let mut buf = data;
        let event = buf.get_u8();
        let flags = buf.get_u8();
        Ok(Self {
            event,
            end: flags & 0x80 != 0,
            volume: flags & 0x3F,
            duration: buf.get_u16(),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.event);
        buf.put_u8(((self.end as u8) << 7) | (self.volume & 0x3F));
        buf.put_u16(self.duration);
        buf.freeze()
    }
}

/// RFC 4733 event code for a keypad symbol ('!' is hook flash)
pub fn dtmf_event_code(key: char) -> Option<u8> {
    match key {
        '0'..='9' => key.to_digit(10).map(|d| d as u8),
        '*' => Some(10),
        '#' => Some(11),
        'A' | 'a' => Some(12),
        'B' | 'b' => Some(13),
        'C' | 'c' => Some(14),
        'D' | 'd' => Some(15),
        '!' => Some(16),
        _ => None,
    }
}

/// RTP errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RtpError {
    #[error("Packet too short")]
    PacketTooShort,
    #[error("Invalid version: {0}")]
    InvalidVersion(u8),
    #[error("Invalid padding")]
    InvalidPadding,
    #[error("Telephone events not negotiated")]
    EventsNotSupported,
    #[error("Socket error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_packet_serialize_parse() {
        let payload = Bytes::from_static(&[0xd0; 33]);
        let mut packet = RtpPacket::new(3, 1234, 567890, 0x12345678, payload.clone());
        packet.marker = true;

        let parsed = RtpPacket::parse(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_rtp_skips_csrc_and_padding() {
        let mut data = vec![0xA1, 0x03, 0, 1, 0, 0, 0, 160, 0, 0, 0, 9];
        data.extend_from_slice(&[0x11, 0x11, 0x11, 0x11]);
        data.extend_from_slice(b"abc");
        data.extend_from_slice(&[0, 2]);

        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.timestamp, 160);
        assert_eq!(parsed.payload, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_rtp_min_size() {
        let data = vec![0u8; 11];
        assert!(matches!(RtpPacket::parse(&data), Err(RtpError::PacketTooShort)));
    }

    #[test]
    fn test_rtp_invalid_version() {
        let mut data = vec![0u8; 12];
        data[0] = 0x40;
        assert!(matches!(RtpPacket::parse(&data), Err(RtpError::InvalidVersion(1))));
    }

    #[test]
    fn test_telephone_event_layout() {
        let event = TelephoneEvent::new(11, true, 480);
        let bytes = event.serialize();
        assert_eq!(&bytes[..], &[11, 0x80 | DTMF_VOLUME, 0x01, 0xE0]);
        assert_eq!(TelephoneEvent::parse(&bytes).unwrap(), event);
    }

    #[test]
    fn test_dtmf_event_codes() {
        assert_eq!(dtmf_event_code('0'), Some(0));
        assert_eq!(dtmf_event_code('9'), Some(9));
        assert_eq!(dtmf_event_code('*'), Some(10));
        assert_eq!(dtmf_event_code('#'), Some(11));
        assert_eq!(dtmf_event_code('a'), Some(12));
        assert_eq!(dtmf_event_code('D'), Some(15));
        assert_eq!(dtmf_event_code('!'), Some(16));
        assert_eq!(dtmf_event_code('x'), None);
    }
}
