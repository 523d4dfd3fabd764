//! RTP session and transport

use super::packet::{RtpError, RtpPacket, TelephoneEvent};
use bytes::Bytes;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// RTP Session
///
/// Packet generation state for a single outbound media stream
pub struct RtpSession {
    /// Synchronization source identifier (randomly generated)
    ssrc: u32,
    /// Sequence number (starts random, increments for each packet)
    sequence: AtomicU16,
    /// Timestamp base (starts at random value)
    timestamp_base: u32,
    payload_type: u8,
}

impl RtpSession {
    pub fn new(payload_type: u8) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            ssrc: rng.gen(),
            sequence: AtomicU16::new(rng.gen()),
            timestamp_base: rng.gen(),
            payload_type,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Build the next packet. `timestamp` is relative to the session base.
    pub fn create_packet(
        &self,
        payload_type: u8,
        payload: Bytes,
        timestamp: u32,
        marker: bool,
    ) -> RtpPacket {
        let mut packet = RtpPacket::new(
            payload_type,
            self.next_sequence(),
            self.timestamp_base.wrapping_add(timestamp),
            self.ssrc,
            payload,
        );
        packet.marker = marker;
        packet
    }
}

/// RTP payload transport used by a media session
#[async_trait::async_trait]
pub trait RtpTransport: Send + Sync {
    async fn send_audio(&self, payload: &[u8], timestamp: u32) -> Result<usize, RtpError>;

    /// Send one telephone-event packet. `start` sets the marker bit.
    async fn send_event(
        &self,
        event: TelephoneEvent,
        timestamp: u32,
        start: bool,
    ) -> Result<usize, RtpError>;

    /// Receive the next audio payload into `buf`, 0 when nothing arrived
    /// within one frame interval
    async fn recv_audio(&self, buf: &mut [u8], timestamp: u32) -> Result<usize, RtpError>;
}

/// Symmetric RTP over UDP
pub struct UdpRtpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    session: RtpSession,
    event_payload_type: Option<u8>,
    frame_interval: Duration,
}

impl UdpRtpTransport {
    pub async fn bind(
        local_port: u16,
        remote: SocketAddr,
        payload_type: u8,
        event_payload_type: Option<u8>,
    ) -> Result<Self, RtpError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .map_err(|e| RtpError::Io(format!("Failed to bind RTP port {}: {}", local_port, e)))?;
        debug!("RTP bound on port {} towards {}", local_port, remote);

        Ok(Self {
            socket,
            remote,
            session: RtpSession::new(payload_type),
            event_payload_type,
            frame_interval: Duration::from_millis(20),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RtpError> {
        self.socket
            .local_addr()
            .map_err(|e| RtpError::Io(e.to_string()))
    }

    async fn send_packet(&self, packet: RtpPacket) -> Result<usize, RtpError> {
        self.socket
            .send_to(&packet.serialize(), self.remote)
            .await
            .map_err(|e| RtpError::Io(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RtpTransport for UdpRtpTransport {
    async fn send_audio(&self, payload: &[u8], timestamp: u32) -> Result<usize, RtpError> {
        let packet = self.session.create_packet(
            self.session.payload_type(),
            Bytes::copy_from_slice(payload),
            timestamp,
            false,
        );
        self.send_packet(packet).await
    }

    async fn send_event(
        &self,
        event: TelephoneEvent,
        timestamp: u32,
        start: bool,
    ) -> Result<usize, RtpError> {
        let payload_type = self
            .event_payload_type
            .ok_or(RtpError::EventsNotSupported)?;
        let packet = self
            .session
            .create_packet(payload_type, event.serialize(), timestamp, start);
        self.send_packet(packet).await
    }

    async fn recv_audio(&self, buf: &mut [u8], _timestamp: u32) -> Result<usize, RtpError> {
        let mut datagram = [0u8; 1500];
        let received =
            tokio::time::timeout(self.frame_interval, self.socket.recv_from(&mut datagram)).await;
        let size = match received {
            Err(_) => return Ok(0),
            Ok(Err(e)) => return Err(RtpError::Io(e.to_string())),
            Ok(Ok((size, _source))) => size,
        };

        let packet = RtpPacket::parse(&datagram[..size])?;
        if packet.payload_type != self.session.payload_type() {
            warn!(
                "Unexpected payload type: expected {}, got {}",
                self.session.payload_type(),
                packet.payload_type
            );
            return Ok(0);
        }
        let n = packet.payload.len().min(buf.len());
        buf[..n].copy_from_slice(&packet.payload[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_increment() {
        let session = RtpSession::new(3);
        let p1 = session.create_packet(3, Bytes::new(), 0, false);
        let p2 = session.create_packet(3, Bytes::new(), 160, false);
        assert_eq!(p2.sequence, p1.sequence.wrapping_add(1));
        assert_eq!(p2.timestamp.wrapping_sub(p1.timestamp), 160);
        assert_eq!(p1.ssrc, session.ssrc());
    }

    #[tokio::test]
    async fn test_udp_audio_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let transport = UdpRtpTransport::bind(0, peer_addr, 3, Some(101)).await.unwrap();
        let local_port = transport.local_addr().unwrap().port();

        transport.send_audio(&[1u8; 33], 0).await.unwrap();
        let mut buf = [0u8; 1500];
        let (size, _) = peer.recv_from(&mut buf).await.unwrap();
        let packet = RtpPacket::parse(&buf[..size]).unwrap();
        assert_eq!(packet.payload_type, 3);
        assert_eq!(packet.payload.len(), 33);

        let reply = RtpPacket::new(3, 1, 0, 7, Bytes::from_static(&[9u8; 33]));
        peer.send_to(&reply.serialize(), ("127.0.0.1", local_port))
            .await
            .unwrap();
        let mut frame = [0u8; 33];
        let mut got = 0;
        for _ in 0..50 {
            got = transport.recv_audio(&mut frame, 0).await.unwrap();
            if got > 0 {
                break;
            }
        }
        assert_eq!(got, 33);
        assert_eq!(frame[0], 9);
    }

    #[tokio::test]
    async fn test_events_need_payload_type() {
        let transport = UdpRtpTransport::bind(0, "127.0.0.1:9".parse().unwrap(), 3, None)
            .await
            .unwrap();
        let result = transport
            .send_event(TelephoneEvent::new(1, false, 0), 0, true)
            .await;
        assert!(matches!(result, Err(RtpError::EventsNotSupported)));
    }
}
