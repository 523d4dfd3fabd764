//! Media session: frame timing and RFC 2833 keypresses over an RTP transport

use super::packet::{dtmf_event_code, TelephoneEvent};
use super::session::RtpTransport;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Samples per 20 ms frame at 8 kHz
pub const FRAME_SAMPLES: u32 = 160;

/// One GSM 06.10 full-rate frame
pub const GSM_FRAME_LEN: usize = 33;

struct ActiveTone {
    key: char,
    code: u8,
    start_time: u32,
    duration: u32,
}

impl ActiveTone {
    fn event(&self, end: bool) -> TelephoneEvent {
        let duration = self.duration.min(u16::MAX as u32) as u16;
        TelephoneEvent::new(self.code, end, duration)
    }
}

pub struct MediaSession {
    transport: Arc<dyn RtpTransport>,
    tx_time: u32,
    rx_time: u32,
    tone: Option<ActiveTone>,
}

impl MediaSession {
    pub fn new(transport: Arc<dyn RtpTransport>) -> Self {
        Self {
            transport,
            tx_time: 0,
            rx_time: 0,
            tone: None,
        }
    }

    pub fn tx_time(&self) -> u32 {
        self.tx_time
    }

    pub fn rx_time(&self) -> u32 {
        self.rx_time
    }

    /// Key currently being signalled
    pub fn dtmf(&self) -> Option<char> {
        self.tone.as_ref().map(|t| t.key)
    }

    /// Send one audio frame, plus a tone continuation while a key is held
    pub async fn tx_frame(&mut self, frame: &[u8]) {
        if let Err(e) = self.transport.send_audio(frame, self.tx_time).await {
            debug!("RTP audio send failed: {}", e);
        }
        self.tx_time = self.tx_time.wrapping_add(FRAME_SAMPLES);

        let Some(tone) = self.tone.as_mut() else {
            return;
        };
        let event = tone.event(false);
        let start_time = tone.start_time;
        tone.duration += FRAME_SAMPLES;
        debug!("DTMF RFC-2833 sending {} {}", tone.key, tone.duration);

        if let Err(e) = self.transport.send_event(event, start_time, false).await {
            error!("DTMF RFC-2833 failed after start: {}", e);
            self.tone = None;
        }
    }

    /// Receive one audio frame into `frame`, returning the byte count
    pub async fn rx_frame(&mut self, frame: &mut [u8]) -> usize {
        let received = match self.transport.recv_audio(frame, self.rx_time).await {
            Ok(n) => n,
            Err(e) => {
                debug!("RTP audio receive failed: {}", e);
                0
            }
        };
        self.rx_time = self.rx_time.wrapping_add(FRAME_SAMPLES);
        received
    }

    /// Begin signalling `key`. False for an unknown symbol or a failed send.
    pub async fn start_dtmf(&mut self, key: char) -> bool {
        let Some(code) = dtmf_event_code(key) else {
            warn!("Bad dtmf: {}", key);
            return false;
        };
        let mut tone = ActiveTone {
            key,
            code,
            start_time: self.tx_time,
            duration: 0,
        };
        let sent = self
            .transport
            .send_event(tone.event(false), tone.start_time, true)
            .await;
        tone.duration += FRAME_SAMPLES;

        match sent {
            Ok(bytes) if bytes > 0 => {
                self.tone = Some(tone);
                true
            }
            Ok(_) | Err(_) => {
                warn!("DTMF RFC-2833 failed on start.");
                self.tone = None;
                false
            }
        }
    }

    /// Send the end event for the current key and clear it
    pub async fn stop_dtmf(&mut self) {
        let Some(mut tone) = self.tone.take() else {
            return;
        };
        let event = tone.event(true);
        tone.duration += FRAME_SAMPLES;
        debug!("DTMF RFC-2833 sending {} {}", tone.key, tone.duration);

        if let Err(e) = self.transport.send_event(event, tone.start_time, false).await {
            error!("DTMF RFC-2833 failed at end: {}", e);
        }
    }
}
