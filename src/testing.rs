//! In-process fakes for the crate's ports

use crate::domain::auth::AuthenticationParameters;
use crate::domain::shared::{CallId, ControlError, MobileIdentity, Result};
use crate::domain::subscriber::{LocationRequester, RegisterMode, RegistrationService, SmsDelivery};
use crate::infrastructure::media::rtp::{RtpError, RtpTransport, TelephoneEvent};
use crate::infrastructure::protocols::gsm::{L3Frame, L3Message, LogicalChannel, Primitive};
use crate::infrastructure::protocols::sip::message::{SipMessage, SipMethod, SipRequest};
use crate::infrastructure::protocols::sip::transport::{
    CallTable, HeldLock, MessageTransport, TransportError,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Message transport that records every write and lets tests inject
/// inbound messages into the call table
#[derive(Default)]
pub struct LoopbackTransport {
    calls: CallTable,
    written: Mutex<Vec<SipMessage>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` for its call. False when the call has no FIFO.
    pub async fn deliver(&self, message: SipMessage) -> bool {
        let Some(call_id) = message.call_id().map(CallId::new) else {
            return false;
        };
        self.calls.push(&call_id, message).await.is_ok()
    }

    pub fn written(&self) -> Vec<SipMessage> {
        self.written.lock().unwrap().clone()
    }

    pub fn last_request(&self, method: SipMethod) -> Option<SipRequest> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter_map(|m| m.as_request())
            .find(|r| r.method() == Some(method))
            .cloned()
    }

    pub fn count(&self, method: SipMethod) -> usize {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.method() == Some(method))
            .count()
    }
}

#[async_trait::async_trait]
impl MessageTransport for LoopbackTransport {
    async fn add_call(&self, call_id: &CallId) -> bool {
        self.calls.add(call_id).await
    }

    async fn remove_call(&self, call_id: &CallId) {
        self.calls.remove(call_id).await
    }

    async fn write(
        &self,
        _destination: SocketAddr,
        message: &SipMessage,
    ) -> std::result::Result<(), TransportError> {
        self.written.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn read(
        &self,
        call_id: &CallId,
        timeout: Duration,
        lock: Option<&mut HeldLock>,
    ) -> std::result::Result<SipMessage, TransportError> {
        self.calls.read(call_id, timeout, lock).await
    }

    async fn try_read(&self, call_id: &CallId) -> Option<SipMessage> {
        self.calls.try_pop(call_id).await
    }

    async fn enqueue(&self, call_id: &CallId, message: SipMessage) -> bool {
        self.calls.push(call_id, message).await.is_ok()
    }

    async fn fifo_size(&self, call_id: &CallId) -> i64 {
        self.calls.size(call_id).await
    }
}

/// RTP transport that records what a media session sends
#[derive(Default)]
pub struct RecordingRtp {
    audio: Mutex<Vec<u32>>,
    events: Mutex<Vec<(TelephoneEvent, u32, bool)>>,
    fail_events: AtomicBool,
}

impl RecordingRtp {
    pub fn audio_timestamps(&self) -> Vec<u32> {
        self.audio.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<(TelephoneEvent, u32, bool)> {
        self.events.lock().unwrap().clone()
    }

    /// Make every following event send fail
    pub fn fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RtpTransport for RecordingRtp {
    async fn send_audio(
        &self,
        payload: &[u8],
        timestamp: u32,
    ) -> std::result::Result<usize, RtpError> {
        self.audio.lock().unwrap().push(timestamp);
        Ok(payload.len())
    }

    async fn send_event(
        &self,
        event: TelephoneEvent,
        timestamp: u32,
        start: bool,
    ) -> std::result::Result<usize, RtpError> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(RtpError::Io("refused".to_string()));
        }
        self.events.lock().unwrap().push((event, timestamp, start));
        Ok(16)
    }

    async fn recv_audio(
        &self,
        _buf: &mut [u8],
        _timestamp: u32,
    ) -> std::result::Result<usize, RtpError> {
        Ok(0)
    }
}

/// Channel that replays a fixed list of reads. `None` entries, and reads
/// past the end of the script, are timeouts.
pub struct ScriptedChannel {
    script: Mutex<VecDeque<Option<L3Frame>>>,
    sent: Mutex<Vec<L3Message>>,
    primitives: Mutex<Vec<Primitive>>,
    kc: Mutex<Option<String>>,
    decrypting: AtomicBool,
    encrypting: AtomicBool,
}

impl ScriptedChannel {
    pub fn new(script: Vec<Option<L3Frame>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
            primitives: Mutex::new(Vec::new()),
            kc: Mutex::new(None),
            decrypting: AtomicBool::new(false),
            encrypting: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<L3Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn primitives(&self) -> Vec<Primitive> {
        self.primitives.lock().unwrap().clone()
    }

    pub fn kc(&self) -> Option<String> {
        self.kc.lock().unwrap().clone()
    }

    pub fn decrypting(&self) -> bool {
        self.decrypting.load(Ordering::SeqCst)
    }

    pub fn encrypting(&self) -> bool {
        self.encrypting.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LogicalChannel for ScriptedChannel {
    async fn send(&self, message: L3Message) {
        self.sent.lock().unwrap().push(message);
    }

    async fn send_primitive(&self, primitive: Primitive) {
        self.primitives.lock().unwrap().push(primitive);
    }

    async fn recv(&self, _timeout: Duration) -> Option<L3Frame> {
        self.script.lock().unwrap().pop_front().flatten()
    }

    fn set_kc(&self, kc: &str) {
        *self.kc.lock().unwrap() = Some(kc.to_string());
    }

    fn activate_decryption(&self) {
        self.decrypting.store(true, Ordering::SeqCst);
    }

    fn activate_encryption(&self) {
        self.encrypting.store(true, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        "SDCCH".to_string()
    }
}

/// Registrar that answers from a script. Once the script runs out every
/// REGISTER times out.
pub struct ScriptedRegistration {
    script: Mutex<VecDeque<Result<bool>>>,
    rand: Option<String>,
    kc: Option<String>,
    modes: Mutex<Vec<RegisterMode>>,
    seen_sres: Mutex<Vec<Option<u32>>>,
}

impl ScriptedRegistration {
    pub fn new(script: Vec<Result<bool>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            rand: None,
            kc: None,
            modes: Mutex::new(Vec::new()),
            seen_sres: Mutex::new(Vec::new()),
        }
    }

    /// Challenge handed out on any REGISTER that has none yet
    pub fn with_rand(mut self, rand: &str) -> Self {
        self.rand = Some(rand.to_string());
        self
    }

    /// Ciphering key furnished with every success
    pub fn with_kc(mut self, kc: &str) -> Self {
        self.kc = Some(kc.to_string());
        self
    }

    pub fn modes(&self) -> Vec<RegisterMode> {
        self.modes.lock().unwrap().clone()
    }

    /// SRES present on each REGISTER, in order
    pub fn seen_sres(&self) -> Vec<Option<u32>> {
        self.seen_sres.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RegistrationService for ScriptedRegistration {
    async fn register(
        &self,
        mode: RegisterMode,
        params: &mut AuthenticationParameters,
    ) -> Result<bool> {
        self.modes.lock().unwrap().push(mode);
        self.seen_sres.lock().unwrap().push(params.sres());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ControlError::RegistrationTimeout("scripted".to_string())));

        if let Some(rand) = &self.rand {
            if params.rand().is_none() {
                params.set_rand_hex(rand)?;
            }
        }
        if let (Ok(true), Some(kc)) = (&outcome, &self.kc) {
            params.set_kc_hex(kc)?;
        }
        outcome
    }
}

/// SMS delivery that keeps `(from, body, reference)` for each message
#[derive(Default)]
pub struct RecordingSms {
    delivered: Mutex<Vec<(String, String, u8)>>,
}

impl RecordingSms {
    pub fn delivered(&self) -> Vec<(String, String, u8)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SmsDelivery for RecordingSms {
    async fn deliver(
        &self,
        from: &str,
        body: &str,
        _content_type: &str,
        reference: u8,
        _channel: &dyn LogicalChannel,
    ) -> Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((from.to_string(), body.to_string(), reference));
        Ok(())
    }
}

/// Location requester with a fixed answer
pub struct ScriptedLocation {
    answer: bool,
    requests: Mutex<Vec<MobileIdentity>>,
}

impl ScriptedLocation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<MobileIdentity> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LocationRequester for ScriptedLocation {
    async fn request_location(
        &self,
        mobile_id: &MobileIdentity,
        _channel: &dyn LogicalChannel,
    ) -> bool {
        self.requests.lock().unwrap().push(mobile_id.clone());
        self.answer
    }
}
