//! SIP call session engine
//!
//! One `SipEngine` drives one SIP transaction or dialog: a registration, a
//! mobile-originated or mobile-terminated call, or a short message. Each
//! public operation performs one protocol step and returns the resulting
//! [`SipState`]. Transport timeouts never escape an operation; they become
//! retransmissions or state transitions.
//!
//! The engine is advanced only by its owning worker. Once it reaches a
//! terminal state the worker calls [`SipEngine::close`] to drop the call's
//! FIFO from the transport.

use super::builder::{RequestBuilder, ResponseBuilder};
use super::call_state::SipState;
use super::dialog::{new_branch, new_tag, DialogContext};
use super::message::{SipMessage, SipMethod, SipRequest, SipResponse};
use super::sdp::SdpSession;
use super::timers::{Deadline, SipTimers};
use super::transport::{HeldLock, MessageTransport, TransportError};
use crate::config::{Config, EmergencyConfig};
use crate::domain::auth::{AuthAlgorithm, AuthenticationParameters, KC_HEX_LEN, RAND_HEX_LEN};
use crate::domain::shared::{CallId, ControlError, Result};
use crate::domain::subscriber::RegisterMode;
use crate::infrastructure::media::rtp::{MediaSession, RtpTransport, UdpRtpTransport};
use crate::infrastructure::metrics;
use rand::Rng;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// GSM 06.10 full rate, the only vocoder the radio side carries
pub const DEFAULT_CODEC: u8 = 3;

const MAX_FORWARDS: &str = "70";
const DEFAULT_SIP_PORT: u16 = 5060;
const MULTIPART_BOUNDARY: &str = "sipbridge-boundary";

/// Wait used by the non-blocking CANCEL poll
const CANCEL_POLL: Duration = Duration::from_millis(1);

const GEOPRIV_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<presence xmlns="urn:ietf:params:xml:ns:pidf"
xmlns:gp="urn:ietf:params:xml:ns:pidf:geopriv10"
xmlns:gml="urn:opengis:specification:gml:schema-xsd:feature:v3.0"
entity="pres:{user}@{switch}">
<tuple id="1">
<status>
<gp:geopriv>
<gp:location-info>
<gml:location>
<gml:Point gml:id="point1" srsName="epsg:4326">
<gml:coordinates>{coordinates}</gml:coordinates>
</gml:Point>
</gml:location>
</gp:location-info>
<gp:usage-rules>
<gp:retransmission-allowed>no</gp:retransmission-allowed>
</gp:usage-rules>
</gp:geopriv>
</status>
</tuple>
</presence>
"#;

/// Settings shared by every engine on this node
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub local_ip: String,
    pub local_port: u16,
    /// Host used in P-Preferred-Identity
    pub speech_proxy: String,
    /// Value of P-Access-Network-Info
    pub access_network_info: String,
    pub registration_period_min: u32,
    pub timers: SipTimers,
    pub emergency: EmergencyConfig,
    /// RFC 2833 payload type, when keypresses go out as telephone events
    pub dtmf_payload_type: Option<u8>,
}

impl EngineParams {
    pub fn from_config(config: &Config) -> Self {
        let gsm = &config.gsm;
        Self {
            local_ip: config.sip.local_ip.clone(),
            local_port: config.sip.local_port,
            speech_proxy: config.sip.proxy_speech.clone(),
            access_network_info: format!(
                "3GPP-GERAN; cgi-3gpp={}{}{:04x}{:04x}",
                gsm.mcc, gsm.mnc, gsm.lac, gsm.ci
            ),
            registration_period_min: config.sip.registration_period_min,
            timers: SipTimers::from(&config.sip.timers),
            emergency: config.emergency.clone(),
            dtmf_payload_type: config
                .sip
                .dtmf
                .rfc2833
                .then_some(config.sip.dtmf.payload_type),
        }
    }
}

impl Default for EngineParams {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Resolve a `host[:port]` proxy string to an IPv4 socket address
pub async fn resolve_proxy(proxy: &str) -> Result<SocketAddr> {
    let target = if proxy.contains(':') {
        proxy.to_string()
    } else {
        format!("{}:{}", proxy, DEFAULT_SIP_PORT)
    };
    let mut addrs = tokio::net::lookup_host(&target)
        .await
        .map_err(|e| ControlError::InvalidParameter(format!("cannot resolve {}: {}", proxy, e)))?;
    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| ControlError::InvalidParameter(format!("no IPv4 address for {}", proxy)))
}

/// Outbound messages kept for retransmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retained {
    Invite,
    Bye,
    Cancel,
    Error,
}

impl fmt::Display for Retained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retained::Invite => write!(f, "INVITE"),
            Retained::Bye => write!(f, "BYE"),
            Retained::Cancel => write!(f, "CANCEL"),
            Retained::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of a mobile-originated INVITE response
fn moc_transition(code: u16) -> SipState {
    match code {
        180 => SipState::Ringing,
        100..=199 => SipState::Proceeding,
        200 => SipState::Active,
        486 | 600 | 603 => SipState::Busy,
        _ => SipState::Fail,
    }
}

fn quoted_param(value: &str, name: &str) -> Option<String> {
    let start = value.find(&format!("{}=\"", name))? + name.len() + 2;
    let rest = &value[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Call session state machine
pub struct SipEngine {
    transport: Arc<dyn MessageTransport>,
    params: Arc<EngineParams>,
    proxy: String,
    proxy_addr: SocketAddr,

    call_id: CallId,
    sip_username: String,
    remote_username: String,
    remote_domain: String,
    local_tag: String,
    via_branch: String,
    cseq: u32,

    state: SipState,
    instigator: bool,
    rtp_port: u16,
    codec: u8,
    dialog: Option<DialogContext>,
    in_table: bool,
    lost_contact: bool,

    invite: Option<SipRequest>,
    last_response: Option<SipResponse>,
    bye: Option<SipRequest>,
    cancel: Option<SipRequest>,
    error: Option<SipResponse>,

    media: Option<MediaSession>,
}

impl SipEngine {
    /// New engine talking to `proxy` (`host[:port]`)
    pub async fn new(
        transport: Arc<dyn MessageTransport>,
        params: Arc<EngineParams>,
        proxy: &str,
    ) -> Result<Self> {
        let proxy_addr = resolve_proxy(proxy).await.map_err(|e| {
            error!("cannot resolve IP address for {}", proxy);
            e
        })?;

        Ok(Self {
            transport,
            params,
            proxy: proxy.to_string(),
            proxy_addr,
            call_id: CallId::generate(),
            sip_username: String::new(),
            remote_username: String::new(),
            remote_domain: String::new(),
            local_tag: new_tag(),
            via_branch: new_branch(),
            cseq: rand::thread_rng().gen_range(0..600),
            state: SipState::Null,
            instigator: false,
            rtp_port: 0,
            codec: DEFAULT_CODEC,
            dialog: None,
            in_table: false,
            lost_contact: false,
            invite: None,
            last_response: None,
            bye: None,
            cancel: None,
            error: None,
            media: None,
        })
    }

    /// Engine for a locally originated transaction of `imsi`, with a fresh
    /// numeric call id
    pub fn for_subscriber(mut self, imsi: &str) -> Self {
        debug!("IMSI={}", imsi);
        self.call_id = CallId::generate();
        self.sip_username = format!("IMSI{}", imsi);
        self
    }

    /// Engine for a mobile-terminated transaction already carrying a call id
    pub fn for_incoming(
        mut self,
        call_id: CallId,
        imsi: &str,
        orig_user: &str,
        orig_host: &str,
    ) -> Self {
        debug!("IMSI={} {} {}@{}", imsi, call_id, orig_user, orig_host);
        self.call_id = call_id;
        self.sip_username = format!("IMSI{}", imsi);
        self.remote_username = orig_user.to_string();
        self.remote_domain = orig_host.to_string();
        self
    }

    pub fn state(&self) -> SipState {
        self.state
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    /// True when this endpoint originated the dialog
    pub fn instigator(&self) -> bool {
        self.instigator
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn dialog(&self) -> Option<&DialogContext> {
        self.dialog.as_ref()
    }

    pub fn sip_username(&self) -> &str {
        &self.sip_username
    }

    /// True once a retransmission wait ran out without any reply from the
    /// proxy
    pub fn lost_contact(&self) -> bool {
        self.lost_contact
    }

    /// Drop the call's FIFO from the transport
    pub async fn close(&mut self) {
        if self.in_table {
            if !self.state.is_terminal() {
                warn!(
                    "closing call {} in non-terminal state {}",
                    self.call_id, self.state
                );
            }
            self.transport.remove_call(&self.call_id).await;
            self.in_table = false;
        }
    }

    // ---------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------

    async fn open(&mut self) {
        if !self.transport.add_call(&self.call_id).await {
            debug!("call {} already has a FIFO", self.call_id);
        }
        self.in_table = true;
    }

    async fn send(&self, message: SipMessage) {
        if let Err(e) = self.transport.write(self.proxy_addr, &message).await {
            warn!("SIP write to {} failed: {}", self.proxy_addr, e);
        }
    }

    async fn read(
        &self,
        timeout: Duration,
        lock: Option<&mut HeldLock>,
    ) -> std::result::Result<SipMessage, TransportError> {
        self.transport.read(&self.call_id, timeout, lock).await
    }

    fn log_step(&self, step: &str) {
        info!(
            "user {} state {} {} callID {}",
            self.sip_username, self.state, step, self.call_id
        );
    }

    fn lost_proxy(&mut self) {
        error!("lost contact with proxy {}", self.proxy_addr);
        metrics::incr(metrics::SIP_LOST_PROXY);
        self.lost_contact = true;
    }

    fn failed_local(&mut self) {
        metrics::incr(metrics::SIP_FAILED_LOCAL);
        self.state = SipState::Fail;
    }

    fn local_uri(&self) -> String {
        format!("sip:{}@{}", self.sip_username, self.params.local_ip)
    }

    fn contact(&self) -> String {
        format!(
            "<sip:{}@{}:{}>",
            self.sip_username, self.params.local_ip, self.params.local_port
        )
    }

    fn remote_uri(&self) -> String {
        let domain = if self.remote_domain.is_empty() {
            self.proxy_addr.ip().to_string()
        } else {
            self.remote_domain.clone()
        };
        if self.remote_username.is_empty() {
            format!("sip:{}", domain)
        } else {
            format!("sip:{}@{}", self.remote_username, domain)
        }
    }

    fn with_private_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("P-Access-Network-Info", self.params.access_network_info.clone())
            .header(
                "P-Preferred-Identity",
                format!("<sip:{}@{}>", self.sip_username, self.params.speech_proxy),
            )
    }

    /// Request skeleton: Via with the current branch, dialog headers and
    /// the private access headers
    fn request(&self, method: SipMethod, uri: &str, dialog: &DialogContext) -> RequestBuilder {
        let builder = RequestBuilder::new(method, uri)
            .via(&self.params.local_ip, self.params.local_port, &self.via_branch)
            .header("Max-Forwards", MAX_FORWARDS)
            .header("From", dialog.local.clone())
            .header("To", dialog.remote.clone())
            .header("Call-ID", self.call_id.as_str())
            .header("CSeq", format!("{} {}", self.cseq, method));
        self.with_private_headers(builder)
    }

    fn saved_invite(&self) -> Result<&SipRequest> {
        self.invite.as_ref().ok_or_else(|| {
            ControlError::Internal(format!("no INVITE on file for call {}", self.call_id))
        })
    }

    fn current_dialog(&self) -> Result<DialogContext> {
        self.dialog.clone().ok_or_else(|| {
            ControlError::Internal(format!("no dialog for call {}", self.call_id))
        })
    }

    fn local_ip(&self) -> Result<IpAddr> {
        self.params
            .local_ip
            .parse()
            .map_err(|_| ControlError::InvalidParameter(format!("local IP {}", self.params.local_ip)))
    }

    fn sdp_body(&self) -> Result<String> {
        Ok(SdpSession::create_audio_session(
            &self.sip_username,
            self.local_ip()?,
            self.rtp_port,
            self.codec,
            self.params.dtmf_payload_type,
        )
        .to_string())
    }

    /// Adopt an INVITE as this session's dialog-forming request.
    ///
    /// `mine` is true for an INVITE (or MESSAGE) we sent; for an inbound one
    /// our tag goes on the To side.
    pub fn save_invite(&mut self, invite: SipRequest, mine: bool) {
        match DialogContext::from_invite(&invite, mine, &self.local_tag) {
            Some(dialog) => self.dialog = Some(dialog),
            None => warn!("INVITE for call {} lacks dialog headers", self.call_id),
        }
        if !mine {
            if let Some(cseq) = invite.cseq() {
                debug!("inbound INVITE CSeq {}", cseq);
            }
        }
        self.invite = Some(invite);
    }

    fn save_response(&mut self, response: SipResponse) {
        if let Some(dialog) = &self.dialog {
            self.dialog = Some(dialog.with_response(&response));
        }
        self.last_response = Some(response);
    }

    async fn resend(&self, retained: Retained) {
        let message: Option<SipMessage> = match retained {
            Retained::Invite => self.invite.clone().map(Into::into),
            Retained::Bye => self.bye.clone().map(Into::into),
            Retained::Cancel => self.cancel.clone().map(Into::into),
            Retained::Error => self.error.clone().map(Into::into),
        };
        match message {
            Some(message) => self.send(message).await,
            None => error!("no {} on file to resend for call {}", retained, self.call_id),
        }
    }

    /// Wait for any reply, resending `retained` on every Timer E timeout
    /// until Timer F runs out
    async fn await_reply(
        &self,
        retained: Retained,
        lock: Option<&mut HeldLock>,
    ) -> Option<SipMessage> {
        let deadline = Deadline::after(self.params.timers.f);
        self.await_reply_until(retained, &deadline, lock).await
    }

    async fn await_reply_until(
        &self,
        retained: Retained,
        deadline: &Deadline,
        mut lock: Option<&mut HeldLock>,
    ) -> Option<SipMessage> {
        let timers = self.params.timers;
        while !deadline.expired() {
            match self.read(deadline.attempt(timers.e), lock.as_deref_mut()).await {
                Ok(message) => return Some(message),
                Err(TransportError::Timeout(_)) => {
                    if deadline.expired() {
                        break;
                    }
                    info!("response timeout, resending {}", retained);
                    self.resend(retained).await;
                }
                Err(e) => {
                    warn!("read failed on call {}: {}", self.call_id, e);
                    break;
                }
            }
        }
        None
    }

    async fn send_ack(&self) {
        let dialog = match self.current_dialog() {
            Ok(dialog) => dialog,
            Err(e) => {
                error!("cannot ACK: {}", e);
                return;
            }
        };
        let uri = self.remote_uri();
        match self.request(SipMethod::Ack, &uri, &dialog).build() {
            Ok(ack) => self.send(ack.into()).await,
            Err(e) => error!("cannot build ACK for call {}: {}", self.call_id, e),
        }
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    /// REGISTER (or unregister) this subscriber with the registrar.
    ///
    /// Retransmits on every Timer E timeout until Timer F. `Ok(true)` on 200,
    /// `Ok(false)` on any other final response, `RegistrationTimeout` when the
    /// registrar never answered. The call's FIFO is removed in every case.
    pub async fn register(
        &mut self,
        mode: RegisterMode,
        params: &mut AuthenticationParameters,
    ) -> Result<bool> {
        self.log_step(&mode.to_string());
        self.open().await;

        let result = self.run_register(mode, params).await;

        self.transport.remove_call(&self.call_id).await;
        self.in_table = false;
        result
    }

    pub async fn unregister(&mut self, params: &mut AuthenticationParameters) -> Result<bool> {
        self.register(RegisterMode::Unregister, params).await
    }

    async fn run_register(
        &mut self,
        mode: RegisterMode,
        params: &mut AuthenticationParameters,
    ) -> Result<bool> {
        self.via_branch = new_branch();
        self.cseq += 1;

        let expires = match mode {
            RegisterMode::Register => 60 * self.params.registration_period_min,
            RegisterMode::Unregister => 0,
        };
        let registrar_uri = format!("sip:{}", self.proxy);
        let aor = format!("sip:{}@{}", self.sip_username, self.proxy);
        let dialog = DialogContext::outgoing(
            self.call_id.clone(),
            &aor,
            &self.local_tag,
            &aor,
            self.cseq,
        );

        let mut builder = self
            .request(SipMethod::Register, &registrar_uri, &dialog)
            .header("Contact", format!("{};expires={}", self.contact(), expires))
            .header("Expires", expires.to_string());
        if let Some(sres) = params.sres_hex() {
            let nonce = params.rand_hex().unwrap_or_default();
            builder = builder.header(
                "Authorization",
                format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                    self.sip_username, self.proxy, nonce, registrar_uri, sres
                ),
            );
        }
        let register: SipMessage = builder.build()?.into();

        metrics::incr(metrics::SIP_REGISTER_OUT);
        debug!("writing registration for {}", self.sip_username);
        self.send(register.clone()).await;

        let timers = self.params.timers;
        let deadline = Deadline::after(timers.f);
        let mut replied = false;
        let mut success = false;
        while !deadline.expired() {
            let message = match self.read(deadline.attempt(timers.e), None).await {
                Ok(message) => message,
                Err(TransportError::Timeout(_)) => {
                    if deadline.expired() {
                        break;
                    }
                    warn!(
                        "SIP REGISTER packet to {} timeout; resending",
                        self.proxy_addr
                    );
                    self.send(register.clone()).await;
                    continue;
                }
                Err(e) => {
                    warn!("REGISTER read failed: {}", e);
                    break;
                }
            };
            let Some(response) = message.as_response() else {
                debug!("ignoring {} during registration", message.method().map(|m| m.as_str()).unwrap_or("request"));
                continue;
            };

            replied = true;
            let status = response.status_code();
            info!("received status {} {}", status, response.reason());
            Self::absorb_challenge(response, params);
            match status {
                200 => {
                    info!("REGISTER success");
                    Self::absorb_kc(response, params);
                    success = true;
                    break;
                }
                401 => {
                    info!("REGISTER fail -- unauthorized");
                    break;
                }
                404 => {
                    info!("REGISTER fail -- not found");
                    break;
                }
                s if s >= 200 => {
                    warn!("REGISTER unexpected response {}", s);
                    break;
                }
                _ => {}
            }
        }

        if !replied {
            error!(
                "SIP REGISTER timed out; is the registration server {} OK?",
                self.proxy_addr
            );
            return Err(ControlError::RegistrationTimeout(self.proxy.clone()));
        }
        Ok(success)
    }

    /// RAND from a `WWW-Authenticate` nonce, when it is one
    fn absorb_challenge(response: &SipResponse, params: &mut AuthenticationParameters) {
        let Some(challenge) = response.header("WWW-Authenticate") else {
            return;
        };
        let Some(nonce) = quoted_param(&challenge, "nonce") else {
            return;
        };
        if nonce.len() != RAND_HEX_LEN {
            debug!("nonce is not a RAND: {}", nonce);
            return;
        }
        match params.set_rand_hex(&nonce) {
            Ok(()) => params.set_algorithm(AuthAlgorithm::from_challenge(&challenge)),
            Err(e) => warn!("bad RAND from registrar: {}", e),
        }
    }

    fn absorb_kc(response: &SipResponse, params: &mut AuthenticationParameters) {
        let Some(kc) = response.header("P-GSM-Kc") else {
            return;
        };
        if kc.len() != KC_HEX_LEN {
            warn!("ignoring Kc of {} characters", kc.len());
            return;
        }
        if let Err(e) = params.set_kc_hex(&kc) {
            warn!("bad Kc from registrar: {}", e);
        }
    }

    // ---------------------------------------------------------------
    // Mobile-originated call
    // ---------------------------------------------------------------

    pub async fn moc_send_invite(
        &mut self,
        called_user: &str,
        called_domain: &str,
        rtp_port: u16,
        codec: u8,
    ) -> Result<SipState> {
        self.log_step("INVITE");
        self.open().await;
        self.instigator = true;
        metrics::record_invite_out(false);

        self.remote_username = called_user.to_string();
        self.remote_domain = called_domain.to_string();
        self.rtp_port = rtp_port;
        self.codec = codec;
        debug!("To: {} From: {}", self.remote_uri(), self.local_uri());

        let uri = self.remote_uri();
        let body = self.sdp_body()?;
        self.start_invite(&uri, &uri, "application/sdp", body).await
    }

    /// Emergency INVITE to the configured destination
    pub async fn sos_send_invite(&mut self, rtp_port: u16, codec: u8) -> Result<SipState> {
        self.log_step("SOS INVITE");
        self.open().await;
        self.instigator = true;
        metrics::record_invite_out(true);

        let emergency = self.params.emergency.clone();
        self.remote_username = emergency.destination_user.clone();
        self.remote_domain = emergency.destination_host.clone();
        self.rtp_port = rtp_port;
        self.codec = codec;

        let uri = self.remote_uri();
        // RFC 5031 service URN is signalled in To; the request still routes
        // to the emergency host
        let to = if emergency.rfc5031 {
            "urn:service:sos".to_string()
        } else {
            uri.clone()
        };

        let sdp = self.sdp_body()?;
        match &emergency.geolocation {
            Some(coordinates) => {
                let pidf = GEOPRIV_TEMPLATE
                    .replace("{user}", &self.sip_username)
                    .replace("{switch}", &emergency.gateway_switch)
                    .replace("{coordinates}", coordinates);
                let body = format!(
                    "--{b}\r\nContent-Type: application/sdp\r\n\r\n{sdp}\r\n--{b}\r\nContent-Type: application/pidf+xml\r\n\r\n{pidf}\r\n--{b}--\r\n",
                    b = MULTIPART_BOUNDARY,
                    sdp = sdp,
                    pidf = pidf
                );
                let content_type = format!("multipart/mixed;boundary={}", MULTIPART_BOUNDARY);
                self.start_invite(&uri, &to, &content_type, body).await
            }
            None => self.start_invite(&uri, &to, "application/sdp", sdp).await,
        }
    }

    async fn start_invite(
        &mut self,
        request_uri: &str,
        to_uri: &str,
        content_type: &str,
        body: String,
    ) -> Result<SipState> {
        self.via_branch = new_branch();
        self.cseq += 1;

        let dialog = DialogContext::outgoing(
            self.call_id.clone(),
            &self.local_uri(),
            &self.local_tag,
            to_uri,
            self.cseq,
        );
        let invite = self
            .request(SipMethod::Invite, request_uri, &dialog)
            .header("Contact", self.contact())
            .body(content_type, body)
            .build()?;

        self.send(invite.clone().into()).await;
        self.save_invite(invite, true);
        self.state = SipState::Starting;
        Ok(self.state)
    }

    pub async fn moc_resend_invite(&mut self) -> Result<SipState> {
        self.log_step("resend INVITE");
        self.saved_invite()?;
        self.resend(Retained::Invite).await;
        Ok(self.state)
    }

    /// Poll once (Timer A) for a response to our INVITE.
    ///
    /// Every final failure is ACKed immediately. A 200 is not; the caller
    /// ACKs when the radio side connects.
    pub async fn moc_check_for_ok(&mut self, lock: Option<&mut HeldLock>) -> SipState {
        self.log_step("check for OK");

        let message = match self.read(self.params.timers.a, lock).await {
            Ok(message) => message,
            Err(TransportError::Timeout(_)) => {
                debug!("timeout");
                // Keep waiting while the far end is working on it
                if self.state != SipState::Proceeding {
                    self.state = SipState::Timeout;
                }
                return self.state;
            }
            Err(e) => {
                warn!("read failed on call {}: {}", self.call_id, e);
                self.failed_local();
                return self.state;
            }
        };

        let SipMessage::Response(response) = message else {
            warn!("ignoring request while waiting for INVITE response");
            return self.state;
        };
        let status = response.status_code();
        debug!("received status {}", status);
        self.save_response(response);

        let next = moc_transition(status);
        match next {
            SipState::Proceeding | SipState::Ringing | SipState::Active => {}
            SipState::Busy => {
                info!("remote end busy code {}", status);
                self.state = next;
                self.send_ack().await;
            }
            _ => {
                match status {
                    300..=399 => info!("redirection not supported code {}", status),
                    400..=599 => info!("request failure code {}", status),
                    600..=699 => info!("global failure code {}", status),
                    _ => info!("unhandled status code {}", status),
                }
                metrics::record_remote_failure(metrics::status_class(status));
                self.state = next;
                self.send_ack().await;
            }
        }
        self.state = next;
        debug!("new state: {}", self.state);
        self.state
    }

    /// ACK the last response to our INVITE
    pub async fn moc_send_ack(&mut self) -> Result<SipState> {
        self.log_step("ACK");
        if self.last_response.is_none() {
            return Err(ControlError::Internal(format!(
                "no response to ACK on call {}",
                self.call_id
            )));
        }
        self.send_ack().await;
        Ok(self.state)
    }

    // ---------------------------------------------------------------
    // Mobile-originated disconnect
    // ---------------------------------------------------------------

    pub async fn mod_send_bye(&mut self) -> Result<SipState> {
        self.log_step("BYE");
        self.saved_invite()?;
        let dialog = self.current_dialog()?;
        metrics::incr(metrics::SIP_BYE_OUT);

        self.via_branch = new_branch();
        self.cseq += 1;
        let uri = self.remote_uri();
        let bye = self.request(SipMethod::Bye, &uri, &dialog).build()?;

        self.send(bye.clone().into()).await;
        self.bye = Some(bye);
        self.state = SipState::MODClearing;
        Ok(self.state)
    }

    pub async fn mod_resend_bye(&mut self) -> Result<SipState> {
        self.log_step("resend BYE");
        if self.state != SipState::MODClearing {
            error!("resending BYE in state {}", self.state);
        }
        if self.bye.is_none() {
            return Err(ControlError::Internal("no BYE on file".to_string()));
        }
        self.resend(Retained::Bye).await;
        Ok(self.state)
    }

    /// Wait for the BYE's response. Always ends `Cleared`.
    pub async fn mod_wait_for_bye_ok(&mut self, lock: Option<&mut HeldLock>) -> SipState {
        self.log_step("wait for BYE OK");
        match self.await_reply(Retained::Bye, lock).await {
            Some(SipMessage::Response(response)) => {
                let code = response.status_code();
                self.save_response(response);
                if code == 200 {
                    metrics::incr(metrics::SIP_BYE_OK_IN);
                } else {
                    warn!(
                        "unexpected {} response to BYE, from proxy {}. Assuming other end has cleared",
                        code, self.proxy_addr
                    );
                }
            }
            Some(SipMessage::Request(request)) => {
                warn!(
                    "unexpected {} while waiting for BYE OK. Assuming other end has cleared",
                    request.method_name()
                );
            }
            None => self.lost_proxy(),
        }
        self.state = SipState::Cleared;
        self.state
    }

    pub async fn mod_send_cancel(&mut self) -> Result<SipState> {
        self.log_step("CANCEL");
        let invite = self.saved_invite()?;

        let mut builder = RequestBuilder::new(SipMethod::Cancel, invite.uri().to_string());
        for name in ["Via", "From", "To", "Call-ID"] {
            if let Some(value) = invite.header(name) {
                builder = builder.header(name, value);
            }
        }
        let cseq = invite.cseq().unwrap_or(self.cseq);
        builder = builder
            .header("Max-Forwards", MAX_FORWARDS)
            .header("CSeq", format!("{} CANCEL", cseq));
        let cancel = self.with_private_headers(builder).build()?;

        self.send(cancel.clone().into()).await;
        self.cancel = Some(cancel);
        self.state = SipState::MODCanceling;
        Ok(self.state)
    }

    pub async fn mod_resend_cancel(&mut self) -> Result<SipState> {
        self.log_step("resend CANCEL");
        if self.state != SipState::MODCanceling {
            error!("resending CANCEL in state {}", self.state);
        }
        if self.cancel.is_none() {
            return Err(ControlError::Internal("no CANCEL on file".to_string()));
        }
        self.resend(Retained::Cancel).await;
        Ok(self.state)
    }

    /// Wait for the CANCEL's response. Always ends `Canceled`.
    pub async fn mod_wait_for_cancel_ok(&mut self, lock: Option<&mut HeldLock>) -> SipState {
        self.log_step("wait for CANCEL OK");
        match self.await_reply(Retained::Cancel, lock).await {
            Some(SipMessage::Response(response)) => {
                let code = response.status_code();
                self.save_response(response);
                if code != 200 {
                    warn!(
                        "unexpected {} response to CANCEL, from proxy {}. Assuming other end has cleared",
                        code, self.proxy_addr
                    );
                }
            }
            Some(SipMessage::Request(request)) => {
                warn!("unexpected {} while waiting for CANCEL OK", request.method_name());
            }
            None => self.lost_proxy(),
        }
        self.state = SipState::Canceled;
        self.state
    }

    /// Wait for a response to our CANCEL: 200 cancels the session, 487 is
    /// ACKed. Codes outside `valid` are logged.
    pub async fn mod_wait_for_response(
        &mut self,
        valid: &[u16],
        lock: Option<&mut HeldLock>,
    ) -> SipState {
        self.log_step("wait for CANCEL response");
        match self.await_reply(Retained::Cancel, lock).await {
            Some(message) => {
                let code = message.status_code().unwrap_or_default();
                if let SipMessage::Response(response) = message {
                    if code == 200 {
                        self.save_response(response);
                        self.state = SipState::Canceled;
                    } else if code == 487 {
                        self.save_response(response);
                        self.send_ack().await;
                    }
                }
                if !valid.contains(&code) {
                    warn!(
                        "unexpected {} response to CANCEL, from proxy {}. Assuming other end has cleared",
                        code, self.proxy_addr
                    );
                }
            }
            None => self.lost_proxy(),
        }
        self.state
    }

    /// One Timer E read for the 487 that follows a CANCEL, ACKed if it
    /// arrives
    pub async fn mod_wait_for_487(&mut self, lock: Option<&mut HeldLock>) -> SipState {
        self.log_step("wait for 487");
        match self.read(self.params.timers.e, lock).await {
            Ok(SipMessage::Response(response)) if response.status_code() == 487 => {
                self.save_response(response);
                self.send_ack().await;
            }
            Ok(other) => {
                warn!(
                    "unexpected {:?} response to CANCEL, from proxy {}",
                    other.status_code(),
                    self.proxy_addr
                );
            }
            Err(_) => info!("487 Timeout"),
        }
        self.state
    }

    /// Send an error response to `cause`, or to the INVITE on file
    pub async fn mod_send_error(
        &mut self,
        cause: Option<&SipRequest>,
        code: u16,
        reason: &str,
        cancel: bool,
    ) -> Result<SipState> {
        self.log_step("ERROR");
        let request = match cause {
            Some(request) => request.clone(),
            None => self.saved_invite()?.clone(),
        };
        let response = ResponseBuilder::new(code)
            .reason(reason)
            .to_tag(self.local_tag.clone())
            .header("Contact", self.contact())
            .build_for_request(&request)?;

        self.send(response.clone().into()).await;
        self.error = Some(response);
        if cancel {
            self.state = SipState::MODCanceling;
        }
        Ok(self.state)
    }

    pub async fn mod_resend_error(&mut self, cancel: bool) -> Result<SipState> {
        self.log_step("resend ERROR");
        if cancel && self.state != SipState::MODCanceling {
            error!("incorrect state {} for resending ERROR", self.state);
        }
        if self.error.is_none() {
            return Err(ControlError::Internal("no ERROR on file".to_string()));
        }
        self.resend(Retained::Error).await;
        Ok(self.state)
    }

    /// Wait for the ACK to our error response.
    ///
    /// A retransmitted INVITE gets the error again and a CANCEL gets its 200.
    /// Neither restarts Timer F.
    pub async fn mod_wait_for_error_ack(
        &mut self,
        cancel: bool,
        mut lock: Option<&mut HeldLock>,
    ) -> SipState {
        self.log_step("wait for ERROR ACK");
        let deadline = Deadline::after(self.params.timers.f);
        loop {
            let Some(message) = self
                .await_reply_until(Retained::Error, &deadline, lock.as_deref_mut())
                .await
            else {
                self.lost_proxy();
                break;
            };
            match message.method() {
                Some(SipMethod::Ack) => {
                    debug!("error response acknowledged");
                    break;
                }
                Some(SipMethod::Invite) if self.same_invite(&message) => {
                    debug!("repeated INVITE, resending ERROR");
                    self.resend(Retained::Error).await;
                }
                Some(SipMethod::Cancel) => {
                    if let Some(request) = message.as_request() {
                        self.answer_cancel(request.clone()).await;
                    }
                }
                _ => {
                    warn!(
                        "unexpected response to ERROR, from proxy {}. Assuming other end has cleared",
                        self.proxy_addr
                    );
                    break;
                }
            }
        }
        if cancel {
            self.state = SipState::Canceled;
        }
        self.state
    }

    // ---------------------------------------------------------------
    // Mobile-terminated disconnect
    // ---------------------------------------------------------------

    /// Non-blocking look for a BYE while the call is up
    pub async fn mtd_check_bye(&mut self) -> SipState {
        if self.state != SipState::Active {
            return self.state;
        }

        let size = self.transport.fifo_size(&self.call_id).await;
        if size == -1 {
            warn!("MTDCheckBYE attempt to check BYE on non-existent SIP FIFO");
            self.state = SipState::Cleared;
            return self.state;
        }
        if size == 0 {
            return self.state;
        }
        let Some(message) = self.transport.try_read(&self.call_id).await else {
            return self.state;
        };

        match &message {
            SipMessage::Request(request) => match request.method() {
                Some(SipMethod::Bye) => {
                    debug!("found msg=BYE");
                    self.bye = Some(request.clone());
                    metrics::incr(metrics::SIP_BYE_IN);
                    self.state = SipState::MTDClearing;
                }
                Some(SipMethod::Ack) => debug!("Not responding to repeated ACK"),
                _ => debug!("ignoring {} on active call", request.method_name()),
            },
            SipMessage::Response(response) if response.status_code() == 200 => {
                // Repeated OK: answer the way a MOC would, whoever started
                // the call
                debug!("Repeated OK, resending ACK");
                self.send_ack().await;
            }
            SipMessage::Response(response) => {
                debug!("ignoring {} on active call", response.status_code())
            }
        }
        self.state
    }

    pub async fn mtd_send_bye_ok(&mut self) -> Result<SipState> {
        self.log_step("BYE OK");
        let bye = self
            .bye
            .as_ref()
            .ok_or_else(|| ControlError::Internal("no BYE on file".to_string()))?;
        let okay = ResponseBuilder::ok().build_for_request(bye)?;
        metrics::incr(metrics::SIP_BYE_OK_OUT);
        self.send(okay.into()).await;
        self.state = SipState::Cleared;
        Ok(self.state)
    }

    /// 200 for a CANCEL that crossed our final response
    async fn answer_cancel(&mut self, cancel: SipRequest) {
        info!("received CANCEL for call {} after final response", self.call_id);
        match ResponseBuilder::ok().build_for_request(&cancel) {
            Ok(okay) => self.send(okay.into()).await,
            Err(e) => error!("cannot answer CANCEL for call {}: {}", self.call_id, e),
        }
        self.cancel = Some(cancel);
    }

    pub async fn mtd_send_cancel_ok(&mut self) -> Result<SipState> {
        self.log_step("CANCEL OK");
        let cancel = self
            .cancel
            .as_ref()
            .ok_or_else(|| ControlError::Internal("no CANCEL on file".to_string()))?;
        let okay = ResponseBuilder::ok().build_for_request(cancel)?;
        self.send(okay.into()).await;
        self.state = SipState::Canceled;
        Ok(self.state)
    }

    // ---------------------------------------------------------------
    // Mobile-terminated call
    // ---------------------------------------------------------------

    pub async fn mtc_send_trying(&mut self) -> Result<SipState> {
        self.log_step("100 Trying");
        if self.invite.is_none() {
            self.failed_local();
        }
        if self.state == SipState::Fail {
            return Ok(self.state);
        }
        self.open().await;
        let trying = ResponseBuilder::trying().build_for_request(self.saved_invite()?)?;
        self.send(trying.into()).await;
        self.state = SipState::Proceeding;
        Ok(self.state)
    }

    pub async fn mtc_send_ringing(&mut self) -> Result<SipState> {
        self.log_step("180 Ringing");
        let ringing = ResponseBuilder::ringing()
            .to_tag(self.local_tag.clone())
            .header("Contact", self.contact())
            .build_for_request(self.saved_invite()?)?;
        self.send(ringing.into()).await;
        self.state = SipState::Proceeding;
        Ok(self.state)
    }

    /// Answer the INVITE with our SDP
    pub async fn mtc_send_ok(&mut self, rtp_port: u16, codec: u8) -> Result<SipState> {
        self.log_step("200 OK");
        self.saved_invite()?;
        metrics::incr(metrics::SIP_INVITE_OK_OUT);
        self.rtp_port = rtp_port;
        self.codec = codec;
        debug!("port={} codec={}", rtp_port, codec);

        let okay = ResponseBuilder::ok()
            .to_tag(self.local_tag.clone())
            .header("Contact", self.contact())
            .header("P-Access-Network-Info", self.params.access_network_info.clone())
            .header(
                "P-Preferred-Identity",
                format!("<sip:{}@{}>", self.sip_username, self.params.speech_proxy),
            )
            .body("application/sdp", self.sdp_body()?)
            .build_for_request(self.saved_invite()?)?;

        self.send(okay.into()).await;
        self.state = SipState::Connecting;
        Ok(self.state)
    }

    /// Wait (Timer H) for the ACK to our 200
    pub async fn mtc_check_for_ack(&mut self, lock: Option<&mut HeldLock>) -> SipState {
        self.log_step("check for ACK");
        let message = match self.read(self.params.timers.h, lock).await {
            Ok(message) => message,
            Err(TransportError::Timeout(_)) => {
                info!("timeout");
                metrics::incr(metrics::SIP_READ_TIMEOUT);
                self.state = SipState::Timeout;
                return self.state;
            }
            Err(e) => {
                info!("read error: {}", e);
                self.failed_local();
                return self.state;
            }
        };

        let SipMessage::Request(request) = message else {
            info!("SIP message with no method, status {:?}", message.status_code());
            self.failed_local();
            return self.state;
        };
        info!("received sip_method={}", request.method_name());
        match request.method() {
            Some(SipMethod::Invite) => info!("received duplicate INVITE"),
            Some(SipMethod::Ack) => {
                info!("received ACK");
                self.state = SipState::Active;
            }
            Some(SipMethod::Cancel) => {
                info!("received CANCEL");
                self.cancel = Some(request);
                self.state = SipState::MTDCanceling;
            }
            _ => {
                info!("unexpected Message {}", request.method_name());
                self.failed_local();
            }
        }
        self.state
    }

    /// Near non-blocking look for a CANCEL before the call is answered
    pub async fn mtc_check_for_cancel(&mut self) -> SipState {
        self.log_step("check for CANCEL");
        let message = match self.read(CANCEL_POLL, None).await {
            Ok(message) => message,
            Err(TransportError::Timeout(_)) => {
                metrics::incr(metrics::SIP_READ_TIMEOUT);
                return self.state;
            }
            Err(e) => {
                info!("read error: {}", e);
                self.failed_local();
                return self.state;
            }
        };

        let SipMessage::Request(request) = message else {
            info!("SIP message with no method, status {:?}", message.status_code());
            if self.state != SipState::Fail {
                self.failed_local();
            }
            return self.state;
        };
        info!("received sip_method={}", request.method_name());
        match request.method() {
            Some(SipMethod::Invite) => info!("received duplicate INVITE"),
            Some(SipMethod::Cancel) => {
                info!("received CANCEL");
                self.cancel = Some(request);
                self.state = SipState::MTDCanceling;
            }
            _ => {
                info!("unexpected Message {}", request.method_name());
                self.failed_local();
            }
        }
        self.state
    }

    // ---------------------------------------------------------------
    // Short messages
    // ---------------------------------------------------------------

    pub async fn mosms_send_message(
        &mut self,
        called_user: &str,
        called_domain: &str,
        text: &str,
        content_type: &str,
    ) -> Result<SipState> {
        info!(
            "SIP send to {}@{} MESSAGE {}",
            called_user, called_domain, text
        );
        self.open().await;
        self.instigator = true;
        metrics::incr(metrics::SIP_MESSAGE_OUT);

        self.via_branch = new_branch();
        self.cseq += 1;
        self.remote_username = called_user.to_string();
        self.remote_domain = called_domain.to_string();

        let uri = self.remote_uri();
        let dialog = DialogContext::outgoing(
            self.call_id.clone(),
            &self.local_uri(),
            &self.local_tag,
            &uri,
            self.cseq,
        );
        let message = self
            .request(SipMethod::Message, &uri, &dialog)
            .body(content_type, text)
            .build()?;

        self.send(message.clone().into()).await;
        self.save_invite(message, true);
        self.state = SipState::MessageSubmit;
        Ok(self.state)
    }

    /// Wait (Timer B) for the MESSAGE's final response, resending on each
    /// Timer A timeout until a 100 Trying arrives
    pub async fn mosms_wait_for_submit(
        &mut self,
        mut lock: Option<&mut HeldLock>,
    ) -> Result<SipState> {
        self.log_step("wait for submit");
        self.saved_invite()?;

        let timers = self.params.timers;
        let deadline = Deadline::after(timers.b);
        let mut trying = false;
        let mut finished = false;
        while !deadline.expired() {
            let message = match self.read(deadline.attempt(timers.a), lock.as_deref_mut()).await {
                Ok(message) => message,
                Err(TransportError::Timeout(_)) => {
                    if deadline.expired() {
                        break;
                    }
                    if trying {
                        info!(
                            "SIP MESSAGE packet to {} timed out; ignoring (got 100 TRYING)",
                            self.proxy_addr
                        );
                    } else {
                        info!("SIP MESSAGE packet to {} timed out; resending", self.proxy_addr);
                        self.resend(Retained::Invite).await;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("read failed on call {}: {}", self.call_id, e);
                    break;
                }
            };

            let Some(code) = message.status_code() else {
                warn!("ignoring request while waiting for MESSAGE response");
                continue;
            };
            match code {
                100 => {
                    trying = true;
                    info!("received TRYING MESSAGE");
                }
                200 | 202 => {
                    info!("successful SIP MESSAGE SMS submit to {}", self.proxy_addr);
                    self.state = SipState::Cleared;
                    finished = true;
                    break;
                }
                c if c >= 400 => {
                    error!("SIP MESSAGE rejected: {}", c);
                    metrics::record_remote_failure(metrics::status_class(c));
                    self.state = SipState::Fail;
                    finished = true;
                    break;
                }
                c => warn!("unhandled response {}", c),
            }
        }

        if !finished {
            error!(
                "SIP MESSAGE timed out; is the SMS server {} OK?",
                self.proxy_addr
            );
            metrics::incr(metrics::SIP_READ_TIMEOUT);
            self.lost_proxy();
            self.failed_local();
        }
        Ok(self.state)
    }

    /// Accept a mobile-terminated MESSAGE
    pub async fn mtsms_send_ok(&mut self) -> Result<SipState> {
        self.log_step("MESSAGE OK");
        let Some(invite) = self.invite.as_ref() else {
            info!("clearing locally generated transaction");
            self.state = SipState::Cleared;
            return Ok(self.state);
        };
        let okay = ResponseBuilder::ok()
            .to_tag(self.local_tag.clone())
            .header("P-Access-Network-Info", self.params.access_network_info.clone())
            .header(
                "P-Preferred-Identity",
                format!("<sip:{}@{}>", self.sip_username, self.params.speech_proxy),
            )
            .build_for_request(invite)?;
        self.send(okay.into()).await;
        self.state = SipState::Cleared;
        Ok(self.state)
    }

    /// Refuse a mobile-terminated MESSAGE; the transaction ends with the
    /// response
    pub async fn mtsms_send_error(&mut self, code: u16, reason: &str) -> Result<SipState> {
        self.mod_send_error(None, code, reason, false).await?;
        self.state = SipState::Cleared;
        Ok(self.state)
    }

    // ---------------------------------------------------------------
    // In-dialog helpers
    // ---------------------------------------------------------------

    /// RFC 2976 INFO carrying a keypress. True only on a 200.
    pub async fn send_info_and_wait_for_ok(
        &mut self,
        info: char,
        mut lock: Option<&mut HeldLock>,
    ) -> bool {
        self.log_step("INFO");
        let dialog = match self.current_dialog() {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!("cannot send INFO: {}", e);
                return false;
            }
        };
        self.via_branch = new_branch();
        self.cseq += 1;

        let uri = self.remote_uri();
        let body = format!("Signal={}\r\nDuration=200\r\n", info);
        let request = match self
            .request(SipMethod::Info, &uri, &dialog)
            .body("application/dtmf-relay", body)
            .build()
        {
            Ok(request) => SipMessage::from(request),
            Err(e) => {
                error!("cannot build INFO: {}", e);
                return false;
            }
        };
        self.send(request.clone()).await;

        let timers = self.params.timers;
        let deadline = Deadline::after(timers.f);
        let mut final_code = None;
        while !deadline.expired() {
            match self.read(deadline.attempt(timers.e), lock.as_deref_mut()).await {
                Ok(SipMessage::Response(response)) => {
                    let code = response.status_code();
                    debug!("received status {} {}", code, response.reason());
                    if code >= 200 {
                        final_code = Some(code);
                        break;
                    }
                }
                Ok(SipMessage::Request(other)) => {
                    debug!("ignoring {} while waiting for INFO response", other.method_name());
                }
                Err(TransportError::Timeout(_)) => {
                    if deadline.expired() {
                        break;
                    }
                    info!("SIP RFC-2976 INFO packet to {} timed out; resending", self.proxy_addr);
                    self.send(request.clone()).await;
                }
                Err(e) => {
                    warn!("read failed on call {}: {}", self.call_id, e);
                    break;
                }
            }
        }

        match final_code {
            None => {
                error!("SIP RFC-2976 INFO timed out; is the proxy at {} OK?", self.proxy_addr);
                metrics::incr(metrics::SIP_LOST_PROXY);
                false
            }
            Some(200) => true,
            Some(code) => {
                warn!("SIP RFC-2976 INFO failed on server {}: {}", self.proxy_addr, code);
                false
            }
        }
    }

    /// Same CSeq as the INVITE on file, i.e. a retransmission rather than a
    /// re-INVITE
    pub fn same_invite(&self, message: &SipMessage) -> bool {
        let Some(invite) = self.invite.as_ref() else {
            info!("no INVITE on file to compare");
            return false;
        };
        let (Some(a), Some(b)) = (message.cseq(), invite.cseq()) else {
            error!("no CSeq to compare");
            return false;
        };
        if a != b {
            info!("possible reinvite CSeq A {} CSeq B {}", a, b);
        }
        a == b
    }

    // ---------------------------------------------------------------
    // Media
    // ---------------------------------------------------------------

    /// Open RTP towards the address in the answer to our INVITE
    pub async fn moc_init_rtp(&mut self) -> Result<()> {
        let body = self
            .last_response
            .as_ref()
            .map(|r| r.body().to_vec())
            .ok_or_else(|| ControlError::Internal("no response on file".to_string()))?;
        self.init_rtp(&body).await
    }

    /// Open RTP towards the address in the INVITE we answered
    pub async fn mtc_init_rtp(&mut self) -> Result<()> {
        let body = self.saved_invite()?.body().to_vec();
        self.init_rtp(&body).await
    }

    async fn init_rtp(&mut self, body: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(body);
        let sdp = SdpSession::parse(&text)
            .ok_or_else(|| ControlError::UnsupportedMessage("unparsable SDP".to_string()))?;
        let remote = sdp
            .audio_destination()
            .ok_or_else(|| ControlError::UnsupportedMessage("SDP without audio".to_string()))?;

        let events = self.params.dtmf_payload_type.map(|configured| {
            sdp.telephone_event_payload().unwrap_or_else(|| {
                error!("RTP session does not support selected DTMF method RFC-2833");
                configured
            })
        });
        debug!("IP={} local port {}", remote, self.rtp_port);

        let transport = UdpRtpTransport::bind(self.rtp_port, remote, self.codec, events)
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        self.attach_media(Arc::new(transport));
        Ok(())
    }

    /// Use `transport` for this session's audio
    pub fn attach_media(&mut self, transport: Arc<dyn RtpTransport>) {
        self.media = Some(MediaSession::new(transport));
    }

    /// Send one vocoder frame. Dropped unless the call is active.
    pub async fn tx_frame(&mut self, frame: &[u8]) {
        if self.state != SipState::Active {
            return;
        }
        if let Some(media) = self.media.as_mut() {
            media.tx_frame(frame).await;
        }
    }

    /// Receive one vocoder frame, 0 bytes unless the call is active
    pub async fn rx_frame(&mut self, frame: &mut [u8]) -> usize {
        if self.state != SipState::Active {
            return 0;
        }
        match self.media.as_mut() {
            Some(media) => media.rx_frame(frame).await,
            None => 0,
        }
    }

    pub async fn start_dtmf(&mut self, key: char) -> bool {
        match self.media.as_mut() {
            Some(media) => media.start_dtmf(key).await,
            None => {
                warn!("no media session for DTMF on call {}", self.call_id);
                false
            }
        }
    }

    pub async fn stop_dtmf(&mut self) {
        if let Some(media) = self.media.as_mut() {
            media.stop_dtmf().await;
        }
    }
}
