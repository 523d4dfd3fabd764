//! Mobility management transactions
//!
//! Location updating and IMSI detach, each driven to completion on the
//! handset's dedicated channel. Registration goes to the SIP registrar;
//! everything the network learns about the handset lands in the TMSI table
//! and the subscriber registry.

use super::authentication::AuthenticationCeremony;
use crate::config::{Config, ConfigValidationError, LurConfig};
use crate::domain::auth::AuthenticationParameters;
use crate::domain::shared::{ControlError, IdentityType, LocationAreaId, MobileIdentity, Result};
use crate::domain::subscriber::{
    LocationRequester, RegisterMode, RegistrationService, SmsDelivery, SubscriberRegistry,
    TmsiTable,
};
use crate::infrastructure::metrics;
use crate::infrastructure::protocols::gsm::{
    cause, exchange, GsmTimers, L3Frame, L3Message, LogicalChannel, Primitive,
};
use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long the handset gets to confirm a TMSI reallocation
const TMSI_REALLOCATION_WAIT: Duration = Duration::from_millis(1000);

const DEFAULT_OPEN_REGISTRATION_MESSAGE: &str = "Welcome to the test network.  Your IMSI is ";

/// Collaborators a mobility controller talks to
#[derive(Clone)]
pub struct MobilityPorts {
    pub registration: Arc<dyn RegistrationService>,
    pub registry: Arc<dyn SubscriberRegistry>,
    pub tmsis: Arc<dyn TmsiTable>,
    pub sms: Arc<dyn SmsDelivery>,
    pub location: Arc<dyn LocationRequester>,
}

/// What the registrar made of a REGISTER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Registered,
    Refused,
    /// The transaction has already been rejected and released
    TimedOut,
}

pub struct MobilityController {
    ports: MobilityPorts,
    ceremony: AuthenticationCeremony,
    lur: LurConfig,
    allow: Option<Regex>,
    deny: Option<Regex>,
    lai: LocationAreaId,
    short_name: Option<String>,
    encryption: bool,
    message_timeout: Duration,
    timers: GsmTimers,
}

impl MobilityController {
    pub fn new(config: &Config, ports: MobilityPorts) -> std::result::Result<Self, ConfigValidationError> {
        let (allow, deny) = config.lur.open_registration_patterns()?;
        let message_timeout = Duration::from_millis(config.gsm.message_timeout_ms);
        Ok(Self {
            ceremony: AuthenticationCeremony::new(ports.registration.clone(), message_timeout),
            ports,
            lur: config.lur.clone(),
            allow,
            deny,
            lai: LocationAreaId::new(config.gsm.mcc.clone(), config.gsm.mnc.clone(), config.gsm.lac),
            short_name: config.gsm.short_name.clone(),
            encryption: config.gsm.encryption,
            message_timeout,
            timers: GsmTimers::from(&config.gsm.timers),
        })
    }

    /// Call control timers for transactions started on channels this
    /// controller admitted
    pub fn timers(&self) -> &GsmTimers {
        &self.timers
    }

    pub fn lai(&self) -> &LocationAreaId {
        &self.lai
    }

    /// Run the MM transaction that `message` opens.
    ///
    /// Errors never escape: a failed transaction ends in a channel release.
    pub async fn dispatch(&self, message: L3Message, channel: &dyn LogicalChannel) {
        debug!("{} {}", channel.description(), message);
        let result = match message {
            L3Message::LocationUpdatingRequest { mobile_id, lai } => {
                self.location_update(mobile_id, lai, channel).await
            }
            L3Message::ImsiDetachIndication { mobile_id } => {
                self.imsi_detach(mobile_id, channel).await;
                Ok(())
            }
            L3Message::CmServiceRequest { service_type, mobile_id } => {
                info!(
                    "rejecting CM service type {} for {}",
                    service_type, mobile_id
                );
                channel
                    .send(L3Message::CmServiceReject {
                        cause: cause::SERVICE_OPTION_NOT_SUPPORTED,
                    })
                    .await;
                channel.send(L3Message::ChannelRelease).await;
                Ok(())
            }
            other => Err(ControlError::UnsupportedMessage(other.to_string())),
        };

        if let Err(e) = result {
            if e.is_protocol_violation() {
                warn!("{} transaction aborted: {}", channel.description(), e);
            } else {
                error!("{} transaction failed: {}", channel.description(), e);
            }
            channel.send(L3Message::ChannelRelease).await;
        }
    }

    /// Location updating, from the request to the channel release
    pub async fn location_update(
        &self,
        mut mobile_id: MobileIdentity,
        lur_lai: LocationAreaId,
        channel: &dyn LogicalChannel,
    ) -> Result<()> {
        metrics::incr(metrics::GSM_LUR_START);
        info!("LUR {} from {} on {}", mobile_id, lur_lai, channel.description());

        let same_lai = lur_lai == self.lai;
        if !same_lai {
            info!("LUR {} from foreign LAI {}", mobile_id, lur_lai);
        }

        let preexisting = self.resolve_imsi(same_lai, &mut mobile_id, channel).await?;
        let imsi = mobile_id
            .imsi()
            .ok_or_else(|| ControlError::UnexpectedMessage(format!("no IMSI for {}", mobile_id)))?
            .to_string();
        let imsi_attach = preexisting.is_none();
        let new_tmsi = match preexisting {
            Some(_) => None,
            None => Some(self.ports.tmsis.assign(&imsi).await),
        };

        let mut params = AuthenticationParameters::new(mobile_id.clone());
        let mut success = match self.register_imsi(&mut params, channel).await {
            Verdict::Registered => true,
            Verdict::Refused => false,
            Verdict::TimedOut => return Ok(()),
        };
        if success && self.encryption {
            success = match self.ceremony.authenticate(&mut params, channel).await {
                Ok(authenticated) => authenticated,
                Err(ControlError::RegistrationTimeout(registrar)) => {
                    self.registration_timed_out(&registrar, channel).await;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
        }

        let open_registration = self.open_registration(&imsi);

        if self.lur.query_imei {
            self.query_imei(&imsi, channel).await?;
        }
        if imsi_attach && self.lur.query_classmark {
            self.query_classmark(&imsi, channel).await?;
        }

        if !success && !open_registration {
            info!("LUR UNPROVISIONED, rejecting {}", mobile_id);
            channel
                .send(L3Message::LocationUpdatingReject {
                    cause: self.lur.unprovisioned_reject_cause,
                })
                .await;
            if preexisting.is_none() {
                self.send_welcome_message(
                    self.lur.failed_registration_message.as_deref(),
                    &self.lur.failed_registration_short_code,
                    &imsi,
                    channel,
                )
                .await;
            }
            channel.send(L3Message::ChannelRelease).await;
            return Ok(());
        }

        if success {
            info!("LUR SUCCESS {}", mobile_id);
        } else {
            info!("LUR ALLOWED {}", mobile_id);
        }

        if imsi_attach {
            if let Some(short_name) = &self.short_name {
                channel
                    .send(L3Message::MmInformation {
                        short_name: short_name.clone(),
                    })
                    .await;
            }
        }

        match new_tmsi.filter(|_| self.lur.send_tmsis) {
            None => {
                channel
                    .send(L3Message::LocationUpdatingAccept {
                        lai: self.lai.clone(),
                        tmsi: None,
                    })
                    .await;
            }
            Some(tmsi) => {
                channel
                    .send(L3Message::LocationUpdatingAccept {
                        lai: self.lai.clone(),
                        tmsi: Some(tmsi),
                    })
                    .await;
                match channel.recv(TMSI_REALLOCATION_WAIT).await {
                    Some(L3Frame::Message(L3Message::TmsiReallocationComplete)) => {
                        debug!("{} confirmed TMSI {:08x}", mobile_id, tmsi);
                    }
                    Some(other) => warn!("{} answered TMSI reallocation with {:?}", mobile_id, other),
                    None => warn!("no TMSI reallocation complete from {}", mobile_id),
                }
            }
        }

        if self.lur.query_rrlp
            && !self
                .ports
                .location
                .request_location(&mobile_id, channel)
                .await
        {
            info!("RRLP location request failed for {}", mobile_id);
        }

        if imsi_attach {
            if success {
                self.send_welcome_message(
                    self.lur.normal_registration_message.as_deref(),
                    &self.lur.normal_registration_short_code,
                    &imsi,
                    channel,
                )
                .await;
            } else {
                let template = self
                    .lur
                    .open_registration_message
                    .as_deref()
                    .unwrap_or(DEFAULT_OPEN_REGISTRATION_MESSAGE);
                self.send_welcome_message(
                    Some(template),
                    &self.lur.open_registration_short_code,
                    &imsi,
                    channel,
                )
                .await;
            }
        }

        channel.send(L3Message::ChannelRelease).await;
        Ok(())
    }

    /// Best-effort unregister, then release the channel twice
    pub async fn imsi_detach(&self, mobile_id: MobileIdentity, channel: &dyn LogicalChannel) {
        info!("IMSI DETACH {} on {}", mobile_id, channel.description());
        if mobile_id.imsi().is_some() {
            let mut params = AuthenticationParameters::new(mobile_id.clone());
            match self
                .ports
                .registration
                .register(RegisterMode::Unregister, &mut params)
                .await
            {
                Ok(true) => debug!("{} unregistered", mobile_id),
                Ok(false) => info!("registrar refused to unregister {}", mobile_id),
                Err(e) => warn!("unregister {} failed: {}", mobile_id, e),
            }
        } else {
            debug!("detach by {}, nothing to unregister", mobile_id.identity_type());
        }

        channel.send(L3Message::ChannelRelease).await;
        // Many handsets never finish the graceful release
        channel.send_primitive(Primitive::HardRelease).await;
    }

    /// Settle the handset's IMSI.
    ///
    /// Returns the TMSI already on file, rewriting a known TMSI identity to
    /// its IMSI. An unknown TMSI is resolved with an identity request, in
    /// which case the subscriber counts as new.
    pub async fn resolve_imsi(
        &self,
        same_lai: bool,
        mobile_id: &mut MobileIdentity,
        channel: &dyn LogicalChannel,
    ) -> Result<Option<u32>> {
        match mobile_id {
            MobileIdentity::Imsi(imsi) => return Ok(self.ports.tmsis.tmsi_for(imsi).await),
            MobileIdentity::Imei(_) | MobileIdentity::Imeisv(_) => {
                return Err(ControlError::UnexpectedMessage(format!(
                    "LUR with {}",
                    mobile_id
                )));
            }
            MobileIdentity::Tmsi(tmsi) => {
                let tmsi = *tmsi;
                if same_lai {
                    if let Some(imsi) = self.ports.tmsis.imsi_for(tmsi).await {
                        debug!("TMSI {:08x} is IMSI {}", tmsi, imsi);
                        *mobile_id = MobileIdentity::Imsi(imsi);
                        return Ok(Some(tmsi));
                    }
                }
            }
        }

        let identity = exchange(
            channel,
            L3Message::IdentityRequest(IdentityType::Imsi),
            self.message_timeout,
            |reply| match reply {
                L3Message::IdentityResponse(id @ MobileIdentity::Imsi(_)) => Ok(id),
                other => Err(other),
            },
        )
        .await?;
        debug!("{} identified as {}", mobile_id, identity);
        *mobile_id = identity;
        Ok(None)
    }

    async fn register_imsi(
        &self,
        params: &mut AuthenticationParameters,
        channel: &dyn LogicalChannel,
    ) -> Verdict {
        match self
            .ports
            .registration
            .register(RegisterMode::Register, params)
            .await
        {
            Ok(true) => Verdict::Registered,
            Ok(false) => Verdict::Refused,
            Err(ControlError::RegistrationTimeout(registrar)) => {
                self.registration_timed_out(&registrar, channel).await;
                Verdict::TimedOut
            }
            Err(e) => {
                error!("registration of {} failed: {}", params.mobile_id(), e);
                Verdict::Refused
            }
        }
    }

    async fn registration_timed_out(&self, registrar: &str, channel: &dyn LogicalChannel) {
        error!("registration timed out; is the registrar {} OK?", registrar);
        channel
            .send(L3Message::LocationUpdatingReject {
                cause: cause::NETWORK_FAILURE,
            })
            .await;
        metrics::incr(metrics::GSM_LUR_TIMEOUT);
        tokio::time::sleep(Duration::from_millis(self.lur.timeout_release_delay_ms)).await;
        channel.send(L3Message::ChannelRelease).await;
    }

    fn open_registration(&self, imsi: &str) -> bool {
        let allowed = self.allow.as_ref().is_some_and(|allow| allow.is_match(imsi));
        let denied = self.deny.as_ref().is_some_and(|deny| deny.is_match(imsi));
        allowed && !denied
    }

    async fn query_imei(&self, imsi: &str, channel: &dyn LogicalChannel) -> Result<()> {
        let identity = exchange(
            channel,
            L3Message::IdentityRequest(IdentityType::Imei),
            self.message_timeout,
            |reply| match reply {
                L3Message::IdentityResponse(
                    id @ (MobileIdentity::Imei(_) | MobileIdentity::Imeisv(_)),
                ) => Ok(id),
                other => Err(other),
            },
        )
        .await?;
        let imei = identity.digits();
        if !self.ports.tmsis.set_imei(imsi, &imei).await {
            warn!("cannot store IMEI {} for IMSI {}", imei, imsi);
        }

        let key = format!("IMSI{}", imsi);
        let previous = self
            .ports
            .registry
            .lookup(&key, "hardware")
            .await
            .unwrap_or_default();
        if previous != imei && !imei.is_empty() {
            info!("{} changed hardware from {:?} to {}", key, previous, imei);
            if !self.ports.registry.update(&key, "RRLPSupported", "1").await {
                warn!("cannot reset RRLPSupported for {}", key);
            }
            if !self.ports.registry.update(&key, "hardware", &imei).await {
                warn!("cannot store hardware for {}", key);
            }
        }
        Ok(())
    }

    async fn query_classmark(&self, imsi: &str, channel: &dyn LogicalChannel) -> Result<()> {
        let classmark = exchange(
            channel,
            L3Message::ClassmarkEnquiry,
            self.message_timeout,
            |reply| match reply {
                L3Message::ClassmarkChange(classmark) => Ok(classmark),
                other => Err(other),
            },
        )
        .await?;
        debug!("IMSI {} classmark {}", imsi, classmark);
        if !self.ports.tmsis.set_classmark(imsi, classmark).await {
            warn!("cannot store classmark for IMSI {}", imsi);
        }
        Ok(())
    }

    /// Text the handset from `short_code`. False when no template is set or
    /// delivery failed.
    async fn send_welcome_message(
        &self,
        template: Option<&str>,
        short_code: &str,
        imsi: &str,
        channel: &dyn LogicalChannel,
    ) -> bool {
        let Some(template) = template else {
            return false;
        };
        let body = format!("{} IMSI:{}", template, imsi);
        let reference = rand::thread_rng().gen_range(0..7);
        match self
            .ports
            .sms
            .deliver(short_code, &body, "text/plain", reference, channel)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("welcome message to {} failed: {}", imsi, e);
                false
            }
        }
    }
}
