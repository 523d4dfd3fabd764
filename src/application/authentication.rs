//! Authentication ceremony
//!
//! Challenge the handset with the RAND from the registrar, have the
//! registrar verify the SRES, then switch the channel to ciphering with the
//! Kc the registrar furnished.

use crate::domain::auth::AuthenticationParameters;
use crate::domain::shared::{ControlError, Result};
use crate::domain::subscriber::{RegisterMode, RegistrationService};
use crate::infrastructure::protocols::gsm::{exchange, get_message, L3Message, LogicalChannel};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A5/1
const CIPHER_ALGORITHM: u8 = 1;

/// A missing reply counts as the wrong reply
fn absent_as_unexpected(expected: &'static str) -> impl FnOnce(ControlError) -> ControlError {
    move |e| match e {
        ControlError::ChannelReadTimeout => {
            ControlError::UnexpectedMessage(format!("no {} from handset", expected))
        }
        other => other,
    }
}

pub struct AuthenticationCeremony {
    registration: Arc<dyn RegistrationService>,
    message_timeout: Duration,
}

impl AuthenticationCeremony {
    pub fn new(registration: Arc<dyn RegistrationService>, message_timeout: Duration) -> Self {
        Self {
            registration,
            message_timeout,
        }
    }

    /// Run the ceremony on `channel`.
    ///
    /// `Ok(false)` covers every missing precondition and a failed
    /// verification. A handset that answers with anything else, or not at
    /// all, is `UnexpectedMessage`. A registrar timeout propagates.
    pub async fn authenticate(
        &self,
        params: &mut AuthenticationParameters,
        channel: &dyn LogicalChannel,
    ) -> Result<bool> {
        let Some(rand) = params.rand().copied() else {
            warn!("no RAND for {}, cannot authenticate", params.mobile_id());
            return Ok(false);
        };

        let sres = exchange(
            channel,
            L3Message::AuthenticationRequest {
                cksn: params.cksn(),
                rand,
            },
            self.message_timeout,
            |reply| match reply {
                L3Message::AuthenticationResponse { sres } => Ok(sres),
                other => Err(other),
            },
        )
        .await
        .map_err(absent_as_unexpected("AuthenticationResponse"))?;
        params.set_sres(sres);
        debug!("{} SRES {:08x}", params.mobile_id(), sres);

        if !self
            .registration
            .register(RegisterMode::Register, params)
            .await?
        {
            info!("SRES verification failed for {}", params.mobile_id());
            return Ok(false);
        }

        let Some(kc) = params.kc_hex() else {
            warn!("registrar furnished no Kc for {}", params.mobile_id());
            return Ok(false);
        };
        channel.set_kc(&kc);

        channel
            .send(L3Message::CipheringModeCommand {
                algorithm: CIPHER_ALGORITHM,
            })
            .await;
        channel.activate_decryption();
        match get_message(channel, self.message_timeout)
            .await
            .map_err(absent_as_unexpected("CipheringModeComplete"))?
        {
            L3Message::CipheringModeComplete => {}
            other => {
                warn!("Unexpected message {}", other);
                return Err(ControlError::UnexpectedMessage(other.to_string()));
            }
        }
        channel.activate_encryption();
        params.set_a5(CIPHER_ALGORITHM);
        info!(
            "{} ciphering A5/{} on {}",
            params.mobile_id(),
            params.a5(),
            channel.description()
        );
        Ok(true)
    }
}
