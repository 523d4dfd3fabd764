//! Logical channel boundary
//!
//! A dedicated control channel to one handset. Framing, LAPDm and radio
//! timing live behind this trait.

use super::l3::{L3Frame, L3Message, Primitive};
use crate::domain::shared::{ControlError, Result};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait::async_trait]
pub trait LogicalChannel: Send + Sync {
    async fn send(&self, message: L3Message);

    async fn send_primitive(&self, primitive: Primitive);

    /// Next frame, or `None` when nothing arrived within `timeout`
    async fn recv(&self, timeout: Duration) -> Option<L3Frame>;

    /// Install the A5 ciphering key, 16 hex characters
    fn set_kc(&self, kc: &str);

    fn activate_decryption(&self);

    fn activate_encryption(&self);

    /// Channel type for log lines, e.g. "SDCCH"
    fn description(&self) -> String;
}

/// Wait for the next decoded message on a channel.
///
/// Anything other than a message is fatal to the caller's transaction.
pub async fn get_message(channel: &dyn LogicalChannel, timeout: Duration) -> Result<L3Message> {
    match channel.recv(timeout).await {
        None => {
            debug!("{} read timed out after {:?}", channel.description(), timeout);
            Err(ControlError::ChannelReadTimeout)
        }
        Some(L3Frame::Primitive(primitive)) => {
            warn!("{} unexpected primitive {}", channel.description(), primitive);
            Err(ControlError::UnexpectedPrimitive(primitive.to_string()))
        }
        Some(L3Frame::Unsupported(what)) => {
            warn!("{} unsupported message {}", channel.description(), what);
            Err(ControlError::UnsupportedMessage(what))
        }
        Some(L3Frame::Message(message)) => Ok(message),
    }
}

/// Send `request` and wait for a reply that `pick` accepts.
///
/// `pick` hands back the message it rejects, which becomes the
/// `UnexpectedMessage` detail.
pub async fn exchange<T, F>(
    channel: &dyn LogicalChannel,
    request: L3Message,
    timeout: Duration,
    pick: F,
) -> Result<T>
where
    F: FnOnce(L3Message) -> std::result::Result<T, L3Message> + Send,
{
    channel.send(request).await;
    let reply = get_message(channel, timeout).await?;
    pick(reply).map_err(|other| {
        warn!("Unexpected message {}", other);
        ControlError::UnexpectedMessage(other.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::{IdentityType, MobileIdentity};
    use crate::testing::ScriptedChannel;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_get_message_maps_frames() {
        let channel = ScriptedChannel::new(vec![
            Some(L3Frame::Primitive(Primitive::Release)),
            Some(L3Frame::Unsupported("0x05 0x99".to_string())),
            None,
            Some(L3Message::CipheringModeComplete.into()),
        ]);

        assert!(matches!(
            get_message(&channel, WAIT).await,
            Err(ControlError::UnexpectedPrimitive(_))
        ));
        assert!(matches!(
            get_message(&channel, WAIT).await,
            Err(ControlError::UnsupportedMessage(_))
        ));
        assert_eq!(
            get_message(&channel, WAIT).await,
            Err(ControlError::ChannelReadTimeout)
        );
        assert_eq!(
            get_message(&channel, WAIT).await,
            Ok(L3Message::CipheringModeComplete)
        );
    }

    #[tokio::test]
    async fn test_exchange_rejects_wrong_reply() {
        let channel = ScriptedChannel::new(vec![Some(L3Message::TmsiReallocationComplete.into())]);
        let result = exchange(
            &channel,
            L3Message::IdentityRequest(IdentityType::Imei),
            WAIT,
            |reply| match reply {
                L3Message::IdentityResponse(id) => Ok(id),
                other => Err(other),
            },
        )
        .await;

        assert!(matches!(result, Err(ControlError::UnexpectedMessage(_))));
        assert_eq!(
            channel.sent(),
            vec![L3Message::IdentityRequest(IdentityType::Imei)]
        );
    }

    #[tokio::test]
    async fn test_exchange_returns_picked_value() {
        let imei = MobileIdentity::Imei("356938035643809".to_string());
        let channel = ScriptedChannel::new(vec![Some(L3Message::IdentityResponse(imei.clone()).into())]);
        let got = exchange(
            &channel,
            L3Message::IdentityRequest(IdentityType::Imei),
            WAIT,
            |reply| match reply {
                L3Message::IdentityResponse(id) => Ok(id),
                other => Err(other),
            },
        )
        .await
        .unwrap();
        assert_eq!(got, imei);
    }
}
