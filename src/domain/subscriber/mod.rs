//! Subscriber-side ports
//!
//! The registrar, subscriber registry, TMSI table, SMS delivery and RRLP
//! location requests are all collaborators owned by someone else. Mobility
//! management only sees these traits.

pub mod registry;
pub mod tmsi;

use crate::domain::auth::AuthenticationParameters;
use crate::domain::shared::{MobileIdentity, Result};
use crate::infrastructure::protocols::gsm::{Classmark, LogicalChannel};
use std::fmt;

pub use registry::InMemorySubscriberRegistry;
pub use tmsi::InMemoryTmsiTable;

/// REGISTER with a positive expiry, or with Expires: 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    Register,
    Unregister,
}

impl fmt::Display for RegisterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterMode::Register => write!(f, "register"),
            RegisterMode::Unregister => write!(f, "unregister"),
        }
    }
}

/// Network registration of a subscriber.
///
/// `Ok(false)` is a rejection. A registrar that never answers yields
/// `ControlError::RegistrationTimeout`. The service may fill in RAND or Kc
/// on `params` from what the registrar sent back.
#[async_trait::async_trait]
pub trait RegistrationService: Send + Sync {
    async fn register(
        &self,
        mode: RegisterMode,
        params: &mut AuthenticationParameters,
    ) -> Result<bool>;
}

/// Key/value subscriber registry
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SubscriberRegistry: Send + Sync {
    async fn lookup(&self, key: &str, field: &str) -> Option<String>;

    /// True when the field was written
    async fn update(&self, key: &str, field: &str, value: &str) -> bool;
}

/// IMSI/TMSI mapping plus what we learn about each handset
#[async_trait::async_trait]
pub trait TmsiTable: Send + Sync {
    async fn tmsi_for(&self, imsi: &str) -> Option<u32>;

    async fn imsi_for(&self, tmsi: u32) -> Option<String>;

    /// Allocate a fresh TMSI for `imsi`, replacing any previous one
    async fn assign(&self, imsi: &str) -> u32;

    async fn set_imei(&self, imsi: &str, imei: &str) -> bool;

    async fn set_classmark(&self, imsi: &str, classmark: Classmark) -> bool;
}

/// Mobile-terminated short message delivery over an open channel
#[async_trait::async_trait]
pub trait SmsDelivery: Send + Sync {
    async fn deliver(
        &self,
        from: &str,
        body: &str,
        content_type: &str,
        reference: u8,
        channel: &dyn LogicalChannel,
    ) -> Result<()>;
}

/// RRLP location request towards a handset
#[async_trait::async_trait]
pub trait LocationRequester: Send + Sync {
    async fn request_location(
        &self,
        mobile_id: &MobileIdentity,
        channel: &dyn LogicalChannel,
    ) -> bool;
}
