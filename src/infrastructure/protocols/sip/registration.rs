//! Registrar adapter for mobility management

use super::engine::{EngineParams, SipEngine};
use super::transport::MessageTransport;
use crate::domain::auth::AuthenticationParameters;
use crate::domain::shared::{ControlError, Result};
use crate::domain::subscriber::{RegisterMode, RegistrationService};
use std::sync::Arc;
use tracing::debug;

/// Registers subscribers with the SIP registrar, one fresh engine (and call
/// id) per REGISTER
pub struct SipRegistrationService {
    transport: Arc<dyn MessageTransport>,
    params: Arc<EngineParams>,
    registrar: String,
}

impl SipRegistrationService {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        params: Arc<EngineParams>,
        registrar: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            params,
            registrar: registrar.into(),
        }
    }
}

#[async_trait::async_trait]
impl RegistrationService for SipRegistrationService {
    async fn register(
        &self,
        mode: RegisterMode,
        params: &mut AuthenticationParameters,
    ) -> Result<bool> {
        let imsi = params
            .mobile_id()
            .imsi()
            .ok_or_else(|| {
                ControlError::InvalidParameter(format!(
                    "cannot {} {}",
                    mode,
                    params.mobile_id()
                ))
            })?
            .to_string();
        debug!("{} {} with {}", mode, imsi, self.registrar);

        let mut engine = SipEngine::new(self.transport.clone(), self.params.clone(), &self.registrar)
            .await?
            .for_subscriber(&imsi);
        engine.register(mode, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::MobileIdentity;
    use crate::infrastructure::protocols::sip::message::SipMethod;
    use crate::testing::LoopbackTransport;

    #[tokio::test]
    async fn test_rejects_non_imsi_identity() {
        let transport = Arc::new(LoopbackTransport::new());
        let service = SipRegistrationService::new(
            transport.clone(),
            Arc::new(EngineParams::default()),
            "127.0.0.1:5064",
        );
        let mut params = AuthenticationParameters::new(MobileIdentity::Tmsi(7));

        let result = service.register(RegisterMode::Register, &mut params).await;
        assert!(matches!(result, Err(ControlError::InvalidParameter(_))));
        assert_eq!(transport.count(SipMethod::Register), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_register_uses_a_fresh_call_id() {
        let transport = Arc::new(LoopbackTransport::new());
        let service = SipRegistrationService::new(
            transport.clone(),
            Arc::new(EngineParams::default()),
            "127.0.0.1:5064",
        );
        let mut params =
            AuthenticationParameters::new(MobileIdentity::Imsi("001010000000001".to_string()));

        for _ in 0..2 {
            let result = service.register(RegisterMode::Register, &mut params).await;
            assert!(matches!(result, Err(ControlError::RegistrationTimeout(_))));
        }

        let mut call_ids: Vec<String> = transport
            .written()
            .iter()
            .filter_map(|m| m.call_id())
            .collect();
        call_ids.dedup();
        assert_eq!(call_ids.len(), 2);
    }
}
