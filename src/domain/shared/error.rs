//! Control-layer errors

use thiserror::Error;

/// Control-layer result type
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors surfaced by the call-control and mobility-management layers.
///
/// Timeouts on the SIP side never appear here: the engine converts them into
/// state transitions. What remains are conditions the enclosing transaction
/// controller has to map to a rejection or a channel release.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel read timed out")]
    ChannelReadTimeout,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Unexpected primitive: {0}")]
    UnexpectedPrimitive(String),

    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),

    #[error("Transaction already removed: {0}")]
    RemovedTransaction(String),

    #[error("Registration timed out: {0}")]
    RegistrationTimeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Peer protocol violations are fatal to the current transaction.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ControlError::UnexpectedMessage(_)
                | ControlError::UnexpectedPrimitive(_)
                | ControlError::UnsupportedMessage(_)
        )
    }
}
