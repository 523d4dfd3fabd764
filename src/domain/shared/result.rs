//! Control-layer result type

use super::error::ControlError;

/// Standard result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
