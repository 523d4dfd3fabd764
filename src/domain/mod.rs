//! Domain layer - Core types and ports
//!
//! This layer contains:
//! - Value objects: call ids, mobile identities, location areas
//! - Authentication parameters for one MM transaction
//! - Ports for the registrar, subscriber registry and TMSI table

pub mod auth;
pub mod shared;
pub mod subscriber;

// Re-export commonly used types
pub use shared::{ControlError, Result};
