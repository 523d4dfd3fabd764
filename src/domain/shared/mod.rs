//! Shared kernel - identifiers and errors used by both protocol sides

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::ControlError;
pub use result::Result;
pub use value_objects::*;
