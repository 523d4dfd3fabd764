//! sipbridge - GSM mobility and SIP call control for a radio access node
//!
//! Handsets on the radio side are registered with a SIP registrar and their
//! calls and short messages carried as SIP dialogs. This crate holds the
//! per-call SIP session engine, the RTP media adapter, the authentication
//! ceremony and the location updating controller.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use domain::shared::error::ControlError;
pub use domain::shared::result::Result;
