//! Protocol implementations

pub mod gsm;
pub mod sip;
