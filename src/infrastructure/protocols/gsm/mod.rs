//! GSM Layer 3 boundary
//!
//! Decoded MM messages, the logical channel port and the call control
//! timer family.

pub mod channel;
pub mod l3;
pub mod timers;

pub use channel::{exchange, get_message, LogicalChannel};
pub use l3::{cause, Classmark, L3Frame, L3Message, Primitive};
pub use timers::{GsmTimer, GsmTimers};
