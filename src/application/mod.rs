//! Application layer - MM transactions on a dedicated channel
//!
//! The authentication ceremony and the location updating / IMSI detach
//! controller, which sit between the GSM channel port and the subscriber
//! ports, and the refusal of SIP requests for handsets not on a channel.

pub mod authentication;
pub mod inbound;
pub mod mobility;

pub use authentication::AuthenticationCeremony;
pub use inbound::{claim_new_call, refuse_unattached};
pub use mobility::{MobilityController, MobilityPorts};
