//! SIP side of the bridge
//!
//! ```text
//! ┌─────────────────────────┐
//! │   SipEngine             │  one per call / SMS / REGISTER
//! └───────────┬─────────────┘
//!             │  builder, dialog, sdp, timers
//! ┌───────────▼─────────────┐
//! │   MessageTransport      │  per-Call-ID FIFOs
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │   UDP socket            │
//! └─────────────────────────┘
//! ```

pub mod builder;
pub mod call_state;
pub mod dialog;
pub mod engine;
pub mod message;
pub mod registration;
pub mod sdp;
pub mod timers;
pub mod transport;

pub use builder::{RequestBuilder, ResponseBuilder};
pub use call_state::SipState;
pub use dialog::DialogContext;
pub use engine::{EngineParams, SipEngine, DEFAULT_CODEC};
pub use message::{SipError, SipMessage, SipMethod, SipRequest, SipResponse};
pub use registration::SipRegistrationService;
pub use sdp::SdpSession;
pub use timers::{Deadline, SipTimers};
pub use transport::{
    CallTable, HeldLock, IncomingMessage, MessageTransport, TransportError, UdpTransport,
};
