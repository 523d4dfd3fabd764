//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Protocol implementations (SIP, GSM Layer 3 boundary)
//! - RTP media transport
//! - Metrics

pub mod media;
pub mod metrics;
pub mod protocols;
