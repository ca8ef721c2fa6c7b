//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Protocol implementations (room service, relay, WebRTC)
//! - Retry policy
//! - Metric names

pub mod metrics;
pub mod protocols;
pub mod retry;
