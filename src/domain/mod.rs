//! Domain layer - Core call model
//!
//! This layer contains:
//! - Value Objects: room/client/session identifiers, roles, states
//! - Aggregates: the registered room session
//! - Signaling messages and their wire frames
//! - The media engine port the session drives
//! - Domain Events: state changes published to the UI

pub mod media;
pub mod session;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{CallError, Result};
