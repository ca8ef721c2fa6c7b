//! Rendezvous - two-party call session client
//!
//! Joins a room through the room service, exchanges offer/answer and
//! connectivity candidates with the remote peer over a relay channel that
//! survives reconnects, and reports the call lifecycle as a stream of state
//! changes.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::{CallError, ErrorKind};
pub use domain::shared::result::Result;
pub use interface::{start_call, CallHandle, StateChanges};
