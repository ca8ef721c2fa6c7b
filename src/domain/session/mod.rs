//! Session bounded context
//!
//! Registration outcome, lifecycle states and the events the UI observes.

pub mod aggregate;
pub mod event;
pub mod value_object;

pub use aggregate::RoomSession;
pub use event::StateChange;
pub use value_object::{CloseReason, FailureReason, IceServer, PeerRole, SessionState};
