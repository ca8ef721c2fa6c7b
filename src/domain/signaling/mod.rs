//! Signaling bounded context - messages and their relay wire format

pub mod frame;
pub mod message;
pub mod sink;

pub use frame::{Frame, FrameKind, RegisterPayload};
pub use message::{IceCandidate, SdpKind, SignalingMessage};
pub use sink::SignalSink;
