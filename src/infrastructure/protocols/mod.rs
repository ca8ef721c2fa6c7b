//! Protocol implementations
//!
//! - `room`: room service join/leave over HTTP
//! - `relay`: the signaling channel and its transports
//! - `webrtc`: media engine adapter

pub mod relay;
pub mod room;
pub mod webrtc;
