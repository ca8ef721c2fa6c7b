//! Relay signaling channel
//!
//! The channel logic is transport agnostic; transports plug in through
//! [`RelayConnector`].

pub mod channel;
pub mod connector;
pub mod error;
pub mod memory;
pub mod websocket;

pub use channel::{Ack, AckHandle, ChannelConfig, ChannelEvent, ConnectionEvent, SignalingChannel};
pub use connector::{FrameSink, FrameStream, RelayConnection, RelayConnector};
pub use error::ChannelError;
pub use memory::MemoryRelay;
pub use websocket::WebSocketConnector;
