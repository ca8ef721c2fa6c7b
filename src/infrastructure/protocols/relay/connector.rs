//! Relay transport seam

use super::error::ChannelError;
use crate::domain::session::RoomSession;
use crate::domain::signaling::Frame;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// One live connection to the relay, split into its two directions
pub struct RelayConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens relay connections; called again for every reconnect
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, session: &RoomSession) -> Result<RelayConnection, ChannelError>;
}
