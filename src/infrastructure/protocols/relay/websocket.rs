//! WebSocket relay transport
//!
//! Frames travel as JSON text messages. The relay URL handed out by the room
//! service wins over the configured one.

use super::connector::{RelayConnection, RelayConnector};
use super::error::ChannelError;
use crate::domain::session::RoomSession;
use crate::domain::signaling::Frame;
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

pub struct WebSocketConnector {
    default_url: String,
}

impl WebSocketConnector {
    pub fn new(default_url: impl Into<String>) -> Self {
        Self {
            default_url: default_url.into(),
        }
    }

    pub fn url_for<'a>(&'a self, session: &'a RoomSession) -> &'a str {
        session.relay_url().unwrap_or(&self.default_url)
    }
}

fn encode(frame: Frame) -> Result<Message, ChannelError> {
    frame
        .encode()
        .map(Message::Text)
        .map_err(|e| ChannelError::Protocol(e.to_string()))
}

fn decode(message: Message) -> Option<Result<Frame, ChannelError>> {
    match message {
        Message::Text(text) => Some(Frame::decode(&text).map_err(|e| ChannelError::Protocol(e.to_string()))),
        Message::Close(_) => Some(Err(ChannelError::Transport("relay closed the connection".to_string()))),
        Message::Ping(_) | Message::Pong(_) => None,
        other => {
            debug!("Ignoring non-text relay message: {:?}", other);
            None
        }
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, session: &RoomSession) -> Result<RelayConnection, ChannelError> {
        let url = self.url_for(session);
        let (socket, _) = connect_async(url).await?;
        info!("Relay WebSocket connected to {}", url);

        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(ChannelError::from)
            .with(|frame: Frame| future::ready(encode(frame)));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(message) => decode(message),
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });

        Ok(RelayConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
