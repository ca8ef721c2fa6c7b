//! Outbound signaling port

use crate::domain::shared::result::Result;
use crate::domain::signaling::message::SignalingMessage;

/// Where the negotiation engine hands messages for the remote peer.
///
/// Implementations must not block: delivery and acknowledgement happen on
/// the channel's own task.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: SignalingMessage) -> Result<()>;
}
