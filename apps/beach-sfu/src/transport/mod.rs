use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SignalingError;

pub mod memory;
pub mod websocket;

pub use memory::MemoryChannel;
pub use websocket::WebSocketChannel;

/// Reliable, ordered, message-based duplex channel carrying signaling frames.
///
/// Each `send` is one whole frame; implementations serialise concurrent
/// writers so frames never interleave.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<(), SignalingError>;

    /// Next inbound frame, or `None` once the remote end has closed.
    /// Must be cancel safe: dropping the future loses no frame.
    async fn receive(&self) -> Result<Option<Bytes>, SignalingError>;

    async fn close(&self);
}
