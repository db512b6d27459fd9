use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::DuplexChannel;
use crate::error::SignalingError;

/// One end of an in-process channel pair.
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Bytes>, rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Makes every later `send` fail as if the connection had dropped.
    pub fn break_writes(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexChannel for MemoryChannel {
    async fn send(&self, frame: Bytes) -> Result<(), SignalingError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.is_closed() {
            return Err(SignalingError::Channel("memory channel broken".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| SignalingError::Channel("memory channel peer dropped".into()))
    }

    async fn receive(&self) -> Result<Option<Bytes>, SignalingError> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_in_both_directions() {
        let (client, server) = MemoryChannel::pair();
        client.send(Bytes::from_static(b"ping")).await.unwrap();
        server.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), Some(Bytes::from_static(b"ping")));
        assert_eq!(client.receive().await.unwrap(), Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn dropped_peer_ends_the_stream() {
        let (client, server) = MemoryChannel::pair();
        drop(server);
        assert_eq!(client.receive().await.unwrap(), None);
        assert!(client.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn broken_writes_fail() {
        let (client, _server) = MemoryChannel::pair();
        client.break_writes();
        assert!(matches!(
            client.send(Bytes::from_static(b"x")).await,
            Err(SignalingError::Channel(_))
        ));
    }
}
