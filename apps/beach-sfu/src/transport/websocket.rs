use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::DuplexChannel;
use crate::error::SignalingError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling channel over a WebSocket connection. Frames go out as text.
pub struct WebSocketChannel {
    url: Url,
    writer: AsyncMutex<SplitSink<WsStream, Message>>,
    reader: AsyncMutex<SplitStream<WsStream>>,
}

impl WebSocketChannel {
    pub async fn connect(url: &Url) -> Result<Self, SignalingError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Channel(format!("websocket connect failed: {err}")))?;
        tracing::debug!(
            target = "beach_sfu::transport",
            url = %url,
            "signaling websocket connected"
        );
        let (writer, reader) = ws_stream.split();
        Ok(Self {
            url: url.clone(),
            writer: AsyncMutex::new(writer),
            reader: AsyncMutex::new(reader),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn send(&self, frame: Bytes) -> Result<(), SignalingError> {
        let text = String::from_utf8(frame.to_vec()).map_err(SignalingError::malformed)?;
        tracing::trace!(
            target = "beach_sfu::transport",
            event = "ws_out",
            len = text.len()
        );
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text))
            .await
            .map_err(SignalingError::channel)
    }

    async fn receive(&self) -> Result<Option<Bytes>, SignalingError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(
                        target = "beach_sfu::transport",
                        event = "ws_in",
                        kind = "text",
                        len = text.len()
                    );
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(
                        target = "beach_sfu::transport",
                        event = "ws_in",
                        kind = "binary",
                        len = data.len()
                    );
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(
                        target = "beach_sfu::transport",
                        frame = ?frame,
                        "signaling websocket closed by peer"
                    );
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    return match err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            tracing::debug!(
                                target = "beach_sfu::transport",
                                "signaling websocket closed: {err}"
                            );
                            Ok(None)
                        }
                        other => {
                            tracing::warn!(
                                target = "beach_sfu::transport",
                                "signaling websocket error: {other}"
                            );
                            Err(SignalingError::channel(other))
                        }
                    };
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.close().await {
            tracing::debug!(
                target = "beach_sfu::transport",
                error = %err,
                "error while closing signaling websocket"
            );
        }
    }
}
