//! WebSocket connector (tokio-tungstenite).
//!
//! Each [`WireMessage`] travels as one JSON text frame. A writer task drains
//! the session's outbound channel into the socket; a reader task parses text
//! frames into the inbound channel. When the session drops `outbound` the
//! writer sends a close frame and stops the reader.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{Connection, Connector, WireMessage, LINK_CAPACITY};
use crate::error::{Result, VoxError};

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    capacity: usize,
}

impl WsConnector {
    /// # Errors
    /// Returns `VoxError::InvalidConfig` unless `url` is `ws://` or `wss://`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(VoxError::InvalidConfig(format!(
                "endpoint must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        Ok(Self {
            url,
            capacity: LINK_CAPACITY,
        })
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| VoxError::Transport(format!("{}: {e}", self.url)))?;
        info!(url = self.url.as_str(), status = %response.status(), "websocket connected");

        let (mut sink, mut stream) = socket.split();
        let (connection, remote) = Connection::pair(self.capacity);
        let to_session = remote.to_session;
        let mut from_session = remote.from_session;

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WireMessage>(&text) {
                        Ok(msg) => {
                            if to_session.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping unparseable message: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by remote");
                        break;
                    }
                    Ok(Message::Binary(bytes)) => {
                        warn!(len = bytes.len(), "ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket read error: {e}");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = from_session.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(kind = msg.kind(), "failed to serialise message: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("websocket write error: {e}");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            reader.abort();
            debug!("websocket writer finished");
        });

        Ok(connection)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
