//! Duplex message transport to the remote voice endpoint.
//!
//! A [`Connector`] opens a [`Connection`]: a pair of bounded tokio channels
//! carrying [`WireMessage`]s. Socket I/O lives in connector-owned tasks, so
//! the session driver only ever touches channels.
//!
//! - Dropping `outbound` closes the link.
//! - `inbound.recv()` returning `None` is the close notification.

#[cfg(feature = "ws")]
pub mod ws;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::WireSample;
use crate::error::Result;

pub use memory::LoopbackConnector;
#[cfg(feature = "ws")]
pub use ws::WsConnector;

/// Default per-direction channel depth.
pub const LINK_CAPACITY: usize = 256;

/// JSON control and audio framing, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    #[serde(rename_all = "camelCase")]
    SessionStart {
        sample_rate: u32,
        frame_samples: usize,
        encoding: String,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        seq: u64,
        sample_rate: u32,
        data: WireSample,
    },
    SessionEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl WireMessage {
    pub fn session_start(sample_rate: u32, frame_samples: usize) -> Self {
        Self::SessionStart {
            sample_rate,
            frame_samples,
            encoding: "pcm16".to_string(),
        }
    }

    pub fn session_end(reason: impl Into<String>) -> Self {
        Self::SessionEnd {
            reason: Some(reason.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::Audio { .. } => "audio",
            Self::SessionEnd { .. } => "session_end",
            Self::Error { .. } => "error",
        }
    }
}

/// An open link. Owned by the session driver.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<WireMessage>,
    pub inbound: mpsc::Receiver<WireMessage>,
}

/// The far side of a [`Connection`], held by the connector's I/O tasks.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Delivers messages to the session.
    pub to_session: mpsc::Sender<WireMessage>,
    /// Messages the session sent.
    pub from_session: mpsc::Receiver<WireMessage>,
}

impl Connection {
    /// Build a linked `(Connection, RemoteEnd)` pair.
    pub fn pair(capacity: usize) -> (Connection, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        (
            Connection {
                outbound: out_tx,
                inbound: in_rx,
            },
            RemoteEnd {
                to_session: in_tx,
                from_session: out_rx,
            },
        )
    }
}

/// Opens links to the remote endpoint. One call per attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    /// Returns `VoxError::Transport` when the endpoint is unreachable or the
    /// upgrade fails.
    async fn connect(&self) -> Result<Connection>;

    /// Endpoint description for logs.
    fn describe(&self) -> String;
}
