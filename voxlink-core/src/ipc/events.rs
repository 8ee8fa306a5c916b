//! Event types published to the UI layer.
//!
//! ## Channels
//!
//! | Event | Source | Subscribe via |
//! |-------|--------|---------------|
//! | `StatusEvent` | session driver | `VoiceSession::subscribe_status` |
//! | `VadActivityEvent` | VAD adapter | `VoiceSession::subscribe_vad` |
//!
//! All types serialise with camelCase fields and lowercase enum values so a
//! web front end can consume them unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Connection status of a voice session. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Constructed but not started, or stopped.
    Idle,
    /// First transport handshake in flight.
    Connecting,
    /// Link up, no speech detected; audio is not transmitted.
    Connected,
    /// Link up and the user is speaking; audio is transmitted.
    Listening,
    /// Link dropped and reconnection is disabled.
    Disconnected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting,
    /// Unrecoverable failure; stop and construct a new session.
    Error,
}

impl ConnectionStatus {
    /// `true` when a transport link is up.
    pub fn is_linked(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Listening)
    }

    /// `true` for states from which only `stop` can move the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }
}

/// Emitted on every status transition, including repeated `reconnecting`
/// transitions (one per failed attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub status: ConnectionStatus,
    /// Human-readable detail (error reason, close reason).
    pub detail: Option<String>,
    /// Connect attempt number this event refers to, if any.
    pub attempt: Option<u32>,
    /// Delay before the next reconnect attempt, when one is scheduled.
    pub retry_in_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// VAD activity
// ---------------------------------------------------------------------------

/// Lifecycle state of the VAD adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadRuntimeState {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Discrete speech-boundary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VadEventKind {
    SpeechStart,
    SpeechEnd,
    Misfire,
}

/// Read-only view of the VAD adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadSnapshot {
    pub state: VadRuntimeState,
    pub is_speaking: bool,
    pub paused: bool,
}

impl Default for VadSnapshot {
    fn default() -> Self {
        Self {
            state: VadRuntimeState::Idle,
            is_speaking: false,
            paused: false,
        }
    }
}

/// Emitted whenever the VAD snapshot changes or a boundary event fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadActivityEvent {
    pub seq: u64,
    pub snapshot: VadSnapshot,
    /// Boundary event that caused this update, if any.
    pub event: Option<VadEventKind>,
    /// Error text when the adapter entered `error`.
    pub detail: Option<String>,
}
