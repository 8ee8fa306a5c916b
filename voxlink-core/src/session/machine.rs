//! Pure connection-status transition table.
//!
//! ```text
//! idle ──start──► connecting ──handshake ok──► connected ◄──speechEnd── listening
//!                     │                          │  └────speechStart────►  │
//!              handshake failed            transport closed ◄──────────────┘
//!                     │                          │
//!                     ▼                          ▼
//!              reconnecting (auto) ◄───── reconnecting (auto) / disconnected
//!                │       │
//!        retry ok│       │retries exhausted
//!                ▼       ▼
//!          connected   error
//! ```
//!
//! Any running state goes to `error` on a fatal fault, and every state goes
//! to `idle` on `stop`.

use crate::ipc::events::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    HandshakeOk,
    HandshakeFailed,
    SpeechStart,
    SpeechEnd,
    TransportClosed,
    RetryFailed,
    RetryOk,
    RetriesExhausted,
    Fatal,
    Stop,
}

/// Next status for `trigger` in `from`, or `None` when the trigger does not
/// apply in that state.
pub fn transition(
    from: ConnectionStatus,
    trigger: Trigger,
    auto_reconnect: bool,
) -> Option<ConnectionStatus> {
    use ConnectionStatus::*;

    let closed = if auto_reconnect { Reconnecting } else { Disconnected };
    let failed = if auto_reconnect { Reconnecting } else { Error };

    match (from, trigger) {
        (_, Trigger::Stop) => Some(Idle),
        (Idle, Trigger::Start) => Some(Connecting),
        (Connecting, Trigger::HandshakeOk) => Some(Connected),
        (Connecting, Trigger::HandshakeFailed) => Some(failed),
        (Connected, Trigger::SpeechStart) => Some(Listening),
        (Listening, Trigger::SpeechEnd) => Some(Connected),
        (Connected | Listening, Trigger::TransportClosed) => Some(closed),
        (Reconnecting, Trigger::RetryFailed) => Some(Reconnecting),
        (Reconnecting, Trigger::RetryOk) => Some(Connected),
        (Reconnecting, Trigger::RetriesExhausted) => Some(Error),
        (Connecting | Connected | Listening | Reconnecting, Trigger::Fatal) => Some(Error),
        _ => None,
    }
}
