//! # voxlink-core
//!
//! Real-time, full-duplex voice streaming between a local microphone and a
//! remote audio endpoint.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureDevice → Framer → frame queue → worker(spawn_blocking)
//!                                                          │
//!                                               VAD + PCM16/base64 encode
//!                                                          │
//!                      StatusEvent ◄── session driver ──► Connector (WebSocket)
//!                                          │
//!                                 reorder → PlaybackSink
//! ```
//!
//! The capture callback only downmixes and copies. Resampling, framing, VAD
//! and encoding happen off the audio thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod session;
pub mod transport;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{CaptureDevice, MicCapture, WavCapture};
pub use codec::{AudioFrame, WireSample};
pub use config::{VadFailurePolicy, VoiceSessionConfig};
pub use error::VoxError;
pub use ipc::events::{
    ConnectionStatus, StatusEvent, VadActivityEvent, VadEventKind, VadRuntimeState, VadSnapshot,
};
pub use session::{
    MetricsSnapshot, NullPlayback, PlaybackFrame, PlaybackSink, SessionParts, VoiceSession,
};
pub use transport::{Connection, Connector, LoopbackConnector, WireMessage};
pub use vad::{EnergyClassifier, FrameClassifier, VadAdapter};

#[cfg(feature = "ws")]
pub use transport::WsConnector;

#[cfg(feature = "onnx")]
pub use vad::SileroClassifier;
