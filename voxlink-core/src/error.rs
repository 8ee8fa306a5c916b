use thiserror::Error;

use crate::ipc::events::VadRuntimeState;

/// All errors produced by voxlink-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("capture device '{0}' is already in use by another session")]
    DeviceBusy(String),

    #[error("VAD model load failed: {0}")]
    VadLoad(String),

    #[error("VAD model did not load within {timeout_ms} ms")]
    VadLoadTimeout { timeout_ms: u64 },

    #[error("VAD runtime error: {0}")]
    VadRuntime(String),

    #[error("VAD operation '{op}' is not valid in state {state:?}")]
    InvalidVadState {
        op: &'static str,
        state: VadRuntimeState,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect attempt timed out after {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("malformed wire audio: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("session has been stopped; construct a new session to restart")]
    SessionStopped,

    #[error("operation cancelled")]
    Cancelled,

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;
