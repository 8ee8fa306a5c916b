//! Voice Activity Detection (VAD).
//!
//! ```text
//! frame ─► FrameClassifier::score ─► SpeechSegmenter ─► VadEvent
//!                 (model)            (hysteresis +        (speechStart /
//!                                     min duration)        speechEnd / misfire)
//! ```
//!
//! `FrameClassifier` is the extensibility point: swap in `EnergyClassifier`
//! (default), `SileroClassifier` (`onnx` feature) or any other model without
//! touching the adapter's lifecycle state machine in [`adapter`].

pub mod adapter;
pub mod energy;
pub mod segmenter;

#[cfg(feature = "onnx")]
pub mod silero;

pub use adapter::VadAdapter;
pub use energy::EnergyClassifier;
pub use segmenter::{SegmenterSettings, SpeechSegmenter};

#[cfg(feature = "onnx")]
pub use silero::SileroClassifier;

pub use crate::ipc::events::{VadEventKind, VadRuntimeState, VadSnapshot};

use crate::error::Result;

/// A discrete speech-boundary event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadEvent {
    pub kind: VadEventKind,
    /// Sequence number of the frame that triggered the event.
    pub frame_seq: u64,
    /// Frames in the segment so far (start) or in total (end / misfire).
    pub frames: usize,
}

/// Contract for speech-probability models.
///
/// Implementors may be stateful (RNN hidden state, partial windows). All
/// calls are serialised by the adapter.
pub trait FrameClassifier: Send + 'static {
    /// Load weights or open sessions. Runs on a blocking thread.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn load(&mut self) -> Result<()>;

    /// Speech probability for one frame, in [0, 1].
    fn score(&mut self, frame: &[f32]) -> Result<f32>;

    /// Clear per-utterance state (hidden states, partial windows).
    fn reset(&mut self) {}

    /// Release loaded resources. Must be safe to call when not loaded.
    fn dispose(&mut self);
}
