//! Destination for decoded inbound audio.

use tokio::sync::mpsc;

use crate::codec::AudioFrame;
use crate::error::{Result, VoxError};

/// One decoded inbound frame, in playback order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFrame {
    pub seq: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl From<AudioFrame> for PlaybackFrame {
    fn from(frame: AudioFrame) -> Self {
        Self {
            seq: frame.seq(),
            sample_rate: frame.sample_rate(),
            samples: frame.to_float(),
        }
    }
}

/// Receives inbound audio from the session driver. Calls must not block for
/// long: they run on the driver task.
pub trait PlaybackSink: Send {
    fn play(&mut self, frame: PlaybackFrame) -> Result<()>;

    /// Called once when the session stops.
    fn close(&mut self) {}
}

impl PlaybackSink for mpsc::UnboundedSender<PlaybackFrame> {
    fn play(&mut self, frame: PlaybackFrame) -> Result<()> {
        self.send(frame)
            .map_err(|_| VoxError::Other(anyhow::anyhow!("playback receiver dropped")))
    }
}

impl PlaybackSink for mpsc::Sender<PlaybackFrame> {
    fn play(&mut self, frame: PlaybackFrame) -> Result<()> {
        self.try_send(frame)
            .map_err(|e| VoxError::Other(anyhow::anyhow!("playback queue rejected frame: {e}")))
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlayback;

impl PlaybackSink for NullPlayback {
    fn play(&mut self, _frame: PlaybackFrame) -> Result<()> {
        Ok(())
    }
}
