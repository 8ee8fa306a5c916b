//! WAV recorder for inbound audio.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{info, warn};
use voxlink_core::codec::float_to_pcm16;
use voxlink_core::error::{Result, VoxError};
use voxlink_core::{PlaybackFrame, PlaybackSink};

/// Writes every played frame to a mono 16-bit WAV file. The file is opened on
/// the first frame, at that frame's sample rate.
pub struct WavRecorder {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    frames: usize,
}

impl WavRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            sample_rate: 0,
            frames: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self, sample_rate: u32) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| VoxError::Other(anyhow::anyhow!("{}: {e}", self.path.display())))?;
        self.sample_rate = sample_rate;
        self.writer = Some(writer);
        Ok(())
    }

    fn finalize(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finalize() {
                Ok(()) => info!(
                    path = %self.path.display(),
                    frames = self.frames,
                    "recording saved"
                ),
                Err(e) => warn!(path = %self.path.display(), "failed to finalize recording: {e}"),
            }
        }
    }
}

impl PlaybackSink for WavRecorder {
    fn play(&mut self, frame: PlaybackFrame) -> Result<()> {
        if self.writer.is_some() && frame.sample_rate != self.sample_rate {
            return Err(VoxError::InvalidConfig(format!(
                "inbound rate changed from {} Hz to {} Hz mid-recording",
                self.sample_rate, frame.sample_rate
            )));
        }
        if self.writer.is_none() {
            self.open(frame.sample_rate)?;
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for &sample in &frame.samples {
            writer
                .write_sample(float_to_pcm16(sample))
                .map_err(|e| VoxError::Other(anyhow::anyhow!("writing recording: {e}")))?;
        }
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.finalize();
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        self.finalize();
    }
}
