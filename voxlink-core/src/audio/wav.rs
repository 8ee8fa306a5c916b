//! WAV file capture source.
//!
//! Reads a PCM or float WAV with hound, downmixes to mono, resamples to the
//! session rate and feeds the sink in 20 ms blocks. With pacing on (the
//! default) blocks are released in real time so the session sees the same
//! timing a microphone would produce.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use tracing::{debug, info, warn};

use super::resample::RateConverter;
use super::{CaptureDevice, FrameSink};
use crate::error::{Result, VoxError};

const BLOCK_MS: u64 = 20;

pub struct WavCapture {
    path: PathBuf,
    target_rate: u32,
    paced: bool,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>, target_rate: u32) -> Self {
        Self {
            path: path.into(),
            target_rate,
            paced: true,
            worker: None,
        }
    }

    /// Release blocks as fast as the consumer takes them.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode a whole file to mono f32 at its native rate.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)
        .map_err(|e| VoxError::AudioDevice(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VoxError::AudioStream(e.to_string()))?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

impl CaptureDevice for WavCapture {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(VoxError::AlreadyRunning);
        }
        let (samples, file_rate) = read_mono(&self.path)?;
        let chunk = (file_rate as usize * BLOCK_MS as usize / 1000).max(1);
        let mut converter = RateConverter::new(file_rate, self.target_rate, chunk)?;
        info!(
            path = ?self.path,
            file_rate,
            target_rate = self.target_rate,
            seconds = samples.len() as f32 / file_rate as f32,
            "WAV capture started"
        );

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let paced = self.paced;

        let join = std::thread::Builder::new()
            .name("voxlink-wav".into())
            .spawn(move || {
                let began = Instant::now();
                for (i, block) in samples.chunks(chunk).enumerate() {
                    if !thread_running.load(Ordering::Acquire) {
                        debug!("WAV capture interrupted");
                        return;
                    }
                    if paced {
                        let due = began + Duration::from_millis(BLOCK_MS * i as u64);
                        if let Some(wait) = due.checked_duration_since(Instant::now()) {
                            std::thread::sleep(wait);
                        }
                    }
                    let out = converter.process(block);
                    if !out.is_empty() {
                        sink.push_samples(&out);
                    }
                }
                let tail = converter.flush();
                if !tail.is_empty() {
                    sink.push_samples(&tail);
                }
                sink.finish();
                debug!("WAV capture reached end of file");
            })?;

        self.worker = Some((running, join));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((running, join)) = self.worker.take() {
            running.store(false, Ordering::Release);
            if join.join().is_err() {
                warn!("WAV capture thread panicked");
            }
        }
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for WavCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
