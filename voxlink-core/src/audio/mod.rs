//! Audio capture.
//!
//! A [`CaptureDevice`] produces mono f32 samples at the session rate and
//! hands them to a [`FrameSink`], which slices them into fixed-size frames
//! and enqueues them on the drop-oldest frame queue. Capture never blocks on
//! the consumer.
//!
//! Backends:
//! - [`MicCapture`]: cpal microphone (feature `audio-cpal`).
//! - [`WavCapture`]: WAV file via hound, optionally paced in real time.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so each backend owns a dedicated thread that creates, drives and
//! drops its stream. `start` blocks until that thread reports whether the
//! source opened.

pub mod device;
pub mod mic;
pub mod resample;
pub mod wav;

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::warn;

use crate::buffering::{FrameSender, Framer};
use crate::error::{Result, VoxError};

pub use device::{list_input_devices, DeviceInfo};
pub use mic::MicCapture;
pub use resample::RateConverter;
pub use wav::WavCapture;

/// A source of mono audio at a fixed rate.
///
/// A device is owned by exactly one session; moving the `Box` in enforces
/// that. Implementations must tolerate `stop()` when not started.
pub trait CaptureDevice: Send {
    /// Rate of the samples pushed into the sink (Hz).
    fn sample_rate(&self) -> u32;

    /// Open the source and begin pushing samples into `sink`.
    ///
    /// # Errors
    /// Returns an error when the source cannot be opened. Failures after a
    /// successful start are reported through [`FrameSink::faults`].
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop pushing and release the source. Idempotent.
    fn stop(&mut self);

    fn name(&self) -> String {
        "capture".to_string()
    }
}

/// Reports asynchronous capture failures to the session worker.
#[derive(Clone)]
pub struct FaultReporter {
    tx: Sender<String>,
}

impl FaultReporter {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }

    pub fn report(&self, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(detail = detail.as_str(), "capture fault");
        let _ = self.tx.try_send(detail);
    }
}

/// Receives capture output: frames it, counts it and queues it.
pub struct FrameSink {
    framer: Framer,
    frames: FrameSender,
    faults: FaultReporter,
    captured: Arc<AtomicUsize>,
}

impl FrameSink {
    pub fn new(
        frame_samples: usize,
        frames: FrameSender,
        faults: FaultReporter,
        captured: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            framer: Framer::new(frame_samples),
            frames,
            faults,
            captured,
        }
    }

    /// Append samples; every completed frame is queued immediately.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let frames = &self.frames;
        let captured = &self.captured;
        self.framer.push(samples, |frame| {
            captured.fetch_add(1, Ordering::Relaxed);
            frames.push(frame);
        });
    }

    pub fn faults(&self) -> FaultReporter {
        self.faults.clone()
    }

    pub fn frame_samples(&self) -> usize {
        self.framer.frame_samples()
    }

    /// End of stream: queue the zero-padded remainder and close the queue.
    pub fn finish(mut self) {
        if let Some(frame) = self.framer.flush_padded() {
            self.captured.fetch_add(1, Ordering::Relaxed);
            self.frames.push(frame);
        }
    }
}

fn active_devices() -> &'static Mutex<HashSet<String>> {
    static ACTIVE: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide exclusive claim on a named capture device.
///
/// Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    name: String,
}

impl DeviceLease {
    /// # Errors
    /// Returns `VoxError::DeviceBusy` when another session holds `name`.
    pub fn acquire(name: &str) -> Result<Self> {
        let mut active = active_devices().lock();
        if !active.insert(name.to_string()) {
            return Err(VoxError::DeviceBusy(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        active_devices().lock().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{frame_queue, FrameRecv};
    use std::time::Duration;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let lease = DeviceLease::acquire("test-mic-exclusive").unwrap();
        assert!(matches!(
            DeviceLease::acquire("test-mic-exclusive"),
            Err(VoxError::DeviceBusy(name)) if name == "test-mic-exclusive"
        ));
        drop(lease);
        assert!(DeviceLease::acquire("test-mic-exclusive").is_ok());
    }

    #[test]
    fn sink_frames_counts_and_flushes_remainder() {
        let overruns = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = frame_queue(8, overruns);
        let (fault_tx, _fault_rx) = crossbeam_channel::unbounded();
        let mut sink = FrameSink::new(4, tx, FaultReporter::new(fault_tx), Arc::clone(&captured));

        sink.push_samples(&[0.1; 6]);
        assert_eq!(captured.load(Ordering::Relaxed), 1);
        sink.finish();
        assert_eq!(captured.load(Ordering::Relaxed), 2);

        let wait = Duration::from_millis(10);
        assert_eq!(rx.recv_timeout(wait), FrameRecv::Frame(vec![0.1; 4]));
        assert_eq!(rx.recv_timeout(wait), FrameRecv::Frame(vec![0.1, 0.1, 0.0, 0.0]));
        assert_eq!(rx.recv_timeout(wait), FrameRecv::Closed);
    }

    #[test]
    fn faults_reach_the_receiver() {
        let (fault_tx, fault_rx) = crossbeam_channel::unbounded();
        let reporter = FaultReporter::new(fault_tx);
        reporter.clone().report("device unplugged");
        assert_eq!(fault_rx.try_recv().unwrap(), "device unplugged");
    }
}
