//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block on a mutex or perform I/O, so it only downmixes into a
//! reusable buffer and writes into the SPSC ring producer, whose
//! `push_slice` is lock-free.
//!
//! A drain loop on the capture thread pops the ring, resamples to the session
//! rate with [`RateConverter`] and feeds the [`FrameSink`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use super::{CaptureDevice, FrameSink};
use crate::error::{Result, VoxError};

/// Poll interval of the drain loop when the ring is empty.
#[cfg(feature = "audio-cpal")]
const DRAIN_IDLE: std::time::Duration = std::time::Duration::from_millis(5);

/// Microphone capture device.
///
/// Opens the preferred input by name, otherwise the system default, then
/// the first available input.
pub struct MicCapture {
    preferred_device: Option<String>,
    target_rate: u32,
    worker: Option<CaptureThread>,
}

struct CaptureThread {
    running: Arc<AtomicBool>,
    join: JoinHandle<()>,
    device_name: String,
}

impl MicCapture {
    pub fn new(target_rate: u32, preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            target_rate,
            worker: None,
        }
    }

    /// Name of the open device, if streaming.
    pub fn device_name(&self) -> Option<&str> {
        self.worker.as_ref().map(|w| w.device_name.as_str())
    }
}

impl CaptureDevice for MicCapture {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(VoxError::AlreadyRunning);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String>>(1);
        let preferred = self.preferred_device.clone();
        let target_rate = self.target_rate;
        let thread_running = Arc::clone(&running);

        let join = std::thread::Builder::new()
            .name("voxlink-capture".into())
            .spawn(move || run_capture(preferred, target_rate, thread_running, sink, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                info!(device = device_name.as_str(), target_rate, "microphone capture started");
                self.worker = Some(CaptureThread {
                    running,
                    join,
                    device_name,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(VoxError::AudioStream(
                    "capture thread exited before reporting".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::Release);
            if worker.join.join().is_err() {
                warn!("capture thread panicked");
            }
            info!(device = worker.device_name.as_str(), "microphone capture stopped");
        }
    }

    fn name(&self) -> String {
        self.device_name()
            .or(self.preferred_device.as_deref())
            .unwrap_or("default microphone")
            .to_string()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-cpal")]
fn run_capture(
    preferred: Option<String>,
    target_rate: u32,
    running: Arc<AtomicBool>,
    mut sink: FrameSink,
    ready: crossbeam_channel::Sender<Result<String>>,
) {
    use super::resample::RateConverter;
    use crate::buffering::{create_sample_ring, Consumer};

    let (producer, mut consumer) = create_sample_ring();
    let opened = open_stream(preferred.as_deref(), producer, Arc::clone(&running), &sink);
    let (stream, lease, capture_rate) = match opened {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // 10 ms of device audio per resampler call.
    let chunk = (capture_rate as usize / 100).max(1);
    let mut converter = match RateConverter::new(capture_rate, target_rate, chunk) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(lease.name().to_string()));

    let mut buf = vec![0f32; 4096];
    while running.load(Ordering::Acquire) {
        let n = consumer.pop_slice(&mut buf);
        if n == 0 {
            std::thread::sleep(DRAIN_IDLE);
            continue;
        }
        let out = converter.process(&buf[..n]);
        if !out.is_empty() {
            sink.push_samples(&out);
        }
    }

    drop(stream);
    debug!(device = lease.name(), "capture stream dropped");
}

#[cfg(feature = "audio-cpal")]
fn open_stream(
    preferred: Option<&str>,
    producer: crate::buffering::SampleProducer,
    running: Arc<AtomicBool>,
    sink: &FrameSink,
) -> Result<(cpal::Stream, super::DeviceLease, u32)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, StreamConfig};

    let host = cpal::default_host();
    let mut selected = None;

    if let Some(preferred_name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                selected = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if selected.is_none() {
                    warn!(preferred = preferred_name, "preferred input device not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    let device = if let Some(device) = selected {
        device
    } else if let Some(default) = host.default_input_device() {
        default
    } else {
        let mut devices = host
            .input_devices()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?;
        warn!("no default input device, falling back to first available input");
        devices.next().ok_or(VoxError::NoDefaultInputDevice)?
    };

    let device_name = device.name().unwrap_or_else(|_| "unnamed input".to_string());
    let lease = super::DeviceLease::acquire(&device_name)?;

    let supported = device
        .default_input_config()
        .map_err(|e| VoxError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(device = device_name.as_str(), sample_rate, channels, "opening input device");

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let faults = sink.faults();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            build_downmix_stream::<f32>(&device, &config, producer, running, faults, |s| s)
        }
        SampleFormat::I16 => build_downmix_stream::<i16>(
            &device,
            &config,
            producer,
            running,
            faults,
            |s| s as f32 / 32768.0,
        ),
        SampleFormat::U8 => build_downmix_stream::<u8>(
            &device,
            &config,
            producer,
            running,
            faults,
            |s| (s as f32 - 128.0) / 128.0,
        ),
        fmt => {
            return Err(VoxError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| VoxError::AudioStream(e.to_string()))?;

    Ok((stream, lease, sample_rate))
}

/// Build an input stream that averages interleaved channels to mono.
#[cfg(feature = "audio-cpal")]
fn build_downmix_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: crate::buffering::SampleProducer,
    running: Arc<AtomicBool>,
    faults: super::FaultReporter,
    to_f32: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + 'static,
{
    use crate::buffering::Producer;
    use cpal::traits::DeviceTrait;

    let ch = (config.channels as usize).max(1);
    let mut mix: Vec<f32> = Vec::with_capacity(4096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix.resize(frames, 0.0);
                for (f, out) in mix.iter_mut().enumerate() {
                    let base = f * ch;
                    let sum: f32 = data[base..base + ch].iter().map(|s| to_f32(*s)).sum();
                    *out = sum / ch as f32;
                }
                let written = producer.push_slice(&mix);
                if written < mix.len() {
                    warn!("ring buffer full: dropped {} samples", mix.len() - written);
                }
            },
            move |err| faults.report(format!("audio stream error: {err}")),
            None,
        )
        .map_err(|e| VoxError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
fn run_capture(
    _preferred: Option<String>,
    _target_rate: u32,
    _running: Arc<AtomicBool>,
    _sink: FrameSink,
    ready: crossbeam_channel::Sender<Result<String>>,
) {
    let _ = ready.send(Err(VoxError::AudioStream(
        "compiled without audio-cpal feature".into(),
    )));
}
