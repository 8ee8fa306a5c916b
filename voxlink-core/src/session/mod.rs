//! Voice session: capture → VAD gate → transport, and transport → playback.
//!
//! ## Architecture
//!
//! ```text
//! CaptureDevice ─► FrameSink ─► frame queue ─► worker (spawn_blocking)
//!                  (framer)     (drop-oldest)     │  VAD + PCM16 encode
//!                                                 ▼
//!                                       driver (tokio task) ◄── Connector
//!                                         │            │
//!                              StatusEvent broadcast   PlaybackSink
//! ```
//!
//! [`VoiceSession`] is the only public handle. All control flows through the
//! driver task as commands; status is read from shared state.

mod driver;
pub mod machine;
pub mod metrics;
pub mod playback;
pub mod reorder;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{CaptureDevice, FaultReporter, FrameSink};
use crate::buffering::frame_queue;
use crate::config::VoiceSessionConfig;
use crate::error::{Result, VoxError};
use crate::ipc::events::{ConnectionStatus, StatusEvent, VadActivityEvent, VadSnapshot};
use crate::transport::Connector;
use crate::vad::{FrameClassifier, VadAdapter};

use driver::{Command, Driver, DriverParts};
use machine::{transition, Trigger};
use worker::{WorkerContext, WorkerHandle};

pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use playback::{NullPlayback, PlaybackFrame, PlaybackSink};
pub use reorder::ReorderBuffer;

const BROADCAST_CAP: usize = 256;
const COMMAND_CAP: usize = 16;
const WORKER_QUEUE: usize = 64;

/// Everything a session drives. Moved into the session on construction.
pub struct SessionParts {
    pub capture: Box<dyn CaptureDevice>,
    pub classifier: Box<dyn FrameClassifier>,
    pub connector: Arc<dyn Connector>,
    pub playback: Box<dyn PlaybackSink>,
}

/// Optional fields of a status event.
#[derive(Debug, Default)]
pub(crate) struct StatusNote {
    pub detail: Option<String>,
    pub attempt: Option<u32>,
    pub retry_in: Option<Duration>,
}

impl StatusNote {
    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }
}

/// State shared by the handle and the driver.
pub(crate) struct SessionShared {
    status: Mutex<ConnectionStatus>,
    status_tx: broadcast::Sender<StatusEvent>,
    seq: AtomicU64,
    /// Reconnection enabled with at least one retry allowed.
    pub auto_reconnect: bool,
    pub metrics: SessionMetrics,
}

impl SessionShared {
    fn new(config: &VoiceSessionConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            status: Mutex::new(ConnectionStatus::Idle),
            status_tx,
            seq: AtomicU64::new(0),
            auto_reconnect: config.auto_reconnect && config.max_reconnect_attempts > 0,
            metrics: SessionMetrics::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Apply `trigger` and publish the new status. Returns `None` (and
    /// publishes nothing) when the trigger does not apply.
    pub fn fire(&self, trigger: Trigger, note: StatusNote) -> Option<ConnectionStatus> {
        let mut status = self.status.lock();
        let from = *status;
        let Some(to) = transition(from, trigger, self.auto_reconnect) else {
            debug!(?from, ?trigger, "ignored trigger");
            return None;
        };
        *status = to;
        info!(?from, ?to, ?trigger, attempt = note.attempt, "session status");
        self.publish(to, note);
        Some(to)
    }

    /// Set `idle` unconditionally. Used when the driver had to be aborted.
    fn force_idle(&self, detail: &str) {
        let mut status = self.status.lock();
        *status = ConnectionStatus::Idle;
        self.publish(ConnectionStatus::Idle, StatusNote::detail(detail));
    }

    fn publish(&self, status: ConnectionStatus, note: StatusNote) {
        let _ = self.status_tx.send(StatusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            status,
            detail: note.detail,
            attempt: note.attempt,
            retry_in_ms: note.retry_in.map(|d| d.as_millis() as u64),
        });
    }
}

struct Pending {
    capture: Box<dyn CaptureDevice>,
    connector: Arc<dyn Connector>,
    playback: Box<dyn PlaybackSink>,
}

enum Lifecycle {
    /// Constructed, not yet started.
    Ready(Pending),
    Starting,
    Running {
        commands: mpsc::Sender<Command>,
        driver: JoinHandle<()>,
    },
    /// `start` failed; only `stop` remains.
    Halted,
    Stopped,
}

/// A full-duplex voice session.
///
/// One session per capture device at a time. `stop` is terminal: build a
/// new session to go again.
pub struct VoiceSession {
    config: VoiceSessionConfig,
    shared: Arc<SessionShared>,
    vad: VadAdapter,
    lifecycle: Mutex<Lifecycle>,
}

impl VoiceSession {
    /// # Errors
    /// `VoxError::InvalidConfig` when the config is invalid or the capture
    /// device does not produce audio at `config.sample_rate`.
    pub fn new(config: VoiceSessionConfig, parts: SessionParts) -> Result<Self> {
        config.validate()?;
        if parts.capture.sample_rate() != config.sample_rate {
            return Err(VoxError::InvalidConfig(format!(
                "capture '{}' delivers {} Hz but the session runs at {} Hz",
                parts.capture.name(),
                parts.capture.sample_rate(),
                config.sample_rate
            )));
        }

        let shared = Arc::new(SessionShared::new(&config));
        let vad = VadAdapter::new(parts.classifier);
        Ok(Self {
            config,
            shared,
            vad,
            lifecycle: Mutex::new(Lifecycle::Ready(Pending {
                capture: parts.capture,
                connector: parts.connector,
                playback: parts.playback,
            })),
        })
    }

    /// Open the capture device, start the VAD load and the first connect.
    ///
    /// Returns once capture is running; connection progress is reported via
    /// [`subscribe_status`](Self::subscribe_status).
    ///
    /// # Errors
    /// - `VoxError::SessionStopped` after `stop`.
    /// - `VoxError::AlreadyRunning` when already started.
    /// - The capture device's error when it fails to open; the session is
    ///   then in `error`.
    pub async fn start(&self) -> Result<()> {
        let pending = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Ready(pending) => pending,
                other => {
                    let err = match other {
                        Lifecycle::Stopped => VoxError::SessionStopped,
                        _ => VoxError::AlreadyRunning,
                    };
                    *lifecycle = other;
                    return Err(err);
                }
            }
        };

        self.shared.fire(Trigger::Start, StatusNote::default());

        let metrics = &self.shared.metrics;
        let (frame_tx, frame_rx) = frame_queue(
            self.config.capture_queue_frames,
            Arc::clone(&metrics.capture_overruns),
        );
        let (fault_tx, fault_rx) = crossbeam_channel::unbounded();
        let sink = FrameSink::new(
            self.config.frame_samples,
            frame_tx,
            FaultReporter::new(fault_tx),
            Arc::clone(&metrics.frames_captured),
        );

        let mut capture = pending.capture;
        let opened = tokio::task::spawn_blocking(move || {
            let result = capture.start(sink);
            (capture, result)
        })
        .await;

        let capture = match opened {
            Ok((capture, Ok(()))) => capture,
            Ok((_, Err(e))) => return Err(self.halt(e)),
            Err(join_err) => {
                return Err(self.halt(VoxError::AudioStream(format!(
                    "capture start panicked: {join_err}"
                ))))
            }
        };
        info!(device = capture.name().as_str(), "capture started");

        let (worker_tx, worker_rx) = mpsc::channel(WORKER_QUEUE);
        let worker = WorkerHandle::spawn(WorkerContext {
            frames: frame_rx,
            faults: fault_rx,
            vad: self.vad.clone(),
            sample_rate: self.config.sample_rate,
            events: worker_tx,
            running: Arc::new(AtomicBool::new(true)),
        });

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAP);
        let mut driver = Driver::new(DriverParts {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            connector: pending.connector,
            vad: self.vad.clone(),
            capture,
            worker,
            worker_rx,
            playback: pending.playback,
            commands: command_rx,
        });

        {
            let mut lifecycle = self.lifecycle.lock();
            if matches!(*lifecycle, Lifecycle::Starting) {
                *lifecycle = Lifecycle::Running {
                    commands: command_tx,
                    driver: tokio::spawn(driver.run()),
                };
                return Ok(());
            }
        }

        // `stop` ran while capture was opening.
        driver.shutdown().await;
        Err(VoxError::SessionStopped)
    }

    fn halt(&self, err: VoxError) -> VoxError {
        warn!("session start failed: {err}");
        self.shared
            .fire(Trigger::Fatal, StatusNote::detail(err.to_string()));
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Starting) {
            *lifecycle = Lifecycle::Halted;
        }
        err
    }

    /// Stop the session and release every resource. Idempotent.
    ///
    /// Waits up to `stop_grace_ms` for an orderly shutdown, then aborts the
    /// driver. The status is `idle` afterwards and no further status events
    /// are published.
    pub async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Stopped => Ok(()),
            Lifecycle::Running { commands, driver } => {
                let (tx, rx) = oneshot::channel();
                let graceful = async {
                    commands.send(Command::Stop(tx)).await.is_ok() && rx.await.is_ok()
                };
                match tokio::time::timeout(self.config.stop_grace(), graceful).await {
                    Ok(true) => {
                        let _ = driver.await;
                    }
                    _ => {
                        warn!(grace_ms = self.config.stop_grace_ms, "driver did not stop in time; aborting");
                        driver.abort();
                        let _ = driver.await;
                        self.vad.disable();
                        self.shared.force_idle("stop grace period expired");
                    }
                }
                info!("session stopped");
                Ok(())
            }
            Lifecycle::Ready(_) | Lifecycle::Starting | Lifecycle::Halted => {
                self.vad.disable();
                if self.shared.status() != ConnectionStatus::Idle {
                    self.shared.fire(Trigger::Stop, StatusNote::default());
                }
                Ok(())
            }
        }
    }

    /// Stop transmitting and suspend the VAD. An active utterance ends.
    pub async fn pause(&self) -> Result<()> {
        self.command(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.command(Command::Resume).await
    }

    async fn command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let commands = match &*self.lifecycle.lock() {
            Lifecycle::Running { commands, .. } => commands.clone(),
            Lifecycle::Stopped => return Err(VoxError::SessionStopped),
            _ => return Err(VoxError::NotRunning),
        };
        let (tx, rx) = oneshot::channel();
        commands
            .send(make(tx))
            .await
            .map_err(|_| VoxError::NotRunning)?;
        rx.await.map_err(|_| VoxError::NotRunning)?
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn vad_snapshot(&self) -> VadSnapshot {
        self.vad.snapshot()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_vad(&self) -> broadcast::Receiver<VadActivityEvent> {
        self.vad.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &VoiceSessionConfig {
        &self.config
    }
}
