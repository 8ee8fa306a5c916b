//! Session driver: one tokio task that owns every mutable piece of a running
//! session.
//!
//! ```text
//!  commands ───────┐
//!  campaign / VAD ─┤
//!  worker events ──┼─► select! ─► transition table ─► StatusEvent
//!  link inbound ───┘        │
//!                           ├─► gate ─► link outbound
//!                           └─► reorder ─► PlaybackSink
//! ```
//!
//! Reconnection runs as a single campaign task at a time; its results carry
//! the campaign id and stale results are dropped (closing their link).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::machine::Trigger;
use super::metrics::bump;
use super::playback::{PlaybackFrame, PlaybackSink};
use super::reorder::ReorderBuffer;
use super::worker::{WorkerEvent, WorkerHandle};
use super::{SessionShared, StatusNote};
use crate::audio::CaptureDevice;
use crate::codec::AudioFrame;
use crate::config::{VadFailurePolicy, VoiceSessionConfig};
use crate::error::{Result, VoxError};
use crate::ipc::events::ConnectionStatus;
use crate::transport::{Connection, Connector, WireMessage};
use crate::vad::{SegmenterSettings, VadAdapter, VadEvent, VadEventKind, VadRuntimeState};

/// Budget for delivering `session_end` on a closing link.
const SESSION_END_TIMEOUT: Duration = Duration::from_millis(200);

pub(crate) enum Command {
    Pause(oneshot::Sender<Result<()>>),
    Resume(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Internal {
    Linked {
        campaign: u64,
        attempt: u32,
        connection: Connection,
    },
    AttemptFailed {
        campaign: u64,
        attempt: u32,
        error: String,
        /// Next attempt number and the delay before it, if any remain.
        next: Option<(u32, Duration)>,
    },
    VadLoaded(Result<()>),
}

enum Step {
    Command(Option<Command>),
    Internal(Option<Internal>),
    Worker(Option<WorkerEvent>),
    Inbound(Option<WireMessage>),
}

struct Campaign {
    id: u64,
    handle: JoinHandle<()>,
}

/// Whether a captured frame may be sent right now.
pub(crate) fn gate_open(status: ConnectionStatus, paused: bool, vad_bypass: bool) -> bool {
    if paused {
        return false;
    }
    match status {
        ConnectionStatus::Listening => true,
        ConnectionStatus::Connected => vad_bypass,
        _ => false,
    }
}

pub(crate) struct DriverParts {
    pub config: VoiceSessionConfig,
    pub shared: Arc<SessionShared>,
    pub connector: Arc<dyn Connector>,
    pub vad: VadAdapter,
    pub capture: Box<dyn CaptureDevice>,
    pub worker: WorkerHandle,
    pub worker_rx: mpsc::Receiver<WorkerEvent>,
    pub playback: Box<dyn PlaybackSink>,
    pub commands: mpsc::Receiver<Command>,
}

pub(crate) struct Driver {
    config: VoiceSessionConfig,
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    vad: VadAdapter,
    capture: Option<Box<dyn CaptureDevice>>,
    worker: Option<WorkerHandle>,
    worker_rx: Option<mpsc::Receiver<WorkerEvent>>,
    playback: Box<dyn PlaybackSink>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    link: Option<Connection>,
    campaign: Option<Campaign>,
    campaign_seq: u64,
    vad_task: Option<JoinHandle<()>>,
    /// VAD failed under `passThrough`: transmit whenever connected.
    vad_bypass: bool,
    vad_failed: bool,
    paused: bool,
    released: bool,
    prepad: VecDeque<AudioFrame>,
    reorder: ReorderBuffer<AudioFrame>,
}

impl Driver {
    pub fn new(parts: DriverParts) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let reorder = ReorderBuffer::new(parts.config.reorder_window);
        let prepad = VecDeque::with_capacity(parts.config.pre_pad_frames);
        Self {
            config: parts.config,
            shared: parts.shared,
            connector: parts.connector,
            vad: parts.vad,
            capture: Some(parts.capture),
            worker: Some(parts.worker),
            worker_rx: Some(parts.worker_rx),
            playback: parts.playback,
            commands: parts.commands,
            internal_tx,
            internal_rx,
            link: None,
            campaign: None,
            campaign_seq: 0,
            vad_task: None,
            vad_bypass: false,
            vad_failed: false,
            paused: false,
            released: false,
            prepad,
            reorder,
        }
    }

    pub async fn run(mut self) {
        self.begin();

        loop {
            let step = tokio::select! {
                biased;
                cmd = self.commands.recv() => Step::Command(cmd),
                ev = self.internal_rx.recv() => Step::Internal(ev),
                // Ahead of the worker: a capture backlog must not hide link loss.
                msg = recv_link(&mut self.link) => Step::Inbound(msg),
                ev = recv_or_pending(&mut self.worker_rx) => Step::Worker(ev),
            };

            match step {
                Step::Command(Some(Command::Stop(reply))) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                Step::Command(None) => {
                    debug!("session handle dropped; stopping");
                    self.shutdown().await;
                    break;
                }
                Step::Command(Some(Command::Pause(reply))) => {
                    let _ = reply.send(self.pause());
                }
                Step::Command(Some(Command::Resume(reply))) => {
                    let _ = reply.send(self.resume());
                }
                Step::Internal(Some(ev)) => self.on_internal(ev).await,
                Step::Internal(None) => {}
                Step::Worker(Some(ev)) => self.on_worker(ev).await,
                Step::Worker(None) => self.worker_rx = None,
                Step::Inbound(Some(msg)) => self.on_inbound(msg).await,
                Step::Inbound(None) => self.on_link_closed("transport closed".into()).await,
            }
        }
        info!("session driver exited");
    }

    /// Stop everything and publish the final `idle`. Used when the driver
    /// never got spawned as well.
    pub async fn shutdown(&mut self) {
        self.release("stopped").await;
        self.playback.close();
        if self.shared.status() != ConnectionStatus::Idle {
            self.shared.fire(Trigger::Stop, StatusNote::default());
        }
    }

    fn begin(&mut self) {
        let vad = self.vad.clone();
        let tx = self.internal_tx.clone();
        let settings = SegmenterSettings::from(&self.config);
        let timeout = self.config.vad_load_timeout();
        self.vad_task = Some(tokio::spawn(async move {
            let result = vad.enable(settings, timeout).await;
            let _ = tx.send(Internal::VadLoaded(result));
        }));

        self.start_campaign(true);
    }

    // ── Connection campaign ────────────────────────────────────────────────

    fn start_campaign(&mut self, immediate: bool) {
        if let Some(old) = self.campaign.take() {
            old.handle.abort();
        }
        self.campaign_seq += 1;
        let id = self.campaign_seq;
        let handle = tokio::spawn(run_campaign(
            id,
            immediate,
            self.shared.auto_reconnect,
            self.config.clone(),
            Arc::clone(&self.connector),
            self.internal_tx.clone(),
        ));
        self.campaign = Some(Campaign { id, handle });
    }

    fn is_current_campaign(&self, id: u64) -> bool {
        self.campaign.as_ref().is_some_and(|c| c.id == id)
    }

    async fn on_internal(&mut self, ev: Internal) {
        match ev {
            Internal::Linked {
                campaign,
                attempt,
                connection,
            } => {
                if !self.is_current_campaign(campaign) {
                    debug!(campaign, "dropping link from stale campaign");
                    return;
                }
                self.campaign = None;
                if attempt > 0 {
                    bump(&self.shared.metrics.reconnect_attempts);
                }
                let trigger = match self.shared.status() {
                    ConnectionStatus::Connecting => Trigger::HandshakeOk,
                    ConnectionStatus::Reconnecting => Trigger::RetryOk,
                    other => {
                        debug!(?other, "link arrived in unexpected state; closing it");
                        drop(connection);
                        return;
                    }
                };
                info!(endpoint = self.connector.describe().as_str(), attempt, "link established");
                self.link = Some(connection);
                self.shared.fire(
                    trigger,
                    StatusNote {
                        attempt: (attempt > 0).then_some(attempt),
                        ..StatusNote::default()
                    },
                );
                // Speech that began while the link was down continues.
                if !self.paused && self.vad.is_speaking() {
                    self.shared.fire(Trigger::SpeechStart, StatusNote::default());
                }
            }
            Internal::AttemptFailed {
                campaign,
                attempt,
                error,
                next,
            } => {
                if !self.is_current_campaign(campaign) {
                    return;
                }
                if attempt > 0 {
                    bump(&self.shared.metrics.reconnect_attempts);
                }
                warn!(attempt, error = error.as_str(), "connect attempt failed");
                let status = self.shared.status();
                match next {
                    Some((next_attempt, delay)) => {
                        let trigger = if status == ConnectionStatus::Connecting {
                            Trigger::HandshakeFailed
                        } else {
                            Trigger::RetryFailed
                        };
                        self.shared.fire(
                            trigger,
                            StatusNote {
                                detail: Some(error),
                                attempt: Some(next_attempt),
                                retry_in: Some(delay),
                            },
                        );
                    }
                    None => {
                        self.campaign = None;
                        let trigger = match status {
                            ConnectionStatus::Reconnecting => Trigger::RetriesExhausted,
                            _ if !self.shared.auto_reconnect => Trigger::HandshakeFailed,
                            _ => Trigger::Fatal,
                        };
                        self.release("connect failed").await;
                        self.shared.fire(trigger, StatusNote::detail(error));
                    }
                }
            }
            Internal::VadLoaded(result) => {
                self.vad_task = None;
                match result {
                    Ok(()) => {
                        debug!("VAD ready for session");
                        if self.paused {
                            if let Err(e) = self.vad.pause() {
                                debug!("could not pause freshly loaded VAD: {e}");
                            }
                        }
                    }
                    Err(VoxError::Cancelled) => {}
                    Err(e) => self.on_vad_failure(e.to_string()).await,
                }
            }
        }
    }

    // ── Capture path ───────────────────────────────────────────────────────

    async fn on_worker(&mut self, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Frame(frame) => self.on_frame(frame),
            WorkerEvent::Vad(event) => self.on_vad_event(event),
            WorkerEvent::VadFailed(detail) => self.on_vad_failure(detail).await,
            WorkerEvent::CaptureFailed(detail) => {
                self.fail(format!("capture failed: {detail}")).await;
            }
            WorkerEvent::CaptureEnded => info!("capture source ended"),
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        let status = self.shared.status();
        if gate_open(status, self.paused, self.vad_bypass) {
            self.transmit(&frame);
        } else if status == ConnectionStatus::Connected
            && !self.paused
            && self.config.pre_pad_frames > 0
        {
            if self.prepad.len() >= self.config.pre_pad_frames {
                self.prepad.pop_front();
                bump(&self.shared.metrics.frames_suppressed);
            }
            self.prepad.push_back(frame);
        } else {
            bump(&self.shared.metrics.frames_suppressed);
        }
    }

    fn on_vad_event(&mut self, event: VadEvent) {
        match event.kind {
            VadEventKind::SpeechStart if self.paused => {}
            VadEventKind::SpeechStart => {
                if self
                    .shared
                    .fire(Trigger::SpeechStart, StatusNote::default())
                    .is_some()
                {
                    self.flush_prepad();
                }
            }
            VadEventKind::SpeechEnd => {
                self.shared.fire(Trigger::SpeechEnd, StatusNote::default());
            }
            VadEventKind::Misfire => bump(&self.shared.metrics.vad_misfires),
        }
    }

    async fn on_vad_failure(&mut self, detail: String) {
        if self.vad_failed || self.released {
            return;
        }
        self.vad_failed = true;
        match self.config.vad_failure_policy {
            VadFailurePolicy::Fail => self.fail(format!("VAD failed: {detail}")).await,
            VadFailurePolicy::PassThrough => {
                warn!(detail = detail.as_str(), "VAD failed; passing audio through");
                self.vad_bypass = true;
                if self.shared.status() == ConnectionStatus::Listening {
                    self.shared.fire(Trigger::SpeechEnd, StatusNote::default());
                }
                self.flush_prepad();
            }
        }
    }

    fn flush_prepad(&mut self) {
        while let Some(frame) = self.prepad.pop_front() {
            if gate_open(self.shared.status(), self.paused, self.vad_bypass) {
                self.transmit(&frame);
            } else {
                bump(&self.shared.metrics.frames_suppressed);
            }
        }
    }

    fn transmit(&mut self, frame: &AudioFrame) {
        let metrics = &self.shared.metrics;
        let Some(link) = self.link.as_ref() else {
            bump(&metrics.frames_suppressed);
            return;
        };
        let msg = WireMessage::Audio {
            seq: frame.seq(),
            sample_rate: frame.sample_rate(),
            data: frame.to_wire(),
        };
        match link.outbound.try_send(msg) {
            Ok(()) => bump(&metrics.frames_sent),
            Err(mpsc::error::TrySendError::Full(_)) => bump(&metrics.outbound_overruns),
            Err(mpsc::error::TrySendError::Closed(_)) => bump(&metrics.frames_suppressed),
        }
    }

    fn pause(&mut self) -> Result<()> {
        // A VAD still loading is paused once it reports ready.
        let ended = match self.vad.state() {
            VadRuntimeState::Ready if !self.vad_failed => self.vad.pause()?,
            _ => None,
        };
        self.paused = true;
        self.prepad.clear();
        if let Some(event) = ended {
            self.on_vad_event(event);
        }
        info!("session paused");
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.vad.state() == VadRuntimeState::Ready && !self.vad_failed {
            self.vad.resume()?;
        }
        self.paused = false;
        info!("session resumed");
        Ok(())
    }

    // ── Inbound path ───────────────────────────────────────────────────────

    async fn on_inbound(&mut self, msg: WireMessage) {
        let metrics = &self.shared.metrics;
        match msg {
            WireMessage::Audio {
                seq,
                sample_rate,
                data,
            } => match AudioFrame::from_wire(seq, sample_rate, &data) {
                Ok(frame) => {
                    bump(&metrics.frames_received);
                    let mut ready = Vec::new();
                    if !self.reorder.push(seq, frame, &mut ready) {
                        bump(&metrics.sequence_drops);
                    }
                    self.play(ready);
                }
                Err(e) => {
                    bump(&metrics.decode_errors);
                    debug!(seq, "dropping undecodable inbound audio: {e}");
                }
            },
            WireMessage::SessionEnd { reason } => {
                let reason = reason.unwrap_or_else(|| "remote ended session".into());
                self.on_link_closed(reason).await;
            }
            WireMessage::Error { code, message } => {
                bump(&metrics.remote_errors);
                let detail = match code {
                    Some(code) => format!("remote error {code}: {message}"),
                    None => format!("remote error: {message}"),
                };
                self.on_link_closed(detail).await;
            }
            WireMessage::SessionStart { .. } => debug!("ignoring session_start from remote"),
        }
    }

    fn play(&mut self, frames: Vec<AudioFrame>) {
        for frame in frames {
            match self.playback.play(PlaybackFrame::from(frame)) {
                Ok(()) => bump(&self.shared.metrics.frames_played),
                Err(e) => debug!("playback rejected frame: {e}"),
            }
        }
    }

    fn drain_reorder(&mut self) {
        let mut rest = Vec::new();
        self.reorder.flush(&mut rest);
        self.play(rest);
    }

    async fn on_link_closed(&mut self, detail: String) {
        if self.link.take().is_none() {
            return;
        }
        self.drain_reorder();
        self.prepad.clear();
        info!(detail = detail.as_str(), "link closed");

        if self.shared.auto_reconnect {
            self.shared.fire(
                Trigger::TransportClosed,
                StatusNote {
                    detail: Some(detail),
                    attempt: Some(1),
                    retry_in: Some(self.config.reconnect_delay(1)),
                },
            );
            self.start_campaign(false);
        } else {
            self.release("transport closed").await;
            self.shared
                .fire(Trigger::TransportClosed, StatusNote::detail(detail));
        }
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    async fn fail(&mut self, detail: String) {
        let status = self.shared.status();
        if status == ConnectionStatus::Idle || status.is_terminal() {
            return;
        }
        warn!(detail = detail.as_str(), "session failed");
        self.release(&detail).await;
        self.shared.fire(Trigger::Fatal, StatusNote::detail(detail));
    }

    /// Release resources in order: campaign, capture, worker, VAD, link.
    async fn release(&mut self, reason: &str) {
        self.released = true;
        if let Some(campaign) = self.campaign.take() {
            campaign.handle.abort();
        }
        if let Some(task) = self.vad_task.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            let stopped = tokio::task::spawn_blocking(move || {
                capture.stop();
                drop(capture);
            })
            .await;
            if stopped.is_err() {
                warn!("capture stop panicked");
            }
        }
        // The worker may be parked on a full event queue; close it before joining.
        self.worker_rx = None;
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        self.vad.disable();
        self.prepad.clear();

        if let Some(link) = self.link.take() {
            let end = link.outbound.send(WireMessage::session_end(reason));
            if tokio::time::timeout(SESSION_END_TIMEOUT, end).await.is_err() {
                debug!("session_end not delivered before close");
            }
            drop(link);
        }
        self.drain_reorder();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(campaign) = self.campaign.take() {
            campaign.handle.abort();
        }
        if let Some(task) = self.vad_task.take() {
            task.abort();
        }
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_link(link: &mut Option<Connection>) -> Option<WireMessage> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

/// Connect and announce the stream format.
async fn connect_and_handshake(
    connector: &dyn Connector,
    config: &VoiceSessionConfig,
) -> Result<Connection> {
    let timeout = config.connect_timeout();
    let connection = tokio::time::timeout(timeout, connector.connect())
        .await
        .map_err(|_| VoxError::ConnectTimeout {
            timeout_ms: config.connect_timeout_ms,
        })??;
    connection
        .outbound
        .send(WireMessage::session_start(
            config.sample_rate,
            config.frame_samples,
        ))
        .await
        .map_err(|_| VoxError::Transport("link closed during handshake".into()))?;
    Ok(connection)
}

/// Sequential connect attempts. `immediate` makes the first attempt without
/// delay (attempt 0, the initial handshake).
async fn run_campaign(
    id: u64,
    immediate: bool,
    auto_reconnect: bool,
    config: VoiceSessionConfig,
    connector: Arc<dyn Connector>,
    tx: mpsc::UnboundedSender<Internal>,
) {
    let mut attempt: u32 = if immediate { 0 } else { 1 };
    if !immediate {
        tokio::time::sleep(config.reconnect_delay(1)).await;
    }

    loop {
        debug!(campaign = id, attempt, "connect attempt");
        match connect_and_handshake(connector.as_ref(), &config).await {
            Ok(connection) => {
                let _ = tx.send(Internal::Linked {
                    campaign: id,
                    attempt,
                    connection,
                });
                return;
            }
            Err(e) => {
                let next = (auto_reconnect && attempt < config.max_reconnect_attempts)
                    .then(|| (attempt + 1, config.reconnect_delay(attempt + 1)));
                let _ = tx.send(Internal::AttemptFailed {
                    campaign: id,
                    attempt,
                    error: e.to_string(),
                    next,
                });
                let Some((next_attempt, delay)) = next else {
                    return;
                };
                attempt = next_attempt;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
