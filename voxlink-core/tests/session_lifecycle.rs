use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;

use voxlink_core::audio::FrameSink;
use voxlink_core::{
    CaptureDevice, ConnectionStatus, EnergyClassifier, FrameClassifier, LoopbackConnector,
    PlaybackFrame, SessionParts, StatusEvent, VadFailurePolicy, VadRuntimeState, VoiceSession,
    VoiceSessionConfig, VoxError, WireMessage, WireSample,
};

const FRAME: usize = 160;
const WAIT: Duration = Duration::from_secs(3);

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct CaptureState {
    sink: Option<FrameSink>,
    fail_open: bool,
    stopped: bool,
}

/// Capture device driven by the test: frames are pushed by hand.
#[derive(Clone, Default)]
struct ManualCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl ManualCapture {
    fn failing() -> Self {
        let capture = Self::default();
        capture.state.lock().fail_open = true;
        capture
    }

    fn push(&self, value: f32) {
        if let Some(sink) = self.state.lock().sink.as_mut() {
            sink.push_samples(&[value; FRAME]);
        }
    }

    fn silence(&self, frames: usize) {
        for _ in 0..frames {
            self.push(0.0);
        }
    }

    fn speech(&self, frames: usize) {
        for _ in 0..frames {
            self.push(0.5);
        }
    }

    fn fault(&self, detail: &str) {
        if let Some(sink) = self.state.lock().sink.as_ref() {
            sink.faults().report(detail);
        }
    }

    fn stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl CaptureDevice for ManualCapture {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(&mut self, sink: FrameSink) -> voxlink_core::error::Result<()> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(VoxError::AudioDevice("microphone unplugged".into()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.sink = None;
        state.stopped = true;
    }

    fn name(&self) -> String {
        "manual".into()
    }
}

struct BrokenModel;

impl FrameClassifier for BrokenModel {
    fn load(&mut self) -> voxlink_core::error::Result<()> {
        Err(VoxError::VadLoad("model file is corrupt".into()))
    }

    fn score(&mut self, _frame: &[f32]) -> voxlink_core::error::Result<f32> {
        Ok(0.0)
    }

    fn dispose(&mut self) {}
}

/// Pushes silence as fast as it can, so the capture queue always holds a
/// backlog.
#[derive(Default)]
struct FloodCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureDevice for FloodCapture {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(&mut self, mut sink: FrameSink) -> voxlink_core::error::Result<()> {
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        self.thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                sink.push_samples(&[0.0; FRAME]);
                std::thread::yield_now();
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

fn config() -> VoiceSessionConfig {
    VoiceSessionConfig {
        frame_samples: FRAME,
        min_speech_duration_ms: 0,
        reconnect_backoff_ms: 20,
        max_reconnect_backoff_ms: 1_000,
        max_reconnect_attempts: 5,
        connect_timeout_ms: 1_000,
        pre_pad_frames: 3,
        stop_grace_ms: 1_000,
        ..VoiceSessionConfig::default()
    }
}

struct Harness {
    session: VoiceSession,
    capture: ManualCapture,
    endpoint: LoopbackConnector,
    played: mpsc::UnboundedReceiver<PlaybackFrame>,
    status: broadcast::Receiver<StatusEvent>,
}

fn harness_with(
    config: VoiceSessionConfig,
    endpoint: LoopbackConnector,
    capture: ManualCapture,
    classifier: Box<dyn FrameClassifier>,
) -> Harness {
    let (played_tx, played) = mpsc::unbounded_channel();
    let session = VoiceSession::new(
        config,
        SessionParts {
            capture: Box::new(capture.clone()),
            classifier,
            connector: Arc::new(endpoint.clone()),
            playback: Box::new(played_tx),
        },
    )
    .unwrap();
    let status = session.subscribe_status();
    Harness {
        session,
        capture,
        endpoint,
        played,
        status,
    }
}

fn harness(config: VoiceSessionConfig, endpoint: LoopbackConnector) -> Harness {
    harness_with(
        config,
        endpoint,
        ManualCapture::default(),
        Box::new(EnergyClassifier::default()),
    )
}

async fn next_status(rx: &mut broadcast::Receiver<StatusEvent>) -> StatusEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        match tokio::time::timeout_at(deadline.into(), rx.recv()).await {
            Ok(Ok(ev)) => return ev,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("status channel closed"),
            Err(_) => panic!("timed out waiting for status event"),
        }
    }
}

/// Collect status events up to and including the first `target`.
async fn wait_for_status(
    rx: &mut broadcast::Receiver<StatusEvent>,
    target: ConnectionStatus,
) -> Vec<StatusEvent> {
    let mut seen = Vec::new();
    loop {
        let ev = next_status(rx).await;
        let done = ev.status == target;
        seen.push(ev);
        if done {
            return seen;
        }
    }
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn connected_and_ready(h: &mut Harness) {
    h.session.start().await.unwrap();
    wait_for_status(&mut h.status, ConnectionStatus::Connected).await;
    let session = &h.session;
    wait_until("VAD ready", || {
        session.vad_snapshot().state == VadRuntimeState::Ready
    })
    .await;
}

async fn assert_quiet_after_stop(rx: &mut broadcast::Receiver<StatusEvent>) {
    let mut last = None;
    loop {
        match rx.try_recv() {
            Ok(ev) => last = Some(ev.status),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => break,
        }
    }
    assert_eq!(last, Some(ConnectionStatus::Idle));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

fn statuses(events: &[StatusEvent]) -> Vec<ConnectionStatus> {
    events.iter().map(|e| e.status).collect()
}

// ── Connection lifecycle ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_two_failures_with_growing_backoff() {
    let mut h = harness(config(), LoopbackConnector::new().with_failures(2));
    h.session.start().await.unwrap();

    let events = wait_for_status(&mut h.status, ConnectionStatus::Connected).await;
    use ConnectionStatus::*;
    assert_eq!(
        statuses(&events),
        vec![Connecting, Reconnecting, Reconnecting, Connected]
    );
    assert_eq!(events[1].attempt, Some(1));
    assert_eq!(events[1].retry_in_ms, Some(20));
    assert_eq!(events[2].attempt, Some(2));
    assert_eq!(events[2].retry_in_ms, Some(40));
    assert!(events[1].detail.as_deref().unwrap().contains("refused"));

    assert_eq!(h.endpoint.attempts(), 3);
    assert_eq!(h.session.metrics().reconnect_attempts, 2);

    // The handshake announced the stream format.
    let received = h.endpoint.received();
    assert!(matches!(
        received.first(),
        Some(WireMessage::SessionStart { sample_rate: 16_000, frame_samples: FRAME, .. })
    ));

    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_end_in_error_and_release_capture() {
    let config = VoiceSessionConfig {
        max_reconnect_attempts: 2,
        ..config()
    };
    let mut h = harness(config, LoopbackConnector::new().with_failures(100));
    h.session.start().await.unwrap();

    let events = wait_for_status(&mut h.status, ConnectionStatus::Error).await;
    use ConnectionStatus::*;
    assert_eq!(
        statuses(&events),
        vec![Connecting, Reconnecting, Reconnecting, Error]
    );
    assert_eq!(h.endpoint.attempts(), 3);
    let capture = h.capture.clone();
    wait_until("capture released", || capture.stopped()).await;

    h.session.stop().await.unwrap();
    assert_eq!(h.session.status(), Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_failure_without_auto_reconnect_is_an_error() {
    let config = VoiceSessionConfig {
        auto_reconnect: false,
        ..config()
    };
    let mut h = harness(config, LoopbackConnector::new().with_failures(1));
    h.session.start().await.unwrap();

    let events = wait_for_status(&mut h.status, ConnectionStatus::Error).await;
    assert_eq!(
        statuses(&events),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Error]
    );
    assert_eq!(h.endpoint.attempts(), 1);
    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_loss_reconnects_when_enabled() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    assert!(h.endpoint.sever());
    let reconnecting = next_status(&mut h.status).await;
    assert_eq!(reconnecting.status, ConnectionStatus::Reconnecting);
    assert_eq!(reconnecting.attempt, Some(1));
    assert_eq!(reconnecting.retry_in_ms, Some(20));

    let back = next_status(&mut h.status).await;
    assert_eq!(back.status, ConnectionStatus::Connected);
    assert_eq!(h.endpoint.attempts(), 2);

    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_loss_without_auto_reconnect_disconnects() {
    let config = VoiceSessionConfig {
        auto_reconnect: false,
        ..config()
    };
    let mut h = harness(config, LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    assert!(h.endpoint.sever());
    let ev = next_status(&mut h.status).await;
    assert_eq!(ev.status, ConnectionStatus::Disconnected);

    let capture = h.capture.clone();
    wait_until("capture released", || capture.stopped()).await;
    assert_eq!(h.endpoint.attempts(), 1);

    h.session.stop().await.unwrap();
    assert_quiet_after_stop(&mut h.status).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_error_is_counted_and_treated_as_link_loss() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    assert!(h.endpoint.inject(WireMessage::Error {
        code: Some("overloaded".into()),
        message: "try again".into(),
    }));
    let ev = next_status(&mut h.status).await;
    assert_eq!(ev.status, ConnectionStatus::Reconnecting);
    assert!(ev.detail.unwrap().contains("overloaded"));
    wait_for_status(&mut h.status, ConnectionStatus::Connected).await;
    assert_eq!(h.session.metrics().remote_errors, 1);

    h.session.stop().await.unwrap();
}

// ── Stop ─────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_connecting_reaches_idle_and_goes_quiet() {
    let endpoint = LoopbackConnector::new().with_connect_delay(Duration::from_secs(30));
    let mut h = harness(config(), endpoint);
    h.session.start().await.unwrap();
    assert_eq!(next_status(&mut h.status).await.status, ConnectionStatus::Connecting);

    h.session.stop().await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert!(h.capture.stopped());
    assert_quiet_after_stop(&mut h.status).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_reconnecting_reaches_idle_and_goes_quiet() {
    let config = VoiceSessionConfig {
        reconnect_backoff_ms: 5_000,
        max_reconnect_backoff_ms: 5_000,
        ..config()
    };
    let mut h = harness(config, LoopbackConnector::new().with_failures(100));
    h.session.start().await.unwrap();
    wait_for_status(&mut h.status, ConnectionStatus::Reconnecting).await;

    h.session.stop().await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_quiet_after_stop(&mut h.status).await;
    assert_eq!(h.endpoint.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_listening_sends_session_end() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;
    h.capture.speech(1);
    wait_for_status(&mut h.status, ConnectionStatus::Listening).await;

    h.session.stop().await.unwrap();
    assert_quiet_after_stop(&mut h.status).await;
    assert!(h
        .endpoint
        .received()
        .iter()
        .any(|m| matches!(m, WireMessage::SessionEnd { .. })));
    assert_eq!(h.session.vad_snapshot().state, VadRuntimeState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_session_cannot_be_restarted() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;
    h.session.stop().await.unwrap();
    h.session.stop().await.unwrap();

    assert!(matches!(h.session.start().await, Err(VoxError::SessionStopped)));
    assert!(matches!(h.session.pause().await, Err(VoxError::SessionStopped)));
    assert_quiet_after_stop(&mut h.status).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_twice_is_rejected() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;
    assert!(matches!(h.session.start().await, Err(VoxError::AlreadyRunning)));
    h.session.stop().await.unwrap();
}

// ── Transmission gate ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_listening_transmits_and_pre_pad_is_flushed_first() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    // Frames 0..=4 are silence; only the last three fit the pre-pad.
    h.capture.silence(5);
    h.capture.speech(1);
    wait_for_status(&mut h.status, ConnectionStatus::Listening).await;

    let endpoint = h.endpoint.clone();
    wait_until("pre-pad and speech frame on the wire", || {
        endpoint.received_audio_seqs().len() >= 4
    })
    .await;
    assert_eq!(h.endpoint.received_audio_seqs(), vec![2, 3, 4, 5]);

    // Back to silence: speech ends, nothing more is sent.
    h.capture.silence(2);
    wait_for_status(&mut h.status, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.endpoint.received_audio_seqs(), vec![2, 3, 4, 5]);

    // The loopback echoes what it got; playback sees it in order.
    let mut played = Vec::new();
    while played.len() < 4 {
        let frame = tokio::time::timeout(WAIT, h.played.recv())
            .await
            .unwrap()
            .unwrap();
        played.push(frame.seq);
    }
    assert_eq!(played, vec![2, 3, 4, 5]);

    let metrics = h.session.metrics();
    assert_eq!(metrics.frames_sent, 4);
    assert!(metrics.frames_suppressed >= 2);
    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_ends_speech_and_blocks_transmission() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    h.capture.speech(1);
    wait_for_status(&mut h.status, ConnectionStatus::Listening).await;

    h.session.pause().await.unwrap();
    let ev = next_status(&mut h.status).await;
    assert_eq!(ev.status, ConnectionStatus::Connected);
    assert!(h.session.vad_snapshot().paused);

    let endpoint = h.endpoint.clone();
    wait_until("first frame on the wire", || !endpoint.received_audio_seqs().is_empty()).await;
    let before = h.endpoint.received_audio_seqs().len();
    h.capture.speech(3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.endpoint.received_audio_seqs().len(), before);
    assert_eq!(h.session.status(), ConnectionStatus::Connected);

    h.session.resume().await.unwrap();
    h.capture.speech(1);
    wait_for_status(&mut h.status, ConnectionStatus::Listening).await;

    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_frame_reaches_the_wire_quickly() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    let start = Instant::now();
    h.capture.speech(1);
    let endpoint = h.endpoint.clone();
    wait_until("speech frame on the wire", || {
        !endpoint.received_audio_seqs().is_empty()
    })
    .await;
    let elapsed = start.elapsed();

    h.session.stop().await.unwrap();
    assert!(
        elapsed < Duration::from_millis(500),
        "capture-to-wire latency too high: {:?} (target < 500ms)",
        elapsed
    );
}

// ── VAD failure ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vad_failure_passes_audio_through_by_default() {
    let mut h = harness_with(
        config(),
        LoopbackConnector::new(),
        ManualCapture::default(),
        Box::new(BrokenModel),
    );
    h.session.start().await.unwrap();
    wait_for_status(&mut h.status, ConnectionStatus::Connected).await;

    let endpoint = h.endpoint.clone();
    let capture = h.capture.clone();
    wait_until("silence transmitted without a VAD", || {
        capture.silence(1);
        endpoint.received_audio_seqs().len() >= 3
    })
    .await;

    assert_eq!(h.session.vad_snapshot().state, VadRuntimeState::Error);
    assert_eq!(h.session.status(), ConnectionStatus::Connected);
    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vad_failure_is_fatal_under_fail_policy() {
    let config = VoiceSessionConfig {
        vad_failure_policy: VadFailurePolicy::Fail,
        ..config()
    };
    let mut h = harness_with(
        config,
        LoopbackConnector::new(),
        ManualCapture::default(),
        Box::new(BrokenModel),
    );
    h.session.start().await.unwrap();

    let events = wait_for_status(&mut h.status, ConnectionStatus::Error).await;
    let error = events.last().unwrap();
    assert!(error.detail.as_deref().unwrap().contains("VAD"));
    let capture = h.capture.clone();
    wait_until("capture released", || capture.stopped()).await;

    h.session.stop().await.unwrap();
    assert_quiet_after_stop(&mut h.status).await;
}

// ── Capture failure ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_open_failure_is_reported_from_start() {
    let mut h = harness_with(
        config(),
        LoopbackConnector::new(),
        ManualCapture::failing(),
        Box::new(EnergyClassifier::default()),
    );
    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, VoxError::AudioDevice(_)));

    let events = wait_for_status(&mut h.status, ConnectionStatus::Error).await;
    assert_eq!(
        statuses(&events),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Error]
    );
    assert_eq!(h.endpoint.attempts(), 0);

    h.session.stop().await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_fault_while_running_is_fatal() {
    let mut h = harness(config(), LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    h.capture.fault("device disconnected");
    let ev = next_status(&mut h.status).await;
    assert_eq!(ev.status, ConnectionStatus::Error);
    assert!(ev.detail.unwrap().contains("device disconnected"));
    assert!(h.capture.stopped());
    let endpoint = h.endpoint.clone();
    wait_until("link closed", || !endpoint.is_linked()).await;

    h.session.stop().await.unwrap();
}

// ── Inbound path ─────────────────────────────────────────────────────────────

fn inbound(seq: u64) -> WireMessage {
    WireMessage::Audio {
        seq,
        sample_rate: 16_000,
        data: WireSample::from_pcm16(&[seq as i16; 4]),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_audio_is_reordered_and_bad_frames_are_counted() {
    let mut h = harness(config(), LoopbackConnector::new().without_echo());
    connected_and_ready(&mut h).await;

    for seq in [1, 3, 2, 3] {
        assert!(h.endpoint.inject(inbound(seq)));
    }
    assert!(h.endpoint.inject(WireMessage::Audio {
        seq: 4,
        sample_rate: 16_000,
        data: WireSample::from_text("not base64!"),
    }));

    let mut played = Vec::new();
    while played.len() < 3 {
        let frame = tokio::time::timeout(WAIT, h.played.recv())
            .await
            .unwrap()
            .unwrap();
        played.push(frame.seq);
    }
    assert_eq!(played, vec![1, 2, 3]);

    let session = &h.session;
    wait_until("decode error counted", || session.metrics().decode_errors == 1).await;
    let metrics = h.session.metrics();
    assert_eq!(metrics.sequence_drops, 1);
    assert_eq!(metrics.frames_received, 4);
    assert_eq!(metrics.frames_played, 3);
    assert!((metrics.inbound_error_rate - 0.4).abs() < 1e-9);

    h.session.stop().await.unwrap();
}

// ── Backlog and timing edge cases ────────────────────────────────────────────

fn flooded(
    config: VoiceSessionConfig,
) -> (VoiceSession, LoopbackConnector, broadcast::Receiver<StatusEvent>) {
    let endpoint = LoopbackConnector::new();
    let session = VoiceSession::new(
        config,
        SessionParts {
            capture: Box::new(FloodCapture::default()),
            classifier: Box::new(EnergyClassifier::default()),
            connector: Arc::new(endpoint.clone()),
            playback: Box::new(voxlink_core::NullPlayback),
        },
    )
    .unwrap();
    let status = session.subscribe_status();
    (session, endpoint, status)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_under_capture_backlog_is_orderly() {
    let (session, endpoint, mut status) = flooded(config());
    session.start().await.unwrap();
    wait_for_status(&mut status, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    session.stop().await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(900),
        "stop fell back to the grace timeout: {elapsed:?}"
    );
    wait_until("session_end delivered", || {
        endpoint
            .received()
            .iter()
            .any(|m| matches!(m, WireMessage::SessionEnd { .. }))
    })
    .await;
    let events = wait_for_status(&mut status, ConnectionStatus::Idle).await;
    assert!(events
        .iter()
        .all(|e| !e.detail.as_deref().unwrap_or("").contains("grace")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_loss_under_capture_backlog_still_disconnects() {
    let config = VoiceSessionConfig {
        auto_reconnect: false,
        ..config()
    };
    let (session, endpoint, mut status) = flooded(config);
    session.start().await.unwrap();
    wait_for_status(&mut status, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(endpoint.sever());
    wait_for_status(&mut status, ConnectionStatus::Disconnected).await;
    let ep = endpoint.clone();
    wait_until("link closed", || !ep.is_linked()).await;

    session.stop().await.unwrap();
    assert_eq!(session.status(), ConnectionStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_connects_time_out_and_are_retried() {
    let config = VoiceSessionConfig {
        connect_timeout_ms: 50,
        max_reconnect_attempts: 2,
        ..config()
    };
    let endpoint = LoopbackConnector::new().with_connect_delay(Duration::from_millis(500));
    let mut h = harness(config, endpoint);
    h.session.start().await.unwrap();

    let events = wait_for_status(&mut h.status, ConnectionStatus::Error).await;
    use ConnectionStatus::*;
    assert_eq!(
        statuses(&events),
        vec![Connecting, Reconnecting, Reconnecting, Error]
    );
    assert!(events[1].detail.as_deref().unwrap().contains("timed out after 50 ms"));
    assert_eq!(h.endpoint.attempts(), 3);
    assert!(!h.endpoint.is_linked());

    h.session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_burst_is_a_misfire_and_sends_nothing() {
    let config = VoiceSessionConfig {
        // Five 10 ms frames before speech counts.
        min_speech_duration_ms: 50,
        pre_pad_frames: 0,
        ..config()
    };
    let mut h = harness(config, LoopbackConnector::new());
    connected_and_ready(&mut h).await;

    h.capture.speech(2);
    h.capture.silence(3);
    let session = &h.session;
    wait_until("misfire counted", || session.metrics().vad_misfires == 1).await;
    wait_until("all frames consumed", || {
        session.metrics().frames_suppressed == 5
    })
    .await;

    assert_eq!(h.session.status(), ConnectionStatus::Connected);
    assert!(matches!(h.status.try_recv(), Err(TryRecvError::Empty)));
    assert!(h.endpoint.received_audio_seqs().is_empty());
    assert_eq!(h.session.metrics().frames_sent, 0);

    h.session.stop().await.unwrap();
}
