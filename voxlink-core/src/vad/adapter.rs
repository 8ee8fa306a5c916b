//! `VadAdapter`: lifecycle wrapper around a `FrameClassifier`.
//!
//! ## Lifecycle
//!
//! ```text
//! idle ──enable()──► loading ──load ok──► ready ──disable()──► idle
//!                       │                   │
//!                       └──fail/timeout──►  error ◄──score error
//!
//! error ──enable()──► loading   (re-attempt)
//! any   ──disable()─► idle
//! ```
//!
//! The model loads on a blocking thread. Every `enable`/`disable` bumps a
//! generation counter; a load that finishes after its generation was
//! superseded disposes the model and leaves the state untouched, so
//! `disable` is safe while a load is in flight.
//!
//! `VadAdapter` is `Clone + Send + Sync`: the capture worker calls
//! [`VadAdapter::process`] while the session driver controls the lifecycle.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{FrameClassifier, SegmenterSettings, SpeechSegmenter, VadEvent};
use crate::error::{Result, VoxError};
use crate::ipc::events::{VadActivityEvent, VadEventKind, VadRuntimeState, VadSnapshot};

const BROADCAST_CAP: usize = 256;

#[derive(Clone)]
pub struct VadAdapter {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<VadActivityEvent>,
    seq: AtomicU64,
}

struct Inner {
    state: VadRuntimeState,
    paused: bool,
    generation: u64,
    /// `None` only while a load owns the classifier.
    classifier: Option<Box<dyn FrameClassifier>>,
    segmenter: SpeechSegmenter,
    /// Sequence number of the last frame seen, for pause-time events.
    last_frame_seq: u64,
}

impl Inner {
    fn snapshot(&self) -> VadSnapshot {
        VadSnapshot {
            state: self.state,
            is_speaking: self.segmenter.is_speaking(),
            paused: self.paused,
        }
    }
}

impl VadAdapter {
    pub fn new(classifier: Box<dyn FrameClassifier>) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: VadRuntimeState::Idle,
                    paused: false,
                    generation: 0,
                    classifier: Some(classifier),
                    segmenter: SpeechSegmenter::new(SegmenterSettings::default()),
                    last_frame_seq: 0,
                }),
                events_tx,
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Load the model and start consuming frames.
    ///
    /// No-op when already `ready` or `loading`.
    ///
    /// # Errors
    /// - `VoxError::VadLoad` / the classifier's error when loading fails.
    /// - `VoxError::VadLoadTimeout` when loading exceeds `load_timeout`.
    /// - `VoxError::Cancelled` when `disable()` ran while loading.
    pub async fn enable(&self, settings: SegmenterSettings, load_timeout: Duration) -> Result<()> {
        let (generation, classifier) = {
            let mut inner = self.shared.inner.lock();
            if matches!(inner.state, VadRuntimeState::Ready | VadRuntimeState::Loading) {
                return Ok(());
            }
            let Some(classifier) = inner.classifier.take() else {
                return Err(VoxError::VadLoad(
                    "classifier is still held by an abandoned load".into(),
                ));
            };
            inner.generation += 1;
            inner.state = VadRuntimeState::Loading;
            inner.paused = false;
            inner.segmenter = SpeechSegmenter::new(settings);
            self.shared.publish(&inner, None, None);
            (inner.generation, classifier)
        };

        info!(generation, ?settings, "loading VAD model");

        let shared = Arc::clone(&self.shared);
        let load = tokio::task::spawn_blocking(move || {
            let mut classifier = classifier;
            let result = classifier.load();
            shared.finish_load(generation, classifier, result)
        });

        match tokio::time::timeout(load_timeout, load).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let detail = format!("load task failed: {join_err}");
                self.shared.fail_load(generation, &detail);
                Err(VoxError::VadLoad(detail))
            }
            Err(_) => {
                let timeout_ms = load_timeout.as_millis() as u64;
                warn!(timeout_ms, "VAD model load timed out");
                self.shared
                    .fail_load(generation, &format!("load timed out after {timeout_ms} ms"));
                Err(VoxError::VadLoadTimeout { timeout_ms })
            }
        }
    }

    /// Stop consuming frames and release the model. Valid from any state.
    pub fn disable(&self) {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        inner.paused = false;
        inner.segmenter.reset();
        if let Some(classifier) = inner.classifier.as_mut() {
            classifier.dispose();
        }
        if inner.state != VadRuntimeState::Idle {
            inner.state = VadRuntimeState::Idle;
            info!("VAD disabled");
            self.shared.publish(&inner, None, None);
        }
    }

    /// Suspend frame consumption without releasing the model.
    ///
    /// Returns `SpeechEnd` when an utterance was active, so every start is
    /// still paired with an end.
    pub fn pause(&self) -> Result<Option<VadEvent>> {
        let mut inner = self.shared.inner.lock();
        if inner.state != VadRuntimeState::Ready {
            return Err(VoxError::InvalidVadState {
                op: "pause",
                state: inner.state,
            });
        }
        if inner.paused {
            return Ok(None);
        }
        inner.paused = true;
        let seq = inner.last_frame_seq;
        let event = inner.segmenter.finish(seq);
        if let Some(classifier) = inner.classifier.as_mut() {
            classifier.reset();
        }
        self.shared.publish(&inner, event.map(|e| e.kind), None);
        Ok(event)
    }

    pub fn resume(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != VadRuntimeState::Ready {
            return Err(VoxError::InvalidVadState {
                op: "resume",
                state: inner.state,
            });
        }
        if inner.paused {
            inner.paused = false;
            self.shared.publish(&inner, None, None);
        }
        Ok(())
    }

    /// Classify one frame. Emits nothing unless `ready` and not paused.
    ///
    /// # Errors
    /// Returns `VoxError::VadRuntime` when the model fails; the adapter is
    /// then in `error` until re-enabled.
    pub fn process(&self, frame: &[f32], frame_seq: u64) -> Result<Option<VadEvent>> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        inner.last_frame_seq = frame_seq;
        if inner.state != VadRuntimeState::Ready || inner.paused {
            return Ok(None);
        }
        let Some(classifier) = inner.classifier.as_mut() else {
            return Ok(None);
        };

        match classifier.score(frame) {
            Ok(score) => {
                let event = inner.segmenter.push(score, frame_seq);
                if let Some(ev) = event {
                    debug!(kind = ?ev.kind, frame_seq, frames = ev.frames, "VAD event");
                    self.shared.publish(inner, Some(ev.kind), None);
                }
                Ok(event)
            }
            Err(e) => {
                let detail = e.to_string();
                warn!(frame_seq, "VAD scoring failed: {detail}");
                classifier.dispose();
                inner.segmenter.reset();
                inner.state = VadRuntimeState::Error;
                self.shared.publish(inner, None, Some(detail.clone()));
                Err(VoxError::VadRuntime(detail))
            }
        }
    }

    pub fn state(&self) -> VadRuntimeState {
        self.shared.inner.lock().state
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.inner.lock().segmenter.is_speaking()
    }

    pub fn snapshot(&self) -> VadSnapshot {
        self.shared.inner.lock().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VadActivityEvent> {
        self.shared.events_tx.subscribe()
    }
}

impl Shared {
    fn publish(&self, inner: &Inner, event: Option<VadEventKind>, detail: Option<String>) {
        let _ = self.events_tx.send(VadActivityEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            snapshot: inner.snapshot(),
            event,
            detail,
        });
    }

    /// Runs on the blocking load thread once `load()` returns.
    fn finish_load(
        &self,
        generation: u64,
        mut classifier: Box<dyn FrameClassifier>,
        result: Result<()>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(generation, "discarding superseded VAD load");
            classifier.dispose();
            inner.classifier = Some(classifier);
            return Err(VoxError::Cancelled);
        }
        match result {
            Ok(()) => {
                inner.classifier = Some(classifier);
                inner.state = VadRuntimeState::Ready;
                info!("VAD ready");
                self.publish(&inner, None, None);
                Ok(())
            }
            Err(e) => {
                classifier.dispose();
                inner.classifier = Some(classifier);
                inner.state = VadRuntimeState::Error;
                warn!("VAD model load failed: {e}");
                self.publish(&inner, None, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Move a still-current load into `error` and orphan it.
    fn fail_load(&self, generation: u64, detail: &str) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.generation += 1;
            inner.state = VadRuntimeState::Error;
            self.publish(&inner, None, Some(detail.to_string()));
        }
    }
}
