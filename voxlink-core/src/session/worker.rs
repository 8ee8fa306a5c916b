//! Capture worker: VAD + PCM16 encode, on a blocking thread.
//!
//! Pops frames from the drop-oldest capture queue in capture order. For each
//! frame the VAD event (if any) is forwarded before the frame itself, so the
//! driver opens the gate before the frame that triggered `speechStart`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::buffering::{FrameReceiver, FrameRecv};
use crate::codec::AudioFrame;
use crate::vad::{VadAdapter, VadEvent};

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Frame(AudioFrame),
    Vad(VadEvent),
    VadFailed(String),
    CaptureFailed(String),
    /// The source ran dry (end of file).
    CaptureEnded,
}

pub(crate) struct WorkerContext {
    pub frames: FrameReceiver,
    pub faults: Receiver<String>,
    pub vad: VadAdapter,
    pub sample_rate: u32,
    pub events: mpsc::Sender<WorkerEvent>,
    pub running: Arc<AtomicBool>,
}

/// Handle to the running worker. Dropping it signals the worker to exit.
pub(crate) struct WorkerHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(ctx: WorkerContext) -> Self {
        let running = Arc::clone(&ctx.running);
        let join = tokio::task::spawn_blocking(move || run(ctx));
        Self {
            running,
            join: Some(join),
        }
    }

    /// Signal the worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub(crate) fn run(ctx: WorkerContext) {
    info!(sample_rate = ctx.sample_rate, "capture worker started");
    let mut seq: u64 = 0;

    while ctx.running.load(Ordering::Acquire) {
        if let Ok(detail) = ctx.faults.try_recv() {
            let _ = ctx.events.blocking_send(WorkerEvent::CaptureFailed(detail));
            break;
        }

        let samples = match ctx.frames.recv_timeout(POLL) {
            FrameRecv::Frame(samples) => samples,
            FrameRecv::Timeout => continue,
            FrameRecv::Closed => {
                // A fault may have raced the close.
                let event = match ctx.faults.try_recv() {
                    Ok(detail) => WorkerEvent::CaptureFailed(detail),
                    Err(_) => WorkerEvent::CaptureEnded,
                };
                let _ = ctx.events.blocking_send(event);
                break;
            }
        };

        let frame_seq = seq;
        seq += 1;

        match ctx.vad.process(&samples, frame_seq) {
            Ok(Some(event)) => {
                if ctx.events.blocking_send(WorkerEvent::Vad(event)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                if ctx
                    .events
                    .blocking_send(WorkerEvent::VadFailed(e.to_string()))
                    .is_err()
                {
                    break;
                }
            }
        }

        let frame = AudioFrame::from_float(frame_seq, ctx.sample_rate, &samples);
        if ctx.events.blocking_send(WorkerEvent::Frame(frame)).is_err() {
            break;
        }
    }
    debug!(frames = seq, "capture worker exited");
}
