//! Audio buffering between the capture thread and the session worker.
//!
//! Two stages:
//!
//! 1. A lock-free SPSC ring (`ringbuf::HeapRb<f32>`) whose `push_slice` is
//!    wait-free and safe to call from the real-time audio callback.
//! 2. A bounded frame queue carrying fixed-size frames to the VAD worker.
//!    When the worker falls behind, the **oldest** frame is evicted and the
//!    overrun counter increments, so capture never blocks.

pub mod framer;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ringbuf::{traits::Split, HeapRb};

pub use framer::Framer;
pub use ringbuf::traits::{Consumer, Producer};

/// Producer half of the sample ring, held by the audio callback.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the sample ring, held by the capture drain thread.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^18 = 262 144 f32 samples ≈ 5.5 s at 48 kHz.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Create a bounded drop-oldest frame queue.
///
/// `overruns` is incremented once per evicted frame.
pub fn frame_queue(capacity: usize, overruns: Arc<AtomicUsize>) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        FrameSender {
            tx,
            evict: rx.clone(),
            overruns,
        },
        FrameReceiver { rx },
    )
}

/// Producer side of the frame queue. Never blocks.
pub struct FrameSender {
    tx: Sender<Vec<f32>>,
    /// Receiver clone used only to evict the oldest frame when full.
    evict: Receiver<Vec<f32>>,
    overruns: Arc<AtomicUsize>,
}

impl FrameSender {
    /// Enqueue a frame, evicting the oldest one if the queue is full.
    pub fn push(&self, frame: Vec<f32>) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.evict.try_recv().is_ok() {
                        self.overruns.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = rejected;
                }
                // Unreachable while `evict` is alive; nothing to deliver to.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Consumer side of the frame queue.
pub struct FrameReceiver {
    rx: Receiver<Vec<f32>>,
}

/// Outcome of a timed receive.
#[derive(Debug, PartialEq)]
pub enum FrameRecv {
    Frame(Vec<f32>),
    Timeout,
    /// Every sender is gone and the queue is drained.
    Closed,
}

impl FrameReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> FrameRecv {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => FrameRecv::Frame(frame),
            Err(RecvTimeoutError::Timeout) => FrameRecv::Timeout,
            Err(RecvTimeoutError::Disconnected) => FrameRecv::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
