//! Session counters.
//!
//! Updated with relaxed atomics from the capture thread, the worker and the
//! driver; read as a [`MetricsSnapshot`] by the UI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub frames_captured: Arc<AtomicUsize>,
    pub frames_sent: AtomicUsize,
    pub frames_suppressed: AtomicUsize,
    pub capture_overruns: Arc<AtomicUsize>,
    pub outbound_overruns: AtomicUsize,
    pub frames_received: AtomicUsize,
    pub frames_played: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub sequence_drops: AtomicUsize,
    pub reconnect_attempts: AtomicUsize,
    pub vad_misfires: AtomicUsize,
    pub remote_errors: AtomicUsize,
}

#[inline]
pub(crate) fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SessionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        let mut snap = MetricsSnapshot {
            frames_captured: load(&self.frames_captured),
            frames_sent: load(&self.frames_sent),
            frames_suppressed: load(&self.frames_suppressed),
            capture_overruns: load(&self.capture_overruns),
            outbound_overruns: load(&self.outbound_overruns),
            frames_received: load(&self.frames_received),
            frames_played: load(&self.frames_played),
            decode_errors: load(&self.decode_errors),
            sequence_drops: load(&self.sequence_drops),
            reconnect_attempts: load(&self.reconnect_attempts),
            vad_misfires: load(&self.vad_misfires),
            remote_errors: load(&self.remote_errors),
            inbound_error_rate: 0.0,
        };
        snap.inbound_error_rate = snap.compute_inbound_error_rate();
        snap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub frames_captured: usize,
    pub frames_sent: usize,
    pub frames_suppressed: usize,
    pub capture_overruns: usize,
    pub outbound_overruns: usize,
    pub frames_received: usize,
    pub frames_played: usize,
    pub decode_errors: usize,
    pub sequence_drops: usize,
    pub reconnect_attempts: usize,
    pub vad_misfires: usize,
    pub remote_errors: usize,
    /// Share of inbound audio messages that failed to decode or arrived
    /// late/duplicated.
    pub inbound_error_rate: f64,
}

impl MetricsSnapshot {
    fn compute_inbound_error_rate(&self) -> f64 {
        let total = self.frames_received + self.decode_errors;
        if total == 0 {
            return 0.0;
        }
        (self.decode_errors + self.sequence_drops) as f64 / total as f64
    }
}
