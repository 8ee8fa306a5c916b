//! Hysteresis speech segmenter.
//!
//! ## Algorithm
//!
//! 1. A frame scoring ≥ `positive` arms the segmenter.
//! 2. While armed, a frame scoring ≥ `positive` extends the run of
//!    consecutive speech frames; a frame in the band `[negative, positive)`
//!    keeps the segmenter armed but breaks the run until speech has started.
//! 3. After `min_speech_frames` consecutive speech frames → `SpeechStart`.
//! 4. A frame scoring < `negative` disarms: `SpeechEnd` if a start fired,
//!    otherwise `Misfire`.

use super::{VadEvent, VadEventKind};
use crate::config::VoiceSessionConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterSettings {
    pub positive_threshold: f32,
    pub negative_threshold: f32,
    pub min_speech_frames: usize,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self::from(&VoiceSessionConfig::default())
    }
}

impl From<&VoiceSessionConfig> for SegmenterSettings {
    fn from(config: &VoiceSessionConfig) -> Self {
        Self {
            positive_threshold: config.positive_speech_threshold,
            negative_threshold: config.negative_speech_threshold,
            min_speech_frames: config.min_speech_frames(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpeechSegmenter {
    settings: SegmenterSettings,
    armed: bool,
    started: bool,
    /// Consecutive frames at or above the positive threshold.
    run: usize,
    /// Frames since the segmenter armed.
    frames: usize,
}

impl SpeechSegmenter {
    pub fn new(settings: SegmenterSettings) -> Self {
        Self {
            settings,
            armed: false,
            started: false,
            run: 0,
            frames: 0,
        }
    }

    pub fn settings(&self) -> SegmenterSettings {
        self.settings
    }

    /// `true` between `SpeechStart` and the matching `SpeechEnd`.
    pub fn is_speaking(&self) -> bool {
        self.started
    }

    /// Feed one frame score. Returns at most one event.
    pub fn push(&mut self, score: f32, frame_seq: u64) -> Option<VadEvent> {
        let s = self.settings;

        if !self.armed {
            if score < s.positive_threshold {
                return None;
            }
            self.armed = true;
            self.run = 1;
            self.frames = 1;
        } else {
            if score < s.negative_threshold {
                let kind = if self.started {
                    VadEventKind::SpeechEnd
                } else {
                    VadEventKind::Misfire
                };
                let frames = self.frames;
                self.reset();
                return Some(VadEvent {
                    kind,
                    frame_seq,
                    frames,
                });
            }
            self.frames += 1;
            if score >= s.positive_threshold {
                self.run += 1;
            } else if !self.started {
                self.run = 0;
            }
        }

        if !self.started && self.run >= s.min_speech_frames.max(1) {
            self.started = true;
            return Some(VadEvent {
                kind: VadEventKind::SpeechStart,
                frame_seq,
                frames: self.frames,
            });
        }
        None
    }

    /// Close any active utterance, e.g. when frame consumption pauses.
    ///
    /// Returns `SpeechEnd` if a start had fired; an unconfirmed burst is
    /// discarded silently.
    pub fn finish(&mut self, frame_seq: u64) -> Option<VadEvent> {
        let event = self.started.then_some(VadEvent {
            kind: VadEventKind::SpeechEnd,
            frame_seq,
            frames: self.frames,
        });
        self.reset();
        event
    }

    pub fn reset(&mut self) {
        self.armed = false;
        self.started = false;
        self.run = 0;
        self.frames = 0;
    }
}
