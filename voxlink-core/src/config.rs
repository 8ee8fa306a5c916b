//! Voice session configuration.
//!
//! Owned by the session at construction and immutable afterwards. A config
//! change means tearing the session down and building a new one.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

/// What the session does with outbound audio once the VAD adapter has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VadFailurePolicy {
    /// Keep the session up and transmit every frame while connected.
    PassThrough,
    /// Treat the VAD failure as fatal: the session moves to `error`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoiceSessionConfig {
    /// Session sample rate (Hz). Capture is resampled to this rate.
    pub sample_rate: u32,
    /// Samples per VAD frame. 512 @ 16 kHz = 32 ms.
    pub frame_samples: usize,
    /// Minimum sustained speech before `speechStart` fires.
    pub min_speech_duration_ms: u32,
    /// Score at or above which a frame counts as speech, in [0, 1].
    pub positive_speech_threshold: f32,
    /// Score below which an active utterance ends, in [0, 1].
    pub negative_speech_threshold: f32,
    pub auto_reconnect: bool,
    /// First reconnect delay; doubles per attempt up to `max_reconnect_backoff_ms`.
    pub reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
    /// Retries after the first failure before giving up.
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub vad_load_timeout_ms: u64,
    /// Frames kept while connected-but-silent and flushed on `speechStart`.
    pub pre_pad_frames: usize,
    /// Capture queue depth before the oldest frame is dropped.
    pub capture_queue_frames: usize,
    /// Inbound frames held while waiting for a missing sequence number.
    pub reorder_window: usize,
    pub vad_failure_policy: VadFailurePolicy,
    /// Cooperative shutdown budget before resources are forcibly released.
    pub stop_grace_ms: u64,
}

impl Default for VoiceSessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 512,
            min_speech_duration_ms: 250,
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.35,
            auto_reconnect: true,
            reconnect_backoff_ms: 500,
            max_reconnect_backoff_ms: 8_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 5_000,
            vad_load_timeout_ms: 10_000,
            pre_pad_frames: 10,
            capture_queue_frames: 64,
            reorder_window: 8,
            vad_failure_policy: VadFailurePolicy::PassThrough,
            stop_grace_ms: 2_000,
        }
    }
}

impl VoiceSessionConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VoxError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return invalid("sampleRate must be positive".into());
        }
        if self.frame_samples == 0 {
            return invalid("frameSamples must be positive".into());
        }
        for (name, value) in [
            ("positiveSpeechThreshold", self.positive_speech_threshold),
            ("negativeSpeechThreshold", self.negative_speech_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.negative_speech_threshold > self.positive_speech_threshold {
            return invalid(format!(
                "negativeSpeechThreshold ({}) must not exceed positiveSpeechThreshold ({})",
                self.negative_speech_threshold, self.positive_speech_threshold
            ));
        }
        if self.reconnect_backoff_ms == 0 {
            return invalid("reconnectBackoffMs must be positive".into());
        }
        if self.max_reconnect_backoff_ms < self.reconnect_backoff_ms {
            return invalid("maxReconnectBackoffMs must be >= reconnectBackoffMs".into());
        }
        if self.connect_timeout_ms == 0 || self.vad_load_timeout_ms == 0 {
            return invalid("timeouts must be positive".into());
        }
        if self.capture_queue_frames == 0 {
            return invalid("captureQueueFrames must be positive".into());
        }
        Ok(())
    }

    /// Consecutive above-threshold frames needed before `speechStart`.
    pub fn min_speech_frames(&self) -> usize {
        let samples = self.min_speech_duration_ms as u64 * self.sample_rate as u64 / 1000;
        let frame = self.frame_samples.max(1) as u64;
        (samples.div_ceil(frame) as usize).max(1)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn vad_load_timeout(&self) -> Duration {
        Duration::from_millis(self.vad_load_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles from
    /// `reconnect_backoff_ms`, capped at `max_reconnect_backoff_ms`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .reconnect_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_reconnect_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        VoiceSessionConfig::default().validate().unwrap();
    }

    #[test]
    fn min_speech_frames_rounds_up() {
        let cfg = VoiceSessionConfig::default();
        // 250 ms @ 16 kHz = 4000 samples / 512 = 7.8 → 8
        assert_eq!(cfg.min_speech_frames(), 8);

        let cfg = VoiceSessionConfig {
            min_speech_duration_ms: 0,
            ..VoiceSessionConfig::default()
        };
        assert_eq!(cfg.min_speech_frames(), 1);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let cfg = VoiceSessionConfig {
            positive_speech_threshold: 0.3,
            negative_speech_threshold: 0.6,
            ..VoiceSessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(VoxError::InvalidConfig(_))));
    }

    #[test]
    fn threshold_outside_unit_range_is_rejected() {
        let cfg = VoiceSessionConfig {
            positive_speech_threshold: 1.5,
            ..VoiceSessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_uses_camel_case_and_fills_defaults() {
        let cfg = VoiceSessionConfig::from_json_str(
            r#"{ "sampleRate": 8000, "autoReconnect": false, "vadFailurePolicy": "fail" }"#,
        )
        .unwrap();
        assert_eq!(cfg.sample_rate, 8_000);
        assert!(!cfg.auto_reconnect);
        assert_eq!(cfg.vad_failure_policy, VadFailurePolicy::Fail);
        assert_eq!(cfg.frame_samples, 512);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir().join(format!("voxlink-config-{}", std::process::id()));
        let path = dir.join("session.json");
        let cfg = VoiceSessionConfig {
            reconnect_backoff_ms: 250,
            pre_pad_frames: 3,
            ..VoiceSessionConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = VoiceSessionConfig::load(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn reconnect_delay_doubles_up_to_the_cap() {
        let cfg = VoiceSessionConfig {
            reconnect_backoff_ms: 500,
            max_reconnect_backoff_ms: 3_000,
            ..VoiceSessionConfig::default()
        };
        let delays: Vec<u64> = (1..=5)
            .map(|n| cfg.reconnect_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
        assert_eq!(cfg.reconnect_delay(200), Duration::from_millis(3_000));
    }
}
