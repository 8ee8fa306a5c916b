//! Persistent CLI settings (JSON file in the user data directory).
//!
//! Nests the session config and adds endpoint and input selection. Command
//! line flags override whatever the file says.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use voxlink_core::VoiceSessionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CliSettings {
    pub session: VoiceSessionConfig,
    /// `ws://` or `wss://` endpoint. `None` runs against the loopback.
    pub endpoint_url: Option<String>,
    pub preferred_input_device: Option<String>,
    /// Stream a WAV file instead of the microphone.
    pub input_wav: Option<PathBuf>,
    /// Write inbound audio to this WAV file.
    pub record_path: Option<PathBuf>,
    /// `energy` or `silero`.
    pub vad_model: String,
    pub vad_model_path: Option<PathBuf>,
    /// RMS that scores 1.0 with the energy classifier.
    pub energy_reference_rms: f32,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            session: VoiceSessionConfig::default(),
            endpoint_url: None,
            preferred_input_device: None,
            input_wav: None,
            record_path: None,
            vad_model: "energy".into(),
            vad_model_path: None,
            energy_reference_rms: 0.04,
        }
    }
}

impl CliSettings {
    pub fn normalize(&mut self) {
        self.endpoint_url = trimmed(self.endpoint_url.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.vad_model = normalize_vad_model(&self.vad_model);
        self.energy_reference_rms = self.energy_reference_rms.clamp(0.001, 1.0);
        self.input_wav = self.input_wav.take().filter(|p| !p.as_os_str().is_empty());
        self.record_path = self.record_path.take().filter(|p| !p.as_os_str().is_empty());
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn normalize_vad_model(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "silero" | "silero-vad" | "onnx" => "silero".into(),
        _ => "energy".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxlink")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("voxlink")
            .join("settings.json")
    }
}

/// Load settings from `path`. A missing file yields the defaults; a file
/// that does not parse or validate is an error.
pub fn load_settings(path: &Path) -> anyhow::Result<CliSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<CliSettings>(&raw)
            .with_context(|| format!("parsing {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CliSettings::default(),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    settings.normalize();
    settings
        .session
        .validate()
        .with_context(|| format!("session config in {}", path.display()))?;
    Ok(settings)
}

#[cfg_attr(not(test), allow(dead_code))]
pub fn save_settings(path: &Path, settings: &CliSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
