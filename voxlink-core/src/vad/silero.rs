//! Silero VAD neural frame classifier.
//!
//! Wraps the Silero VAD ONNX model published at
//! <https://github.com/snakers4/silero-vad>. Supports both the v3/v4 LSTM
//! interface (separate `h`/`c` tensors) and the v5 GRU interface (single
//! `state` tensor).
//!
//! ## Model I/O (v4 LSTM)
//!
//! | Name     | Shape      | DType | Direction |
//! |----------|------------|-------|-----------|
//! | `input`  | `[1, N]`   | f32   | in        |
//! | `sr`     | `[1]`      | i64   | in        |
//! | `h`      | `[2,1,64]` | f32   | in/out    |
//! | `c`      | `[2,1,64]` | f32   | in/out    |
//! | `output` | `[1, 1]`   | f32   | out       |
//!
//! ## Model I/O (v5 GRU)
//!
//! | Name     | Shape       | DType | Direction |
//! |----------|-------------|-------|-----------|
//! | `input`  | `[1, N]`    | f32   | in        |
//! | `sr`     | `[1]`       | i64   | in        |
//! | `state`  | `[2,1,128]` | f32   | in/out    |
//! | `output` | `[1, 1]`    | f32   | out       |
//!
//! `N` is 512 at 16 kHz and 256 at 8 kHz. Frames of any other length are
//! re-windowed internally; a frame that completes no window scores the last
//! known probability.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{info, warn};

use super::FrameClassifier;
use crate::error::{Result, VoxError};

/// v3/v4 LSTM state size: 2 layers × 1 batch × 64 units (each of h and c).
const LSTM_SIZE: usize = 128;
/// v5 GRU state size: 2 layers × 1 batch × 128 units.
const GRU_STATE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SileroIoMode {
    StatefulLstm,
    StatefulGru,
    Stateless,
}

/// Model file location; falls back to the per-user data dir.
pub fn default_model_path() -> PathBuf {
    if let Some(dir) = std::env::var_os("VOXLINK_MODELS_DIR") {
        return PathBuf::from(dir).join("silero_vad.onnx");
    }
    default_models_dir().join("silero_vad.onnx")
}

fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("Lattice Labs").join("Voxlink").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxlink")
            .join("models")
    }
}

/// Neural classifier backed by Silero VAD. The ONNX session is created in
/// `load()` and dropped in `dispose()`.
pub struct SileroClassifier {
    path: PathBuf,
    sample_rate: u32,
    window: usize,
    model: Option<LoadedModel>,
    input_buf: Vec<f32>,
    last_prob: f32,
}

impl SileroClassifier {
    /// # Errors
    /// Returns `VoxError::InvalidConfig` for rates other than 8 and 16 kHz.
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Result<Self> {
        let window = match sample_rate {
            16_000 => 512,
            8_000 => 256,
            other => {
                return Err(VoxError::InvalidConfig(format!(
                    "silero VAD supports 8000 or 16000 Hz, got {other}"
                )))
            }
        };
        Ok(Self {
            path: path.into(),
            sample_rate,
            window,
            model: None,
            input_buf: Vec::with_capacity(window * 2),
            last_prob: 0.0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameClassifier for SileroClassifier {
    fn load(&mut self) -> Result<()> {
        if self.model.is_none() {
            self.model = Some(LoadedModel::open(&self.path)?);
        }
        self.reset();
        Ok(())
    }

    fn score(&mut self, frame: &[f32]) -> Result<f32> {
        let Some(model) = self.model.as_mut() else {
            return Err(VoxError::VadRuntime("silero model not loaded".into()));
        };
        self.input_buf.extend_from_slice(frame);

        let mut best: Option<f32> = None;
        while self.input_buf.len() >= self.window {
            let prob = model.run_window(&self.input_buf[..self.window], self.sample_rate)?;
            self.input_buf.drain(..self.window);
            best = Some(best.map_or(prob, |b| b.max(prob)));
        }
        if let Some(prob) = best {
            self.last_prob = prob;
        }
        Ok(self.last_prob)
    }

    fn reset(&mut self) {
        if let Some(model) = self.model.as_mut() {
            model.reset_state();
        }
        self.input_buf.clear();
        self.last_prob = 0.0;
    }

    fn dispose(&mut self) {
        if self.model.take().is_some() {
            info!(path = ?self.path, "silero VAD session released");
        }
        self.input_buf.clear();
        self.last_prob = 0.0;
    }
}

struct LoadedModel {
    session: Session,
    io_mode: SileroIoMode,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    h_name: Option<String>,
    c_name: Option<String>,
    hn_name: Option<String>,
    cn_name: Option<String>,
    state_name: Option<String>,
    state_out_name: Option<String>,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
}

fn onnx_err(e: impl std::fmt::Display) -> VoxError {
    VoxError::OnnxSession(e.to_string())
}

impl LoadedModel {
    fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VoxError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1_048_576.0)
            .unwrap_or(0.0);

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| VoxError::OnnxSession("silero model has no inputs".into()))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);

        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| VoxError::OnnxSession("silero model has no outputs".into()))?;
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let state_out_name =
            resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]);

        let io_mode =
            if h_name.is_some() && c_name.is_some() && hn_name.is_some() && cn_name.is_some() {
                SileroIoMode::StatefulLstm
            } else if state_name.is_some() {
                SileroIoMode::StatefulGru
            } else {
                SileroIoMode::Stateless
            };

        info!(
            path = ?path,
            size_mb,
            inputs = ?input_names,
            outputs = ?output_names,
            ?io_mode,
            "silero VAD loaded"
        );

        Ok(Self {
            session,
            io_mode,
            input_name,
            sr_name,
            output_name,
            h_name,
            c_name,
            hn_name,
            cn_name,
            state_name,
            state_out_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_STATE_SIZE],
        })
    }

    fn reset_state(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Run one window through the model and carry the recurrent state.
    fn run_window(&mut self, window: &[f32], sample_rate: u32) -> Result<f32> {
        let input_arr =
            Array2::<f32>::from_shape_vec((1, window.len()), window.to_vec()).map_err(onnx_err)?;
        let input_val = Value::from_array(input_arr).map_err(onnx_err)?;

        let mut input_values: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, i64::from(sample_rate));
            let sr_val = Value::from_array(sr_arr).map_err(onnx_err)?;
            input_values.push((sr_name.clone(), sr_val.into()));
        }

        match self.io_mode {
            SileroIoMode::StatefulLstm => {
                let h_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone()).map_err(onnx_err)?;
                let c_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone()).map_err(onnx_err)?;
                if let (Some(h_name), Some(c_name)) = (&self.h_name, &self.c_name) {
                    input_values.push((h_name.clone(), Value::from_array(h_arr).map_err(onnx_err)?.into()));
                    input_values.push((c_name.clone(), Value::from_array(c_arr).map_err(onnx_err)?.into()));
                }
            }
            SileroIoMode::StatefulGru => {
                let state_arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(onnx_err)?;
                if let Some(state_name) = &self.state_name {
                    input_values.push((
                        state_name.clone(),
                        Value::from_array(state_arr).map_err(onnx_err)?.into(),
                    ));
                }
            }
            SileroIoMode::Stateless => {}
        }

        let outputs = self.session.run(input_values).map_err(onnx_err)?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| VoxError::VadRuntime(format!("missing output `{}`", self.output_name)))?;
        let (_, prob_data) = prob_output.try_extract_tensor::<f32>().map_err(onnx_err)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        match self.io_mode {
            SileroIoMode::StatefulLstm => {
                let outs = self
                    .hn_name
                    .as_deref()
                    .zip(self.cn_name.as_deref())
                    .and_then(|(hn, cn)| outputs.get(hn).zip(outputs.get(cn)));
                if let Some((hn_out, cn_out)) = outs {
                    let (_, hn_data) = hn_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    let (_, cn_data) = cn_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    self.h = hn_data.to_vec();
                    self.c = cn_data.to_vec();
                } else {
                    warn!("silero LSTM state outputs missing; switching to stateless");
                    self.io_mode = SileroIoMode::Stateless;
                }
            }
            SileroIoMode::StatefulGru => {
                let out = self
                    .state_out_name
                    .as_deref()
                    .and_then(|name| outputs.get(name));
                if let Some(state_out) = out {
                    let (_, state_data) = state_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    self.state = state_data.to_vec();
                } else {
                    warn!("silero GRU state output missing; switching to stateless");
                    self.io_mode = SileroIoMode::Stateless;
                }
            }
            SileroIoMode::Stateless => {}
        }

        Ok(prob.clamp(0.0, 1.0))
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}
