//! `voxlink`: runs one voice session from the command line.
//!
//! Captures from the microphone (or a WAV file), streams speech to a
//! WebSocket endpoint (or the in-process loopback) and optionally records
//! inbound audio. Status events print as JSON lines; session metrics print
//! on exit.

mod recorder;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use voxlink_core::audio::list_input_devices;
use voxlink_core::{
    CaptureDevice, ConnectionStatus, Connector, EnergyClassifier, FrameClassifier,
    LoopbackConnector, MicCapture, NullPlayback, PlaybackSink, SessionParts, VoiceSession,
    WavCapture, WsConnector,
};

use recorder::WavRecorder;
use settings::{default_settings_path, load_settings, CliSettings};

const USAGE: &str = "Usage: voxlink [--config <settings.json>] [--url <ws://...>] [--loopback]
               [--wav <file>] [--device <name>] [--record <out.wav>]
               [--seconds <n>] [--list-devices]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    url: Option<String>,
    loopback: bool,
    wav: Option<PathBuf>,
    device: Option<String>,
    record: Option<PathBuf>,
    seconds: Option<u64>,
    list_devices: bool,
}

impl Args {
    /// Flags win over the settings file.
    fn apply(&self, settings: &mut CliSettings) {
        if let Some(url) = &self.url {
            settings.endpoint_url = Some(url.clone());
        }
        if self.loopback {
            settings.endpoint_url = None;
        }
        if let Some(wav) = &self.wav {
            settings.input_wav = Some(wav.clone());
        }
        if let Some(device) = &self.device {
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(record) = &self.record {
            settings.record_path = Some(record.clone());
        }
        settings.normalize();
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().ok_or_else(|| format!("missing value for {flag}"));
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--url" => parsed.url = Some(value("--url")?),
            "--loopback" => parsed.loopback = true,
            "--wav" => parsed.wav = Some(PathBuf::from(value("--wav")?)),
            "--device" => parsed.device = Some(value("--device")?),
            "--record" => parsed.record = Some(PathBuf::from(value("--record")?)),
            "--seconds" => {
                let raw = value("--seconds")?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid value for --seconds: {raw}"))?;
                parsed.seconds = Some(secs.max(1));
            }
            "--list-devices" => parsed.list_devices = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}\n{USAGE}")),
        }
    }
    if parsed.loopback && parsed.url.is_some() {
        return Err("--loopback and --url are mutually exclusive".into());
    }
    Ok(parsed)
}

fn build_capture(settings: &CliSettings) -> Box<dyn CaptureDevice> {
    let rate = settings.session.sample_rate;
    match &settings.input_wav {
        Some(path) => Box::new(WavCapture::new(path, rate)),
        None => Box::new(MicCapture::new(rate, settings.preferred_input_device.clone())),
    }
}

fn build_classifier(settings: &CliSettings) -> anyhow::Result<Box<dyn FrameClassifier>> {
    match settings.vad_model.as_str() {
        "silero" => silero_classifier(settings),
        _ => Ok(Box::new(EnergyClassifier::new(settings.energy_reference_rms))),
    }
}

#[cfg(feature = "onnx")]
fn silero_classifier(settings: &CliSettings) -> anyhow::Result<Box<dyn FrameClassifier>> {
    use voxlink_core::vad::silero::default_model_path;
    use voxlink_core::SileroClassifier;

    let path = settings
        .vad_model_path
        .clone()
        .unwrap_or_else(default_model_path);
    Ok(Box::new(SileroClassifier::new(path, settings.session.sample_rate)?))
}

#[cfg(not(feature = "onnx"))]
fn silero_classifier(_settings: &CliSettings) -> anyhow::Result<Box<dyn FrameClassifier>> {
    anyhow::bail!("the silero VAD requires building voxlink with the 'onnx' feature")
}

fn build_connector(settings: &CliSettings) -> anyhow::Result<Arc<dyn Connector>> {
    match &settings.endpoint_url {
        Some(url) => Ok(Arc::new(WsConnector::new(url.as_str())?)),
        None => Ok(Arc::new(LoopbackConnector::new())),
    }
}

fn build_playback(settings: &CliSettings) -> Box<dyn PlaybackSink> {
    match &settings.record_path {
        Some(path) => {
            let recorder = WavRecorder::new(path);
            info!(path = %recorder.path().display(), "recording inbound audio");
            Box::new(recorder)
        }
        None => Box::new(NullPlayback),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.list_devices {
        println!("{}", serde_json::to_string_pretty(&list_input_devices())?);
        return Ok(());
    }

    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path)?;
    args.apply(&mut settings);
    info!(
        settings = %settings_path.display(),
        endpoint = settings.endpoint_url.as_deref().unwrap_or("loopback"),
        vad = settings.vad_model.as_str(),
        "starting voxlink"
    );

    let session = VoiceSession::new(
        settings.session.clone(),
        SessionParts {
            capture: build_capture(&settings),
            classifier: build_classifier(&settings)?,
            connector: build_connector(&settings)?,
            playback: build_playback(&settings),
        },
    )?;

    let mut status_rx = session.subscribe_status();
    let mut vad_rx = session.subscribe_vad();
    session.start().await.context("starting session")?;

    let deadline = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut failure: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("time limit reached");
                break;
            }
            ev = status_rx.recv() => match ev {
                Ok(ev) => {
                    println!("{}", serde_json::to_string(&ev)?);
                    match ev.status {
                        ConnectionStatus::Error => {
                            failure = Some(ev.detail.unwrap_or_else(|| "session failed".into()));
                            break;
                        }
                        ConnectionStatus::Disconnected => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "status events lagged"),
                Err(RecvError::Closed) => break,
            },
            ev = vad_rx.recv() => {
                if let Ok(ev) = ev {
                    debug!(state = ?ev.snapshot.state, event = ?ev.event, "vad");
                }
            }
        }
    }

    session.stop().await?;
    println!("{}", serde_json::to_string_pretty(&session.metrics())?);

    match failure {
        Some(detail) => anyhow::bail!("session failed: {detail}"),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxlink=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("voxlink: {e:#}");
        std::process::exit(1);
    }
}
