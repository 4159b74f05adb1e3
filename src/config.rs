use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Shared handle to the live configuration.
///
/// Backend and output-method fallbacks persist their choice here for the
/// remainder of the session.
pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub storage: StorageConfig,
    pub vad: VadSettings,
    pub output: OutputConfig,
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Backend name: "alsa" (arecord) or "ffmpeg". Unknown names are
    /// rejected by the factory, not at load time.
    pub method: String,
    /// Capture device, or "default" to let the backend resolve one.
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Internal sample format token (e.g. "s16le"); backends translate.
    pub format: String,
    /// Hard ceiling on a single recording session, in seconds.
    pub max_session_secs: u64,
    /// Grace window between interrupt and kill when stopping, in ms.
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for temporary audio files; system temp when unset.
    pub temp_dir: Option<PathBuf>,
    /// How long a temp file may live before the sweeper deletes it.
    pub retention_mins: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VadSettings {
    /// "low", "medium" or "high".
    pub sensitivity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    Clipboard,
    Keystroke,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub method: OutputMethod,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// External speech-to-text binary invoked with the audio file path.
    pub engine: String,
    pub model_path: PathBuf,
    /// Deadline for one transcription run, in seconds.
    pub timeout_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            method: "ffmpeg".to_string(),
            device: "default".to_string(),
            sample_rate: 16000,
            channels: 1,
            format: "s16le".to_string(),
            max_session_secs: 300,
            stop_grace_ms: 500,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            retention_mins: 30,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            sensitivity: "medium".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            method: OutputMethod::Clipboard,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: "whisper-cli".to_string(),
            model_path: PathBuf::from("models/ggml-base.en.bin"),
            timeout_secs: 120,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Wrap into the shared handle used by components that persist
    /// fallback decisions.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
