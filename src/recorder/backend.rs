use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::LevelCallback;
use crate::error::RecorderError;

/// Where a session's audio ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// The external tool writes a WAV file managed by the temp-file store.
    File,
    /// Raw PCM is collected into an in-process buffer.
    Buffer,
    /// Raw PCM is handed to the consumer as a live byte stream.
    Stream,
}

/// Caller hints that select the capture mode at session start.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    /// Expected recording length, when the caller knows it (push-to-talk
    /// interactions are typically a few seconds).
    pub expected_duration: Option<Duration>,
    /// Whether the UI wants live level updates.
    pub monitor_level: bool,
    /// Whether the consumer wants the live stream itself.
    pub stream: bool,
}

impl CaptureRequest {
    /// Short, low-rate recordings skip the file system; everything else
    /// records to a file.
    pub fn capture_mode(&self, sample_rate: u32) -> CaptureMode {
        if self.stream {
            return CaptureMode::Stream;
        }
        let short = self
            .expected_duration
            .map(|d| d <= Duration::from_secs(10))
            .unwrap_or(false);
        if short && sample_rate <= 16_000 && self.monitor_level {
            CaptureMode::Buffer
        } else {
            CaptureMode::File
        }
    }
}

/// What a finished session produced.
#[derive(Debug)]
pub enum RecordingArtifact {
    File(PathBuf),
    Buffer(Vec<u8>),
    /// Stream sessions deliver their audio while running; nothing is left
    /// to hand over at stop.
    Streamed,
}

/// Known recorder backends, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderMethod {
    Alsa,
    Ffmpeg,
}

impl RecorderMethod {
    /// Fixed priority order used by fallback selection.
    pub const PRIORITY: [RecorderMethod; 2] = [RecorderMethod::Alsa, RecorderMethod::Ffmpeg];

    pub fn parse(name: &str) -> Result<Self, RecorderError> {
        match name {
            "alsa" | "arecord" => Ok(Self::Alsa),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(RecorderError::UnsupportedMethod(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alsa => "alsa",
            Self::Ffmpeg => "ffmpeg",
        }
    }

    /// The external tool this backend spawns.
    pub fn tool(&self) -> &'static str {
        match self {
            Self::Alsa => "arecord",
            Self::Ffmpeg => "ffmpeg",
        }
    }
}

impl std::fmt::Display for RecorderMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture parameters shared by all backends.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Internal format token, e.g. "s16le".
    pub format: String,
}

impl From<&crate::config::RecorderConfig> for RecorderSettings {
    fn from(cfg: &crate::config::RecorderConfig) -> Self {
        Self {
            device: cfg.device.clone(),
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            format: cfg.format.clone(),
        }
    }
}

/// One concrete recording backend.
///
/// Implementations own at most one active session at a time; `start` while
/// active fails with `AlreadyRecording` and leaves the session untouched.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    fn method(&self) -> RecorderMethod;

    async fn start(&self, request: CaptureRequest) -> Result<(), RecorderError>;

    async fn stop(&self) -> Result<RecordingArtifact, RecorderError>;

    /// Tear down any lingering session and its artifacts. Idempotent.
    async fn cleanup(&self);

    fn is_recording(&self) -> bool;

    /// Replace the single level-observer slot.
    fn set_level_callback(&self, callback: Option<LevelCallback>);

    /// Most recent normalized audio level.
    fn audio_level(&self) -> f32;

    /// Hand out the live stream receiver (stream sessions, once).
    async fn take_audio_stream(&self) -> Option<mpsc::Receiver<Vec<u8>>>;
}
