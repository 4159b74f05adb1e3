//! Transcoding backend built on `ffmpeg`.
//!
//! ffmpeg starts slower and buffers its final packets, so this backend
//! wraps the supervisor contract with three timing hooks: a warm-up wait
//! after start, a post-roll delay before stop, and a single bounded flush
//! retry when stop finds an empty file. It also resolves the capture
//! source when the configured device is the generic default.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{
    AudioRecorder, CaptureMode, CaptureRequest, RecorderMethod, RecorderSettings,
    RecordingArtifact,
};
use super::supervisor::{validate_wav_artifact, ProcessSupervisor, SupervisorConfig};
use crate::audio::LevelCallback;
use crate::error::RecorderError;
use crate::security::CommandPolicy;
use crate::storage::TempFileManager;

/// Empirically tuned windows for ffmpeg's startup and flush latency.
/// Treat as knobs, not constants of nature; verify against target
/// hardware when they matter.
#[derive(Debug, Clone)]
pub struct FfmpegTuning {
    /// Minimum payload the warm-up wait polls for, in ms of audio.
    pub warmup_payload_ms: u64,
    pub warmup_poll: Duration,
    pub warmup_ceiling: Duration,
    /// Delay before stopping, to avoid clipping trailing speech.
    pub post_roll: Duration,
    /// Extra wait before the single re-validation after an empty stop.
    pub flush_wait: Duration,
}

impl Default for FfmpegTuning {
    fn default() -> Self {
        Self {
            warmup_payload_ms: 50,
            warmup_poll: Duration::from_millis(50),
            warmup_ceiling: Duration::from_millis(2500),
            post_roll: Duration::from_millis(600),
            flush_wait: Duration::from_millis(1800),
        }
    }
}

pub struct FfmpegRecorder {
    supervisor: ProcessSupervisor,
    settings: RecorderSettings,
    tuning: FfmpegTuning,
    policy: Arc<dyn CommandPolicy>,
}

impl FfmpegRecorder {
    pub fn new(
        settings: RecorderSettings,
        supervisor_config: SupervisorConfig,
        tuning: FfmpegTuning,
        policy: Arc<dyn CommandPolicy>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(
                "ffmpeg",
                supervisor_config,
                Arc::clone(&policy),
                temp,
            ),
            settings,
            tuning,
            policy,
        }
    }

    fn build_args(&self, source: &str, mode: CaptureMode) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "pulse".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-ar".to_string(),
            self.settings.sample_rate.to_string(),
            "-ac".to_string(),
            self.settings.channels.to_string(),
        ];

        match mode {
            // Overwrite the pre-created temp file; path appended by the
            // supervisor.
            CaptureMode::File => args.push("-y".to_string()),
            CaptureMode::Buffer | CaptureMode::Stream => {
                args.extend([
                    "-f".to_string(),
                    self.settings.format.clone(),
                    "-".to_string(),
                ]);
            }
        }

        args
    }

    /// Resolve the capture source. Anything other than the literal
    /// default is taken as-is; for the default we ask PulseAudio for its
    /// sources and pick the most microphone-looking one.
    async fn resolve_source(&self) -> String {
        if self.settings.device != "default" {
            return self.settings.device.clone();
        }

        if !self.policy.is_command_allowed("pactl") {
            return "default".to_string();
        }

        let output = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::process::Command::new("pactl")
                .args(["list", "short", "sources"])
                .output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                let listing = String::from_utf8_lossy(&out.stdout);
                let names: Vec<String> = listing
                    .lines()
                    .filter_map(|line| line.split_whitespace().nth(1))
                    .map(str::to_string)
                    .collect();
                match choose_source(&names) {
                    Some(source) => {
                        info!(source, "resolved default capture source");
                        source
                    }
                    None => "default".to_string(),
                }
            }
            _ => {
                debug!("source enumeration unavailable, using default");
                "default".to_string()
            }
        }
    }

    /// Poll the output file until it holds a minimal payload, so a caller
    /// stopping immediately after start does not read a truncated file.
    async fn warm_up(&self, path: &Path) {
        let bytes_per_sec =
            self.settings.sample_rate as u64 * self.settings.channels as u64 * 2;
        let min_size = 44 + bytes_per_sec * self.tuning.warmup_payload_ms / 1000;

        let deadline = Instant::now() + self.tuning.warmup_ceiling;
        loop {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size >= min_size {
                debug!(size, "warm-up complete");
                return;
            }
            if Instant::now() >= deadline {
                warn!(size, min_size, "warm-up ceiling reached before payload appeared");
                return;
            }
            tokio::time::sleep(self.tuning.warmup_poll).await;
        }
    }
}

/// Prefer a non-monitor, non-bluetooth source named like an input; fall
/// back to the first non-monitor source.
fn choose_source(names: &[String]) -> Option<String> {
    let non_monitor = |name: &&String| !name.contains(".monitor");

    names
        .iter()
        .filter(non_monitor)
        .find(|name| name.contains("input") && !name.contains("bluez"))
        .or_else(|| names.iter().find(non_monitor))
        .cloned()
}

#[async_trait]
impl AudioRecorder for FfmpegRecorder {
    fn method(&self) -> RecorderMethod {
        RecorderMethod::Ffmpeg
    }

    async fn start(&self, request: CaptureRequest) -> Result<(), RecorderError> {
        let mode = request.capture_mode(self.settings.sample_rate);
        let source = self.resolve_source().await;
        let args = self.build_args(&source, mode);

        let output_path = self
            .supervisor
            .start(RecorderMethod::Ffmpeg.tool(), &args, mode)
            .await?;

        if let Some(path) = output_path {
            self.warm_up(&path).await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<RecordingArtifact, RecorderError> {
        // Post-roll: ffmpeg is still draining the last packets of speech.
        tokio::time::sleep(self.tuning.post_roll).await;

        match self.supervisor.stop().await {
            Ok(artifact) => Ok(artifact),
            Err(RecorderError::EmptyAudioFile { path, size }) if path.is_absolute() => {
                // Known buffering behavior: give the muxer one flush
                // window and re-validate before surfacing the failure.
                info!(
                    path = %path.display(),
                    "empty file at stop, waiting one flush window"
                );
                tokio::time::sleep(self.tuning.flush_wait).await;
                match validate_wav_artifact(&path) {
                    Ok(()) => {
                        info!(path = %path.display(), "flush retry recovered the recording");
                        Ok(RecordingArtifact::File(path))
                    }
                    Err(_) => Err(RecorderError::EmptyAudioFile { path, size }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn cleanup(&self) {
        self.supervisor.cleanup().await;
    }

    fn is_recording(&self) -> bool {
        self.supervisor.is_recording()
    }

    fn set_level_callback(&self, callback: Option<LevelCallback>) {
        self.supervisor.set_level_callback(callback);
    }

    fn audio_level(&self) -> f32 {
        self.supervisor.audio_level()
    }

    async fn take_audio_stream(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.supervisor.take_audio_stream().await
    }
}
