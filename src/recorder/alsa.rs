//! Pipe-capture backend built on `arecord`.
//!
//! `arecord` writes a WAV container directly, so this backend is pure
//! argument building on top of the supervisor: no warm-up or flush
//! handling is needed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::backend::{
    AudioRecorder, CaptureMode, CaptureRequest, RecorderMethod, RecorderSettings,
    RecordingArtifact,
};
use super::supervisor::{ProcessSupervisor, SupervisorConfig};
use crate::audio::LevelCallback;
use crate::error::RecorderError;
use crate::security::CommandPolicy;
use crate::storage::TempFileManager;

pub struct AlsaRecorder {
    supervisor: ProcessSupervisor,
    settings: RecorderSettings,
}

impl AlsaRecorder {
    pub fn new(
        settings: RecorderSettings,
        supervisor_config: SupervisorConfig,
        policy: Arc<dyn CommandPolicy>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            supervisor: ProcessSupervisor::new("alsa", supervisor_config, policy, temp),
            settings,
        }
    }

    fn build_args(&self, mode: CaptureMode) -> Vec<String> {
        let container = match mode {
            // The temp file path is appended by the supervisor.
            CaptureMode::File => "wav",
            // Raw PCM on stdout for the in-process sinks.
            CaptureMode::Buffer | CaptureMode::Stream => "raw",
        };

        vec![
            "-D".to_string(),
            self.settings.device.clone(),
            "-f".to_string(),
            translate_format(&self.settings.format),
            "-r".to_string(),
            self.settings.sample_rate.to_string(),
            "-c".to_string(),
            self.settings.channels.to_string(),
            "-t".to_string(),
            container.to_string(),
        ]
    }
}

/// Map internal format tokens to `arecord`'s names. Unrecognized tokens
/// pass through unchanged so new formats work without a table update.
pub fn translate_format(token: &str) -> String {
    match token {
        "s16le" => "S16_LE",
        "s24le" => "S24_LE",
        "s32le" => "S32_LE",
        "f32le" => "FLOAT_LE",
        "u8" => "U8",
        other => other,
    }
    .to_string()
}

#[async_trait]
impl AudioRecorder for AlsaRecorder {
    fn method(&self) -> RecorderMethod {
        RecorderMethod::Alsa
    }

    async fn start(&self, request: CaptureRequest) -> Result<(), RecorderError> {
        let mode = request.capture_mode(self.settings.sample_rate);
        let args = self.build_args(mode);
        self.supervisor
            .start(RecorderMethod::Alsa.tool(), &args, mode)
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<RecordingArtifact, RecorderError> {
        self.supervisor.stop().await
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_formats_translate_to_alsa_names() {
        assert_eq!(translate_format("s16le"), "S16_LE");
        assert_eq!(translate_format("s32le"), "S32_LE");
        assert_eq!(translate_format("f32le"), "FLOAT_LE");
    }

    #[test]
    fn unknown_formats_pass_through() {
        assert_eq!(translate_format("dsd64"), "dsd64");
    }
}
