//! Recording lifecycle orchestration.
//!
//! Idle → Recording → Transcribing → Idle, with every error branch
//! returning to Idle so the user-facing toggle can never get stuck.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::io_service::IOService;
use crate::config::SharedConfig;
use crate::error::ServiceError;
use crate::notify::{NotificationEvent, Notifier};
use crate::recorder::{
    AudioRecorder, CaptureRequest, RecorderFactory, RecorderMethod, RecordingArtifact,
};
use crate::storage::TempFileManager;
use crate::transcribe::{sanitize_transcript, ModelManager, Transcriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Recording,
    Transcribing,
}

/// Source of (re)created recorders. The factory implements this; tests
/// substitute mock recorders.
#[async_trait]
pub trait RecorderProvider: Send + Sync {
    async fn provide(&self) -> Result<Box<dyn AudioRecorder>>;
}

#[async_trait]
impl RecorderProvider for RecorderFactory {
    async fn provide(&self) -> Result<Box<dyn AudioRecorder>> {
        Ok(self.create_with_fallback().await?)
    }
}

pub struct AudioService {
    config: SharedConfig,
    provider: Arc<dyn RecorderProvider>,
    transcriber: Arc<dyn Transcriber>,
    model: Arc<dyn ModelManager>,
    io: Arc<IOService>,
    notifier: Arc<dyn Notifier>,
    temp: Arc<TempFileManager>,
    state: Arc<Mutex<ServiceState>>,
    recorder: Arc<Mutex<Option<Box<dyn AudioRecorder>>>>,
    /// Set when the active recorder should be rebuilt before next use
    /// (backend fallback after a capture failure).
    recorder_stale: AtomicBool,
}

impl AudioService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SharedConfig,
        provider: Arc<dyn RecorderProvider>,
        transcriber: Arc<dyn Transcriber>,
        model: Arc<dyn ModelManager>,
        io: Arc<IOService>,
        notifier: Arc<dyn Notifier>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            config,
            provider,
            transcriber,
            model,
            io,
            notifier,
            temp,
            state: Arc::new(Mutex::new(ServiceState::Idle)),
            recorder: Arc::new(Mutex::new(None)),
            recorder_stale: AtomicBool::new(false),
        }
    }

    pub async fn current_state(&self) -> ServiceState {
        *self.state.lock().await
    }

    /// Verify model and recorder readiness, then open a session.
    pub async fn start_recording(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        if *state != ServiceState::Idle {
            return Err(ServiceError::AlreadyRecording);
        }

        self.model
            .model_path()
            .await
            .map_err(|e| ServiceError::ModelUnavailable(format!("{e:#}")))?;

        let mut recorder = self.recorder.lock().await;
        let stale = self.recorder_stale.swap(false, Ordering::SeqCst);
        if recorder.is_none() || stale {
            match self.provider.provide().await {
                Ok(fresh) => *recorder = Some(fresh),
                Err(e) => {
                    return Err(ServiceError::RecorderUnavailable(format!("{e:#}")));
                }
            }
        }
        let active = recorder.as_ref().expect("recorder just ensured");

        let notifier = Arc::clone(&self.notifier);
        active.set_level_callback(Some(Box::new(move |level| notifier.audio_level(level))));

        let request = CaptureRequest {
            monitor_level: true,
            ..CaptureRequest::default()
        };
        if let Err(e) = active.start(request).await {
            self.notifier
                .event(NotificationEvent::RecordingError, "could not start recording");
            return Err(ServiceError::Recorder(e));
        }

        *state = ServiceState::Recording;
        self.notifier.recording_state(true);
        self.notifier
            .event(NotificationEvent::RecordingStarted, "recording");
        Ok(())
    }

    /// Close the session and kick off bounded background transcription.
    ///
    /// Stop failures are absorbed: the state machine returns to Idle and,
    /// when the transcoding backend was active, the pipe backend is
    /// persisted for subsequent attempts.
    pub async fn stop_recording(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        if *state != ServiceState::Recording {
            return Err(ServiceError::NotRecording);
        }

        let mut recorder = self.recorder.lock().await;
        let active = recorder.as_mut().ok_or(ServiceError::NotRecording)?;

        let artifact = match active.stop().await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!("stopping recorder failed: {e}");
                if active.method() == RecorderMethod::Ffmpeg {
                    self.recorder_stale.store(true, Ordering::SeqCst);
                    self.config.write().await.recorder.method =
                        RecorderMethod::Alsa.as_str().to_string();
                    self.notifier.event(
                        NotificationEvent::RecorderFallback,
                        "capture failed, switching to the pipe recorder",
                    );
                } else {
                    self.notifier
                        .event(NotificationEvent::RecordingError, "recording failed");
                }
                *state = ServiceState::Idle;
                self.notifier.recording_state(false);
                return Ok(());
            }
        };

        self.notifier.recording_state(false);
        self.notifier
            .event(NotificationEvent::RecordingStopped, "transcribing");

        let audio_path = match self.artifact_path(artifact).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                // Stream sessions deliver audio while running; nothing
                // left to transcribe here.
                *state = ServiceState::Idle;
                return Ok(());
            }
            Err(e) => {
                error!("could not materialize recording artifact: {e:#}");
                self.notifier
                    .event(NotificationEvent::RecordingError, "recording failed");
                *state = ServiceState::Idle;
                return Ok(());
            }
        };

        // Arm the guard before this call returns so no reader can race
        // the result onto a stale clipboard.
        let generation = self.io.begin_transcription().await;
        *state = ServiceState::Transcribing;

        let deadline = {
            let cfg = self.config.read().await;
            Duration::from_secs(cfg.transcription.timeout_secs)
        };

        let transcriber = Arc::clone(&self.transcriber);
        let io = Arc::clone(&self.io);
        let notifier = Arc::clone(&self.notifier);
        let temp = Arc::clone(&self.temp);
        let service_state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(deadline, transcriber.transcribe(&audio_path)).await;

            match outcome {
                Err(_) => {
                    warn!("transcription exceeded {deadline:?}");
                    notifier.event(NotificationEvent::TranscriptionTimeout, "transcription timed out");
                    io.complete_transcription(generation, None).await;
                }
                Ok(Err(e)) => {
                    error!("transcription failed: {e:#}");
                    notifier.event(NotificationEvent::RecordingError, "transcription failed");
                    io.complete_transcription(generation, None).await;
                }
                Ok(Ok(raw)) => {
                    let text = sanitize_transcript(&raw);
                    if text.is_empty() {
                        notifier.event(NotificationEvent::NoSpeechDetected, "no speech detected");
                        io.complete_transcription(generation, None).await;
                    } else {
                        if let Err(e) = io.output_text(&text).await {
                            error!("delivering transcript failed: {e:#}");
                            notifier.event(NotificationEvent::RecordingError, "output failed");
                        } else {
                            notifier.event(NotificationEvent::TranscriptionComplete, &text);
                        }
                        io.complete_transcription(generation, Some(text)).await;
                    }
                }
            }

            if let Err(e) = temp.remove_file(&audio_path, true) {
                warn!(path = %audio_path.display(), "failed to remove recording: {e:#}");
            }
            *service_state.lock().await = ServiceState::Idle;
        });

        Ok(())
    }

    /// Turn the artifact into a transcribable file: file artifacts pass
    /// through, buffers are spilled to a WAV temp file.
    async fn artifact_path(&self, artifact: RecordingArtifact) -> Result<Option<PathBuf>> {
        match artifact {
            RecordingArtifact::File(path) => Ok(Some(path)),
            RecordingArtifact::Streamed => Ok(None),
            RecordingArtifact::Buffer(data) => {
                let (sample_rate, channels) = {
                    let cfg = self.config.read().await;
                    (cfg.recorder.sample_rate, cfg.recorder.channels)
                };
                let path = self
                    .temp
                    .create_temp_file(None)
                    .context("temp file for buffered recording")?;
                write_wav(&path, &data, sample_rate, channels)?;
                info!(path = %path.display(), bytes = data.len(), "buffered recording spilled");
                Ok(Some(path))
            }
        }
    }

    /// Abandon any active session, e.g. on shutdown.
    pub async fn abort(&self) {
        let mut state = self.state.lock().await;
        if let Some(recorder) = self.recorder.lock().await.as_ref() {
            recorder.cleanup().await;
        }
        *state = ServiceState::Idle;
    }
}

fn write_wav(path: &std::path::Path, pcm: &[u8], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).context("failed to create WAV writer")?;
    for pair in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .context("failed to write sample to WAV")?;
    }
    writer.finalize().context("failed to finalize WAV file")?;
    Ok(())
}
