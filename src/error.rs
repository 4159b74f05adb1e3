use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the recorder backends and their process supervisor.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no recording session is active")]
    NotRecording,

    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("recording produced no usable audio ({} bytes in {})", .size, .path.display())]
    EmptyAudioFile { path: PathBuf, size: u64 },

    #[error("unsupported recording method: {0}")]
    UnsupportedMethod(String),

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("no working recording backend found")]
    NoBackendAvailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("temp file error: {0}")]
    TempFile(String),
}

/// Errors surfaced by the recording lifecycle service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("transcription model is not available: {0}")]
    ModelUnavailable(String),

    #[error("recorder is not available: {0}")]
    RecorderUnavailable(String),

    #[error("transcription deadline exceeded")]
    TranscriptionTimeout,

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}
