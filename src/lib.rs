pub mod audio;
pub mod config;
pub mod error;
pub mod notify;
pub mod recorder;
pub mod security;
pub mod service;
pub mod storage;
pub mod transcribe;

pub use audio::{
    ChunkConfig, ChunkProcessor, Sensitivity, SpeechState, VadConfig, VoiceActivityDetector,
};
pub use config::{Config, OutputMethod, SharedConfig};
pub use error::{RecorderError, ServiceError};
pub use notify::{LogNotifier, NotificationEvent, Notifier};
pub use recorder::{
    AudioRecorder, CaptureMode, CaptureRequest, RecorderFactory, RecorderMethod,
    RecordingArtifact,
};
pub use service::{AudioService, IOService, RecorderProvider, ServiceState};
pub use storage::{TempFileConfig, TempFileManager};
pub use transcribe::{sanitize_transcript, ModelManager, Transcriber};
