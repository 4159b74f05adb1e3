pub mod alsa;
pub mod backend;
pub mod factory;
pub mod ffmpeg;
pub mod supervisor;

pub use alsa::AlsaRecorder;
pub use backend::{
    AudioRecorder, CaptureMode, CaptureRequest, RecorderMethod, RecorderSettings,
    RecordingArtifact,
};
pub use factory::{CaptureProbe, DiagnosticsReport, RecorderFactory, RecorderProbe};
pub use ffmpeg::{FfmpegRecorder, FfmpegTuning};
pub use supervisor::{ProcessSupervisor, SupervisorConfig, WAV_HEADER_LEN};
