pub mod audio_service;
pub mod io_service;

pub use audio_service::{AudioService, RecorderProvider, ServiceState};
pub use io_service::{
    ClipboardChannel, IOService, KeystrokeChannel, OutputChannel, TranscriptionGuard,
};
