//! User-facing notification sinks.
//!
//! The desktop notification backend and tray UI are collaborators; the
//! service layer only emits named events, recording-state flips and level
//! updates through this trait. Failures are delivered as short events,
//! never as raw process output.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    RecordingStarted,
    RecordingStopped,
    TranscriptionComplete,
    NoSpeechDetected,
    TranscriptionTimeout,
    RecorderFallback,
    OutputFallback,
    RecordingError,
}

pub trait Notifier: Send + Sync {
    fn event(&self, event: NotificationEvent, detail: &str);

    /// Recording-state flip for the UI toggle.
    fn recording_state(&self, active: bool);

    /// Best-effort level updates while a session is open.
    fn audio_level(&self, _level: f32) {}
}

/// Default sink: structured log lines.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn event(&self, event: NotificationEvent, detail: &str) {
        match event {
            NotificationEvent::RecordingError
            | NotificationEvent::TranscriptionTimeout
            | NotificationEvent::RecorderFallback
            | NotificationEvent::OutputFallback => warn!(?event, detail, "notification"),
            _ => info!(?event, detail, "notification"),
        }
    }

    fn recording_state(&self, active: bool) {
        info!(active, "recording state");
    }
}
