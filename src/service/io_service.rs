//! Output routing and the transcription-in-progress guard.
//!
//! Recording stop and transcription completion are decoupled in time; a
//! user pasting immediately after stop could read stale clipboard
//! content. The guard closes that window: arming it clears the clipboard
//! and installs a single-slot result handoff that readers can block on,
//! with a fail-safe so the flag never sticks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{OutputMethod, SharedConfig};
use crate::notify::{NotificationEvent, Notifier};

/// How long the guard may stay armed before the fail-safe releases it.
const GUARD_FAILSAFE: Duration = Duration::from_secs(5);

/// One text delivery channel (clipboard or keystroke injection).
pub trait OutputChannel: Send + Sync {
    fn method(&self) -> OutputMethod;

    fn write(&self, text: &str) -> Result<()>;

    /// Remove any stale content. Only meaningful for the clipboard.
    fn clear(&self) -> Result<()>;
}

/// System clipboard channel. The clipboard handle is created per
/// operation; keeping one alive pins platform connections we do not need
/// between recordings.
#[derive(Debug, Default)]
pub struct ClipboardChannel;

impl OutputChannel for ClipboardChannel {
    fn method(&self) -> OutputMethod {
        OutputMethod::Clipboard
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
        clipboard
            .set_text(text.to_string())
            .context("failed to write clipboard")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
        clipboard.clear().context("failed to clear clipboard")?;
        Ok(())
    }
}

/// Types the transcript into the focused window.
#[derive(Debug, Default)]
pub struct KeystrokeChannel;

impl OutputChannel for KeystrokeChannel {
    fn method(&self) -> OutputMethod {
        OutputMethod::Keystroke
    }

    fn write(&self, text: &str) -> Result<()> {
        use enigo::{Enigo, Keyboard, Settings};

        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("failed to initialize keystroke injection: {e}"))?;
        enigo
            .text(text)
            .map_err(|e| anyhow::anyhow!("failed to inject keystrokes: {e}"))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct GuardState {
    in_progress: bool,
    generation: u64,
    result: Option<String>,
}

/// In-progress flag plus single-slot result handoff.
pub struct TranscriptionGuard {
    state: Mutex<GuardState>,
    notify: Notify,
    failsafe: Duration,
}

impl TranscriptionGuard {
    pub fn new(failsafe: Duration) -> Self {
        Self {
            state: Mutex::new(GuardState::default()),
            notify: Notify::new(),
            failsafe,
        }
    }

    /// Arm the guard. Returns the generation used to complete it.
    pub async fn begin(&self) -> u64 {
        let mut state = self.state.lock().await;
        state.in_progress = true;
        state.generation += 1;
        state.result = None;
        state.generation
    }

    /// Deliver the result for `generation` and release waiters. Stale or
    /// duplicate completions are ignored.
    pub async fn complete(&self, generation: u64, result: Option<String>) -> bool {
        let mut state = self.state.lock().await;
        if !state.in_progress || state.generation != generation {
            return false;
        }
        state.in_progress = false;
        state.result = result;
        drop(state);
        self.notify.notify_waiters();
        true
    }

    pub async fn in_progress(&self) -> bool {
        self.state.lock().await.in_progress
    }

    /// Block until the armed transcription completes or the fail-safe
    /// window elapses. Returns immediately when the guard is idle.
    pub async fn wait(&self) -> Option<String> {
        let deadline = Instant::now() + self.failsafe;
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().await;
                if !state.in_progress {
                    return state.result.clone();
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

/// Routes finished text to the configured channel and owns the guard.
pub struct IOService {
    config: SharedConfig,
    guard: Arc<TranscriptionGuard>,
    clipboard: Box<dyn OutputChannel>,
    keystroke: Box<dyn OutputChannel>,
    notifier: Arc<dyn Notifier>,
}

impl IOService {
    pub fn new(config: SharedConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_channels(
            config,
            notifier,
            Box::new(ClipboardChannel),
            Box::new(KeystrokeChannel),
        )
    }

    /// Channel injection point for tests and alternative platforms.
    pub fn with_channels(
        config: SharedConfig,
        notifier: Arc<dyn Notifier>,
        clipboard: Box<dyn OutputChannel>,
        keystroke: Box<dyn OutputChannel>,
    ) -> Self {
        Self {
            config,
            guard: Arc::new(TranscriptionGuard::new(GUARD_FAILSAFE)),
            clipboard,
            keystroke,
            notifier,
        }
    }

    /// Shorten (or stretch) the fail-safe window. Must be called before
    /// the guard is first armed.
    pub fn with_guard_failsafe(mut self, failsafe: Duration) -> Self {
        self.guard = Arc::new(TranscriptionGuard::new(failsafe));
        self
    }

    /// Arm the guard for a new recording cycle. Clears the clipboard when
    /// clipboard mode is active so no reader sees the previous content,
    /// and starts the fail-safe that releases the flag even if
    /// transcription never completes.
    pub async fn begin_transcription(&self) -> u64 {
        let method = self.config.read().await.output.method;
        if method == OutputMethod::Clipboard {
            if let Err(e) = self.clipboard.clear() {
                warn!("could not clear clipboard before transcription: {e:#}");
            }
        }

        let generation = self.guard.begin().await;
        debug!(generation, "transcription guard armed");

        let guard = Arc::clone(&self.guard);
        let failsafe = self.guard.failsafe;
        tokio::spawn(async move {
            tokio::time::sleep(failsafe).await;
            if guard.complete(generation, None).await {
                warn!(generation, "transcription guard released by fail-safe");
            }
        });

        generation
    }

    /// Release the guard with the delivered text. Returns false when the
    /// fail-safe already released this generation.
    pub async fn complete_transcription(&self, generation: u64, result: Option<String>) -> bool {
        self.guard.complete(generation, result).await
    }

    /// Block until the current transcription (if any) is delivered.
    pub async fn wait_for_transcription(&self) -> Option<String> {
        self.guard.wait().await
    }

    pub async fn transcription_in_progress(&self) -> bool {
        self.guard.in_progress().await
    }

    /// Write the transcript through the configured channel, falling back
    /// to the other channel on failure and persisting the switch.
    pub async fn output_text(&self, text: &str) -> Result<()> {
        let configured = self.config.read().await.output.method;
        let (primary, secondary) = match configured {
            OutputMethod::Clipboard => (&self.clipboard, &self.keystroke),
            OutputMethod::Keystroke => (&self.keystroke, &self.clipboard),
        };

        match primary.write(text) {
            Ok(()) => {
                info!(method = ?configured, chars = text.len(), "transcript delivered");
                return Ok(());
            }
            Err(e) => warn!(method = ?configured, "output channel failed: {e:#}"),
        }

        secondary
            .write(text)
            .with_context(|| format!("both output channels failed (primary {configured:?})"))?;

        let fallback = secondary.method();
        self.config.write().await.output.method = fallback;
        self.notifier.event(
            NotificationEvent::OutputFallback,
            &format!("output switched to {fallback:?}"),
        );
        info!(method = ?fallback, chars = text.len(), "transcript delivered via fallback");
        Ok(())
    }
}
