// Tests for the transcription guard and the guarded output write: a
// reader arriving between stop and transcription completion must block
// and never observe the pre-transcription clipboard content.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use murmur::config::{Config, OutputMethod};
use murmur::notify::{NotificationEvent, Notifier};
use murmur::service::{IOService, OutputChannel, TranscriptionGuard};

/// In-memory clipboard stand-in.
#[derive(Clone, Default)]
struct FakeClipboard {
    content: Arc<Mutex<Option<String>>>,
    fail_writes: bool,
}

impl FakeClipboard {
    fn holding(text: &str) -> Self {
        Self {
            content: Arc::new(Mutex::new(Some(text.to_string()))),
            fail_writes: false,
        }
    }

    fn broken() -> Self {
        Self {
            content: Arc::new(Mutex::new(None)),
            fail_writes: true,
        }
    }

    fn read(&self) -> Option<String> {
        self.content.lock().unwrap().clone()
    }
}

impl OutputChannel for FakeClipboard {
    fn method(&self) -> OutputMethod {
        OutputMethod::Clipboard
    }

    fn write(&self, text: &str) -> Result<()> {
        if self.fail_writes {
            bail!("clipboard unavailable");
        }
        *self.content.lock().unwrap() = Some(text.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.content.lock().unwrap() = None;
        Ok(())
    }
}

/// Keystroke stand-in that records everything typed.
#[derive(Clone, Default)]
struct FakeTyper {
    typed: Arc<Mutex<Vec<String>>>,
}

impl OutputChannel for FakeTyper {
    fn method(&self) -> OutputMethod {
        OutputMethod::Keystroke
    }

    fn write(&self, text: &str) -> Result<()> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl Notifier for CollectingNotifier {
    fn event(&self, event: NotificationEvent, _detail: &str) {
        self.events.lock().unwrap().push(event);
    }

    fn recording_state(&self, _active: bool) {}
}

#[tokio::test]
async fn wait_returns_immediately_when_guard_is_idle() {
    let guard = TranscriptionGuard::new(Duration::from_secs(5));
    let begun = Instant::now();
    assert_eq!(guard.wait().await, None);
    assert!(begun.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn waiter_blocks_until_completion_and_sees_the_result() {
    let guard = Arc::new(TranscriptionGuard::new(Duration::from_secs(5)));
    let generation = guard.begin().await;

    let waiter = {
        let guard = Arc::clone(&guard);
        tokio::spawn(async move {
            let begun = Instant::now();
            let result = guard.wait().await;
            (result, begun.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(guard.complete(generation, Some("fresh text".to_string())).await);

    let (result, waited) = waiter.await.unwrap();
    assert_eq!(result.as_deref(), Some("fresh text"));
    assert!(waited >= Duration::from_millis(140), "waiter returned early");
}

#[tokio::test]
async fn wait_gives_up_at_the_failsafe_deadline() {
    let guard = TranscriptionGuard::new(Duration::from_millis(200));
    guard.begin().await;

    let begun = Instant::now();
    assert_eq!(guard.wait().await, None);
    let waited = begun.elapsed();
    assert!(waited >= Duration::from_millis(190));
    assert!(waited < Duration::from_secs(2));
}

#[tokio::test]
async fn stale_completion_is_ignored() {
    let guard = TranscriptionGuard::new(Duration::from_secs(5));
    let first = guard.begin().await;
    assert!(guard.complete(first, Some("one".to_string())).await);

    let second = guard.begin().await;
    assert!(!guard.complete(first, Some("ghost".to_string())).await);
    assert!(guard.in_progress().await, "stale completion must not release");
    assert!(guard.complete(second, Some("two".to_string())).await);
}

#[tokio::test]
async fn begin_transcription_clears_stale_clipboard_content() {
    let clipboard = FakeClipboard::holding("stale paste");
    let io = IOService::with_channels(
        Config::default().into_shared(),
        Arc::new(CollectingNotifier::default()),
        Box::new(clipboard.clone()),
        Box::new(FakeTyper::default()),
    );

    let generation = io.begin_transcription().await;

    assert_eq!(clipboard.read(), None, "stale content must be gone");
    assert!(io.transcription_in_progress().await);

    io.complete_transcription(generation, Some("new words".to_string()))
        .await;
    assert!(!io.transcription_in_progress().await);
}

#[tokio::test]
async fn reader_never_observes_pre_transcription_content() {
    let clipboard = FakeClipboard::holding("old result");
    let io = Arc::new(IOService::with_channels(
        Config::default().into_shared(),
        Arc::new(CollectingNotifier::default()),
        Box::new(clipboard.clone()),
        Box::new(FakeTyper::default()),
    ));

    let generation = io.begin_transcription().await;

    let reader = {
        let io = Arc::clone(&io);
        tokio::spawn(async move { io.wait_for_transcription().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    io.output_text("brand new").await.unwrap();
    io.complete_transcription(generation, Some("brand new".to_string()))
        .await;

    let seen = reader.await.unwrap();
    assert_eq!(seen.as_deref(), Some("brand new"));
    assert_eq!(clipboard.read().as_deref(), Some("brand new"));
}

#[tokio::test]
async fn failsafe_releases_guard_when_transcription_never_completes() {
    let io = IOService::with_channels(
        Config::default().into_shared(),
        Arc::new(CollectingNotifier::default()),
        Box::new(FakeClipboard::default()),
        Box::new(FakeTyper::default()),
    )
    .with_guard_failsafe(Duration::from_millis(200));

    io.begin_transcription().await;
    assert!(io.transcription_in_progress().await);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(
        !io.transcription_in_progress().await,
        "fail-safe must clear the in-progress flag"
    );
}

#[tokio::test]
async fn output_falls_back_to_keystrokes_and_persists_the_switch() {
    let typer = FakeTyper::default();
    let notifier = Arc::new(CollectingNotifier::default());
    let shared = Config::default().into_shared();
    let io = IOService::with_channels(
        Arc::clone(&shared),
        notifier.clone(),
        Box::new(FakeClipboard::broken()),
        Box::new(typer.clone()),
    );

    io.output_text("hello").await.expect("fallback should succeed");

    assert_eq!(typer.typed.lock().unwrap().as_slice(), ["hello"]);
    assert_eq!(shared.read().await.output.method, OutputMethod::Keystroke);
    assert!(notifier
        .events
        .lock()
        .unwrap()
        .contains(&NotificationEvent::OutputFallback));

    // Subsequent writes go straight to the fallback channel.
    io.output_text("again").await.unwrap();
    assert_eq!(typer.typed.lock().unwrap().len(), 2);
}
