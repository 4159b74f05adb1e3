// Integration tests for the process supervisor, using `sh` stand-ins for
// the real recording tools under a permissive test policy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use murmur::recorder::supervisor::{ProcessSupervisor, SupervisorConfig, WAV_HEADER_LEN};
use murmur::recorder::{CaptureMode, RecordingArtifact};
use murmur::security::CommandPolicy;
use murmur::storage::{TempFileConfig, TempFileManager};
use murmur::RecorderError;
use tempfile::TempDir;

/// Test policy: anything goes, arguments pass through untouched.
struct AllowAll;

impl CommandPolicy for AllowAll {
    fn is_command_allowed(&self, _name: &str) -> bool {
        true
    }

    fn sanitize_args(&self, args: &[String]) -> Vec<String> {
        args.to_vec()
    }
}

fn test_supervisor(dir: &TempDir) -> ProcessSupervisor {
    let temp = TempFileManager::new(TempFileConfig {
        base_dir: Some(dir.path().to_path_buf()),
        retention: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(600),
    });
    ProcessSupervisor::new(
        "test",
        SupervisorConfig {
            max_session: Duration::from_secs(30),
            stop_grace: Duration::from_millis(500),
            kill_attempts: 3,
            base_dir: None,
        },
        Arc::new(AllowAll),
        temp,
    )
}

fn sh(script: &str) -> (&'static str, Vec<String>) {
    ("sh", vec!["-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn start_stop_produces_artifact_larger_than_header() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    // The supervisor appends the output path, which sh binds to $0.
    let (cmd, args) = sh("head -c 2048 /dev/zero > \"$0\"; sleep 5");
    let path = supervisor
        .start(cmd, &args, CaptureMode::File)
        .await
        .expect("start")
        .expect("file mode returns a path");

    tokio::time::sleep(Duration::from_millis(300)).await;

    match supervisor.stop().await.expect("stop") {
        RecordingArtifact::File(artifact) => {
            assert_eq!(artifact, path);
            let size = std::fs::metadata(&artifact).unwrap().len();
            assert!(size > WAV_HEADER_LEN, "artifact too small: {size}");
        }
        other => panic!("expected file artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn double_start_fails_and_leaves_session_untouched() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let (cmd, args) = sh("printf abc; sleep 5");
    supervisor
        .start(cmd, &args, CaptureMode::Buffer)
        .await
        .expect("first start");

    let second = supervisor.start(cmd, &args, CaptureMode::Buffer).await;
    assert!(matches!(second, Err(RecorderError::AlreadyRecording)));
    assert!(supervisor.is_recording());

    tokio::time::sleep(Duration::from_millis(300)).await;

    // The original session is intact and still delivers its audio.
    match supervisor.stop().await.expect("stop") {
        RecordingArtifact::Buffer(data) => assert_eq!(data, b"abc"),
        other => panic!("expected buffer artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_output_file_is_detected_at_stop() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    // Exits immediately without writing any audio.
    let (cmd, args) = sh("true");
    supervisor
        .start(cmd, &args, CaptureMode::File)
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(100)).await;

    match supervisor.stop().await {
        Err(RecorderError::EmptyAudioFile { size, .. }) => {
            assert!(size <= WAV_HEADER_LEN);
        }
        other => panic!("expected EmptyAudioFile, got {other:?}"),
    }
}

#[tokio::test]
async fn spawn_failure_reports_command() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let result = supervisor
        .start("definitely-not-a-real-recorder", &[], CaptureMode::File)
        .await;

    match result {
        Err(RecorderError::SpawnFailed { command, .. }) => {
            assert_eq!(command, "definitely-not-a-real-recorder");
        }
        other => panic!("expected SpawnFailed, got {other:?}"),
    }
    assert!(!supervisor.is_recording());
}

#[tokio::test]
async fn buffer_mode_reports_levels_per_chunk() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let calls = Arc::new(AtomicU32::new(0));
    let levels = Arc::new(Mutex::new(Vec::new()));
    {
        let calls = Arc::clone(&calls);
        let levels = Arc::clone(&levels);
        supervisor.set_level_callback(Some(Box::new(move |level| {
            calls.fetch_add(1, Ordering::SeqCst);
            levels.lock().unwrap().push(level);
        })));
    }

    // 4096 bytes of silence: level must be exactly zero.
    let (cmd, args) = sh("head -c 4096 /dev/zero; sleep 5");
    supervisor
        .start(cmd, &args, CaptureMode::Buffer)
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(300)).await;

    match supervisor.stop().await.expect("stop") {
        RecordingArtifact::Buffer(data) => assert_eq!(data.len(), 4096),
        other => panic!("expected buffer artifact, got {other:?}"),
    }

    assert!(calls.load(Ordering::SeqCst) > 0, "level callback never ran");
    assert!(levels.lock().unwrap().iter().all(|l| *l == 0.0));
    assert_eq!(supervisor.audio_level(), 0.0);
}

#[tokio::test]
async fn stream_mode_hands_out_live_audio() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let (cmd, args) = sh("printf hello; sleep 5");
    supervisor
        .start(cmd, &args, CaptureMode::Stream)
        .await
        .expect("start");

    let mut stream = supervisor
        .take_audio_stream()
        .await
        .expect("stream receiver");
    // Handed out exactly once.
    assert!(supervisor.take_audio_stream().await.is_none());

    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.recv())
        .await
        .expect("stream data in time")
        .expect("stream open");
    assert_eq!(chunk, b"hello");

    match supervisor.stop().await.expect("stop") {
        RecordingArtifact::Streamed => {}
        other => panic!("expected streamed artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_escalates_when_process_ignores_interrupt() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let (cmd, args) = sh("trap '' TERM; head -c 2048 /dev/zero > \"$0\"; sleep 30");
    supervisor
        .start(cmd, &args, CaptureMode::File)
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let begun = Instant::now();
    let artifact = supervisor.stop().await.expect("stop");
    let elapsed = begun.elapsed();

    assert!(matches!(artifact, RecordingArtifact::File(_)));
    // One failed graceful attempt plus a kill, well under the full ladder.
    assert!(elapsed < Duration::from_secs(3), "stop took {elapsed:?}");
}

#[tokio::test]
async fn cleanup_discards_session_and_artifact() {
    let dir = TempDir::new().unwrap();
    let supervisor = test_supervisor(&dir);

    let (cmd, args) = sh("sleep 30");
    let path = supervisor
        .start(cmd, &args, CaptureMode::File)
        .await
        .expect("start")
        .expect("file path");

    supervisor.cleanup().await;

    assert!(!supervisor.is_recording());
    assert!(!path.exists(), "cleanup should delete the artifact");

    // Idempotent: a second cleanup on an idle supervisor is a no-op.
    supervisor.cleanup().await;
}
