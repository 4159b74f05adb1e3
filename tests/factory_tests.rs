// Fallback selection tests for the recorder factory, with a scripted
// probe standing in for the short hardware capture.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use murmur::config::Config;
use murmur::recorder::{RecorderFactory, RecorderMethod, RecorderProbe};
use murmur::security::RecordingToolPolicy;
use murmur::storage::{TempFileConfig, TempFileManager};
use murmur::RecorderError;
use tempfile::TempDir;

/// Probe with a fixed pass/fail script per backend.
struct ScriptedProbe {
    passing: HashSet<RecorderMethod>,
}

impl ScriptedProbe {
    fn passing(methods: &[RecorderMethod]) -> Arc<Self> {
        Arc::new(Self {
            passing: methods.iter().copied().collect(),
        })
    }
}

#[async_trait]
impl RecorderProbe for ScriptedProbe {
    async fn probe(&self, method: RecorderMethod) -> Result<(), RecorderError> {
        if self.passing.contains(&method) {
            Ok(())
        } else {
            Err(RecorderError::EmptyAudioFile {
                path: PathBuf::from("probe"),
                size: 0,
            })
        }
    }
}

fn factory_with(
    dir: &TempDir,
    configured: &str,
    probe: Arc<ScriptedProbe>,
) -> (murmur::config::SharedConfig, RecorderFactory) {
    let mut config = Config::default();
    config.recorder.method = configured.to_string();
    let shared = config.into_shared();

    let temp = TempFileManager::new(TempFileConfig {
        base_dir: Some(dir.path().to_path_buf()),
        retention: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(600),
    });

    let factory = RecorderFactory::new(
        Arc::clone(&shared),
        Arc::new(RecordingToolPolicy),
        temp,
    )
    .with_probe(probe);

    (shared, factory)
}

#[tokio::test]
async fn unknown_backend_name_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let (_, factory) = factory_with(&dir, "pipewire", ScriptedProbe::passing(&[]));

    match factory.create_recorder().await {
        Err(RecorderError::UnsupportedMethod(name)) => assert_eq!(name, "pipewire"),
        other => panic!("expected UnsupportedMethod, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn passing_configured_backend_is_kept() {
    let dir = TempDir::new().unwrap();
    let (shared, factory) = factory_with(
        &dir,
        "ffmpeg",
        ScriptedProbe::passing(&[RecorderMethod::Ffmpeg]),
    );

    let recorder = factory.create_with_fallback().await.expect("recorder");

    assert_eq!(recorder.method(), RecorderMethod::Ffmpeg);
    assert_eq!(shared.read().await.recorder.method, "ffmpeg");
}

#[tokio::test]
async fn failed_probe_falls_back_and_persists_choice() {
    let dir = TempDir::new().unwrap();
    let (shared, factory) = factory_with(
        &dir,
        "ffmpeg",
        ScriptedProbe::passing(&[RecorderMethod::Alsa]),
    );

    let recorder = factory.create_with_fallback().await.expect("recorder");

    assert_eq!(recorder.method(), RecorderMethod::Alsa);
    assert_eq!(
        shared.read().await.recorder.method,
        "alsa",
        "fallback choice must be persisted in the live config"
    );
}

#[tokio::test]
async fn no_passing_backend_fails() {
    let dir = TempDir::new().unwrap();
    let (shared, factory) = factory_with(&dir, "alsa", ScriptedProbe::passing(&[]));

    match factory.create_with_fallback().await {
        Err(RecorderError::NoBackendAvailable) => {}
        other => panic!("expected NoBackendAvailable, got {:?}", other.map(|_| ())),
    }
    // Configuration is untouched when nothing worked.
    assert_eq!(shared.read().await.recorder.method, "alsa");
}

#[tokio::test]
async fn probe_results_drive_test_recorder_method() {
    let dir = TempDir::new().unwrap();
    let (_, factory) = factory_with(
        &dir,
        "alsa",
        ScriptedProbe::passing(&[RecorderMethod::Alsa]),
    );

    assert!(factory.test_recorder_method(RecorderMethod::Alsa).await.is_ok());
    assert!(factory
        .test_recorder_method(RecorderMethod::Ffmpeg)
        .await
        .is_err());
}
