//! Boundary to the external transcription engine.
//!
//! The engine itself is a collaborator, not part of this crate: it is an
//! external binary handed a WAV path and returning text. Everything here
//! is the narrow interface plus transcript cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::security::CommandPolicy;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// Resolves the speech model consulted before every recording start.
#[async_trait]
pub trait ModelManager: Send + Sync {
    async fn model_path(&self) -> Result<PathBuf>;
}

/// Model manager backed by a file on disk.
pub struct FileModelManager {
    path: PathBuf,
}

impl FileModelManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ModelManager for FileModelManager {
    async fn model_path(&self) -> Result<PathBuf> {
        if !self.path.is_file() {
            bail!("model file not found: {}", self.path.display());
        }
        Ok(self.path.clone())
    }
}

/// Transcriber that shells out to a whisper.cpp style CLI.
pub struct CliTranscriber {
    engine: String,
    model: Arc<dyn ModelManager>,
    policy: Arc<dyn CommandPolicy>,
}

impl CliTranscriber {
    pub fn new(engine: String, model: Arc<dyn ModelManager>, policy: Arc<dyn CommandPolicy>) -> Self {
        Self {
            engine,
            model,
            policy,
        }
    }
}

#[async_trait]
impl Transcriber for CliTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        if !self.policy.is_command_allowed(&self.engine) {
            bail!("transcription engine not allowed: {}", self.engine);
        }
        let model = self.model.model_path().await?;

        let args = self.policy.sanitize_args(&[
            "-m".to_string(),
            model.display().to_string(),
            "-f".to_string(),
            audio.display().to_string(),
            "-np".to_string(),
            "-nt".to_string(),
        ]);

        debug!(engine = %self.engine, audio = %audio.display(), "invoking transcription engine");
        let output = tokio::process::Command::new(&self.engine)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.engine))?;

        if !output.status.success() {
            bail!(
                "transcription engine exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Engine output cleanup: drop bracketed filler tokens like `[MUSIC]` or
/// `(coughs)` and collapse runs of whitespace.
pub fn sanitize_transcript(raw: &str) -> String {
    static FILLER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").unwrap());

    let stripped = FILLER.replace_all(raw, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
