//! Tracked temporary audio files.
//!
//! Every temp artifact the recorders produce is created here and deleted
//! here: explicitly by the owning service, or by the periodic sweep once a
//! file outlives the retention window. No other component removes files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

#[derive(Debug, Clone)]
pub struct TempFileConfig {
    /// Base directory; the system temp directory when unset.
    pub base_dir: Option<PathBuf>,
    /// Age after which the sweep deletes a tracked file.
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for TempFileConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            retention: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&StorageConfig> for TempFileConfig {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            base_dir: cfg.temp_dir.clone(),
            retention: Duration::from_secs(cfg.retention_mins * 60),
            sweep_interval: Duration::from_secs(cfg.sweep_interval_secs),
        }
    }
}

/// Owns every temporary audio artifact for its entire life.
pub struct TempFileManager {
    config: TempFileConfig,
    files: Mutex<HashMap<PathBuf, Instant>>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TempFileManager {
    pub fn new(config: TempFileConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            files: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Create, track and return a fresh `audio_<timestamp>.wav` path.
    ///
    /// `base_dir` overrides the configured directory. The resolved path is
    /// canonicalized and must stay inside the base directory; anything that
    /// escapes it (".." components, symlink tricks) is rejected.
    pub fn create_temp_file(&self, base_dir: Option<&Path>) -> Result<PathBuf> {
        let dir = base_dir
            .map(Path::to_path_buf)
            .or_else(|| self.config.base_dir.clone())
            .unwrap_or_else(std::env::temp_dir);

        if dir.components().any(|c| c.as_os_str() == "..") {
            bail!("temp base directory contains traversal: {}", dir.display());
        }

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create temp directory {}", dir.display()))?;
        let canonical_dir = dir
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {}", dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%.3f");
        let mut path = canonical_dir.join(format!("audio_{}.wav", timestamp));
        if path.exists() {
            path = canonical_dir.join(format!("audio_{}_{}.wav", timestamp, uuid::Uuid::new_v4()));
        }

        if !path.starts_with(&canonical_dir) {
            bail!("temp file path escapes base directory: {}", path.display());
        }

        std::fs::File::create(&path)
            .with_context(|| format!("failed to create temp file {}", path.display()))?;

        let mut files = self.files.lock().expect("temp file index poisoned");
        files.insert(path.clone(), Instant::now());
        debug!(path = %path.display(), tracked = files.len(), "temp file created");

        Ok(path)
    }

    /// Stop tracking a file; delete it from disk when `delete` is set and
    /// the file still exists.
    pub fn remove_file(&self, path: &Path, delete: bool) -> Result<()> {
        {
            let mut files = self.files.lock().expect("temp file index poisoned");
            files.remove(path);
        }

        if delete && path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to delete temp file {}", path.display()))?;
            debug!(path = %path.display(), "temp file deleted");
        }

        Ok(())
    }

    /// Number of currently tracked files.
    pub fn tracked_count(&self) -> usize {
        self.files.lock().expect("temp file index poisoned").len()
    }

    /// Run one sweep pass: delete tracked files older than the retention
    /// window. Returns how many files were removed.
    pub fn sweep_now(&self) -> usize {
        let retention = self.config.retention;
        let expired: Vec<PathBuf> = {
            let files = self.files.lock().expect("temp file index poisoned");
            files
                .iter()
                .filter(|(_, created)| created.elapsed() > retention)
                .map(|(path, _)| path.clone())
                .collect()
        };

        let mut removed = 0;
        for path in expired {
            match self.remove_file(&path, true) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), "sweep failed to delete: {e:#}"),
            }
        }

        if removed > 0 {
            info!(removed, "temp file sweep");
        }
        removed
    }

    /// Start the periodic sweep task. Call once from the composition root.
    pub fn start_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep an empty index.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep_now();
                    }
                }
            }
            debug!("temp file sweeper stopped");
        });

        let mut sweeper = self.sweeper.lock().expect("sweeper handle poisoned");
        *sweeper = Some(handle);
    }

    /// Stop the sweeper deterministically. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = {
            let mut sweeper = self.sweeper.lock().expect("sweeper handle poisoned");
            sweeper.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("sweeper task ended abnormally: {e}");
            }
        }
    }
}
