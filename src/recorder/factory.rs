//! Backend selection, pre-flight diagnostics and fallback probing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::alsa::{translate_format, AlsaRecorder};
use super::backend::{AudioRecorder, RecorderMethod, RecorderSettings};
use super::ffmpeg::{FfmpegRecorder, FfmpegTuning};
use super::supervisor::{SupervisorConfig, WAV_HEADER_LEN};
use crate::config::{RecorderConfig, SharedConfig};
use crate::error::RecorderError;
use crate::security::CommandPolicy;
use crate::storage::TempFileManager;

/// Seam for the short test capture, injectable so orchestration tests run
/// without audio hardware.
#[async_trait]
pub trait RecorderProbe: Send + Sync {
    async fn probe(&self, method: RecorderMethod) -> Result<(), RecorderError>;
}

/// Production probe: a bounded sub-second capture with an allow-listed
/// command, classified by exit status plus artifact size.
pub struct CaptureProbe {
    config: SharedConfig,
    policy: Arc<dyn CommandPolicy>,
    temp: Arc<TempFileManager>,
}

#[async_trait]
impl RecorderProbe for CaptureProbe {
    async fn probe(&self, method: RecorderMethod) -> Result<(), RecorderError> {
        let tool = method.tool();
        if !self.policy.is_command_allowed(tool) {
            return Err(RecorderError::CommandNotAllowed(tool.to_string()));
        }

        let settings = {
            let cfg = self.config.read().await;
            RecorderSettings::from(&cfg.recorder)
        };

        let path = self
            .temp
            .create_temp_file(None)
            .map_err(|e| RecorderError::TempFile(format!("{e:#}")))?;

        let mut args = match method {
            RecorderMethod::Alsa => vec![
                "-D".to_string(),
                settings.device.clone(),
                "-f".to_string(),
                translate_format(&settings.format),
                "-r".to_string(),
                settings.sample_rate.to_string(),
                "-c".to_string(),
                "1".to_string(),
                "-d".to_string(),
                "1".to_string(),
                "-t".to_string(),
                "wav".to_string(),
            ],
            RecorderMethod::Ffmpeg => vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-f".to_string(),
                "pulse".to_string(),
                "-i".to_string(),
                settings.device.clone(),
                "-t".to_string(),
                "0.5".to_string(),
                "-y".to_string(),
            ],
        };
        args = self.policy.sanitize_args(&args);
        args.push(path.display().to_string());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::process::Command::new(tool).args(&args).output(),
        )
        .await;

        let outcome = match result {
            Err(_) => Err(RecorderError::EmptyAudioFile {
                path: path.clone(),
                size: 0,
            }),
            Ok(Err(source)) => Err(RecorderError::SpawnFailed {
                command: tool.to_string(),
                source,
            }),
            Ok(Ok(output)) => {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if output.status.success() && size > WAV_HEADER_LEN {
                    Ok(())
                } else {
                    debug!(
                        method = %method,
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                        "probe capture failed"
                    );
                    Err(RecorderError::EmptyAudioFile { path: path.clone(), size })
                }
            }
        };

        let _ = self.temp.remove_file(&path, true);
        outcome
    }
}

#[derive(Debug, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub found: bool,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsReport {
    pub configured_method: String,
    pub tools: Vec<ToolStatus>,
    pub sources: Vec<String>,
}

/// Creates recorders from configuration, with probe-driven fallback.
pub struct RecorderFactory {
    config: SharedConfig,
    policy: Arc<dyn CommandPolicy>,
    temp: Arc<TempFileManager>,
    probe: Arc<dyn RecorderProbe>,
}

impl RecorderFactory {
    pub fn new(
        config: SharedConfig,
        policy: Arc<dyn CommandPolicy>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        let probe = Arc::new(CaptureProbe {
            config: Arc::clone(&config),
            policy: Arc::clone(&policy),
            temp: Arc::clone(&temp),
        });
        Self {
            config,
            policy,
            temp,
            probe,
        }
    }

    /// Replace the capture probe (tests).
    pub fn with_probe(mut self, probe: Arc<dyn RecorderProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Instantiate the configured backend. Diagnostics are logged but
    /// never fatal; an unknown backend name is.
    pub async fn create_recorder(&self) -> Result<Box<dyn AudioRecorder>, RecorderError> {
        let cfg = self.config.read().await;
        let method = RecorderMethod::parse(&cfg.recorder.method)?;

        let report = self.diagnostics_inner(&cfg.recorder.method).await;
        match serde_json::to_string(&report) {
            Ok(json) => debug!(diagnostics = %json, "recorder pre-flight"),
            Err(e) => debug!("diagnostics serialization failed: {e}"),
        }

        Ok(self.instantiate(method, &cfg.recorder))
    }

    /// Short bounded test capture for one backend.
    pub async fn test_recorder_method(&self, method: RecorderMethod) -> Result<(), RecorderError> {
        self.probe.probe(method).await
    }

    /// Create the configured backend if its probe passes; otherwise try
    /// the remaining backends in priority order. The first that passes is
    /// persisted into the live configuration for the rest of the session.
    pub async fn create_with_fallback(&self) -> Result<Box<dyn AudioRecorder>, RecorderError> {
        let configured = {
            let cfg = self.config.read().await;
            RecorderMethod::parse(&cfg.recorder.method)?
        };

        match self.probe.probe(configured).await {
            Ok(()) => {
                let cfg = self.config.read().await;
                return Ok(self.instantiate(configured, &cfg.recorder));
            }
            Err(e) => warn!(method = %configured, "configured backend failed probe: {e}"),
        }

        for method in RecorderMethod::PRIORITY {
            if method == configured {
                continue;
            }
            match self.probe.probe(method).await {
                Ok(()) => {
                    let mut cfg = self.config.write().await;
                    cfg.recorder.method = method.as_str().to_string();
                    info!(from = %configured, to = %method, "recorder backend fallback persisted");
                    return Ok(self.instantiate(method, &cfg.recorder));
                }
                Err(e) => warn!(method = %method, "fallback backend failed probe: {e}"),
            }
        }

        Err(RecorderError::NoBackendAvailable)
    }

    /// Serializable pre-flight report for the `doctor` command.
    pub async fn diagnostics(&self) -> DiagnosticsReport {
        let configured = self.config.read().await.recorder.method.clone();
        self.diagnostics_inner(&configured).await
    }

    async fn diagnostics_inner(&self, configured: &str) -> DiagnosticsReport {
        let tools = RecorderMethod::PRIORITY
            .iter()
            .map(|m| ToolStatus {
                name: m.tool(),
                found: tool_on_path(m.tool()),
            })
            .collect();

        DiagnosticsReport {
            configured_method: configured.to_string(),
            tools,
            sources: self.enumerate_sources().await,
        }
    }

    async fn enumerate_sources(&self) -> Vec<String> {
        if !self.policy.is_command_allowed("pactl") {
            return Vec::new();
        }
        let output = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::process::Command::new("pactl")
                .args(["list", "short", "sources"])
                .output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .filter_map(|line| line.split_whitespace().nth(1))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn instantiate(&self, method: RecorderMethod, rc: &RecorderConfig) -> Box<dyn AudioRecorder> {
        let settings = RecorderSettings::from(rc);
        let supervisor_config = SupervisorConfig {
            max_session: Duration::from_secs(rc.max_session_secs),
            stop_grace: Duration::from_millis(rc.stop_grace_ms),
            ..Default::default()
        };

        match method {
            RecorderMethod::Alsa => Box::new(AlsaRecorder::new(
                settings,
                supervisor_config,
                Arc::clone(&self.policy),
                Arc::clone(&self.temp),
            )),
            RecorderMethod::Ffmpeg => Box::new(FfmpegRecorder::new(
                settings,
                supervisor_config,
                FfmpegTuning::default(),
                Arc::clone(&self.policy),
                Arc::clone(&self.temp),
            )),
        }
    }
}

fn tool_on_path(tool: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(tool).is_file())
}
