//! Shared process supervision for the recorder backends.
//!
//! The supervisor owns the external recording process for one session: its
//! cancellation token, its output sink (temp file, in-process buffer, or
//! live stream) and its captured stderr. Backends compose a supervisor and
//! only contribute argument building and timing hooks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{CaptureMode, RecordingArtifact};
use crate::audio::{chunk_level, LevelCallback, LevelMeter};
use crate::error::RecorderError;
use crate::security::CommandPolicy;
use crate::storage::TempFileManager;

/// Minimal WAV container: a file at or below this size holds no audio.
pub const WAV_HEADER_LEN: u64 = 44;

/// Cap on captured stderr per session.
const STDERR_CAP: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Hard ceiling on one session; the watchdog cancels past it.
    pub max_session: Duration,
    /// Wait between interrupt/kill attempts while stopping.
    pub stop_grace: Duration,
    /// Total termination attempts (first is graceful, rest are kills).
    pub kill_attempts: u32,
    /// Override for the temp-file base directory.
    pub base_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_session: Duration::from_secs(300),
            stop_grace: Duration::from_millis(500),
            kill_attempts: 3,
            base_dir: None,
        }
    }
}

struct ActiveSession {
    id: Uuid,
    child: Child,
    cancel: CancellationToken,
    mode: CaptureMode,
    output_path: Option<PathBuf>,
    buffer: Arc<Mutex<Vec<u8>>>,
    stream_rx: Option<mpsc::Receiver<Vec<u8>>>,
    stderr: Arc<Mutex<String>>,
    reader: Option<JoinHandle<()>>,
    started_at: Instant,
}

/// Owns the external recording process and its output for one session.
pub struct ProcessSupervisor {
    backend: &'static str,
    config: SupervisorConfig,
    policy: Arc<dyn CommandPolicy>,
    temp: Arc<TempFileManager>,
    session: Mutex<Option<ActiveSession>>,
    meter: LevelMeter,
    active: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(
        backend: &'static str,
        config: SupervisorConfig,
        policy: Arc<dyn CommandPolicy>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            backend,
            config,
            policy,
            temp,
            session: Mutex::new(None),
            meter: LevelMeter::new(),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn audio_level(&self) -> f32 {
        self.meter.level()
    }

    pub fn set_level_callback(&self, callback: Option<LevelCallback>) {
        self.meter.set_callback(callback);
    }

    /// Spawn the recording process. For file mode the fresh temp path is
    /// appended as the final argument and returned.
    pub async fn start(
        &self,
        command: &str,
        args: &[String],
        mode: CaptureMode,
    ) -> Result<Option<PathBuf>, RecorderError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        if !self.policy.is_command_allowed(command) {
            return Err(RecorderError::CommandNotAllowed(command.to_string()));
        }
        let mut args = self.policy.sanitize_args(args);

        let output_path = match mode {
            CaptureMode::File => {
                let path = self
                    .temp
                    .create_temp_file(self.config.base_dir.as_deref())
                    .map_err(|e| RecorderError::TempFile(format!("{e:#}")))?;
                args.push(path.display().to_string());
                Some(path)
            }
            CaptureMode::Buffer | CaptureMode::Stream => None,
        };

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match mode {
            CaptureMode::File => cmd.stdout(Stdio::null()),
            CaptureMode::Buffer | CaptureMode::Stream => cmd.stdout(Stdio::piped()),
        };

        let cancel = CancellationToken::new();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                cancel.cancel();
                if let Some(path) = &output_path {
                    let _ = self.temp.remove_file(path, true);
                }
                return Err(RecorderError::SpawnFailed {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let id = Uuid::new_v4();
        info!(
            session = %id,
            backend = self.backend,
            command,
            ?mode,
            "recording session started"
        );

        // Session ceiling: cancel the token when the watchdog fires so
        // downstream readers wind down even before the process is signaled.
        let watchdog = cancel.clone();
        let max_session = self.config.max_session;
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(max_session) => {
                    warn!(session = %id, "session ceiling reached, cancelling");
                    watchdog.cancel();
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = buf.lock().await;
                    if buf.len() < STDERR_CAP {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            });
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (stream_rx, reader) = match mode {
            CaptureMode::File => (None, None),
            CaptureMode::Buffer | CaptureMode::Stream => {
                let stdout = child.stdout.take().ok_or_else(|| RecorderError::SpawnFailed {
                    command: command.to_string(),
                    source: std::io::Error::other("stdout pipe missing"),
                })?;

                let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
                let stream_tx = (mode == CaptureMode::Stream).then_some(tx);
                let reader = tokio::spawn(Self::read_output(
                    stdout,
                    Arc::clone(&buffer),
                    self.meter.clone(),
                    cancel.clone(),
                    stream_tx,
                ));

                let rx = (mode == CaptureMode::Stream).then_some(rx);
                (rx, Some(reader))
            }
        };

        *session = Some(ActiveSession {
            id,
            child,
            cancel,
            mode,
            output_path: output_path.clone(),
            buffer,
            stream_rx,
            stderr: stderr_buf,
            reader,
            started_at: Instant::now(),
        });
        self.active.store(true, Ordering::SeqCst);

        Ok(output_path)
    }

    /// Stop the session: cancel, terminate with escalation, validate the
    /// artifact. File-mode sessions that produced a header-only file fail
    /// with `EmptyAudioFile` — this is where silent recorder crashes and
    /// write races are caught.
    pub async fn stop(&self) -> Result<RecordingArtifact, RecorderError> {
        let mut guard = self.session.lock().await;
        let mut session = guard.take().ok_or(RecorderError::NotRecording)?;
        self.active.store(false, Ordering::SeqCst);

        // Cancel before signaling so readers observe shutdown promptly
        // even if the process lingers.
        session.cancel.cancel();

        self.terminate(&mut session.child, session.id).await;

        if let Some(reader) = session.reader.take() {
            let _ = reader.await;
        }
        self.meter.clear();

        let elapsed = session.started_at.elapsed();
        debug!(session = %session.id, ?elapsed, "recording session ended");

        match session.mode {
            CaptureMode::File => {
                let path = session.output_path.take().expect("file session has a path");
                if let Err(e) = validate_wav_artifact(&path) {
                    let stderr = session.stderr.lock().await;
                    if !stderr.is_empty() {
                        warn!(
                            session = %session.id,
                            stderr = %stderr.trim_end(),
                            "recorder diagnostics"
                        );
                    }
                    return Err(e);
                }
                Ok(RecordingArtifact::File(path))
            }
            CaptureMode::Buffer => {
                let data = std::mem::take(&mut *session.buffer.lock().await);
                if data.is_empty() {
                    return Err(RecorderError::EmptyAudioFile {
                        path: PathBuf::from("<buffer>"),
                        size: 0,
                    });
                }
                Ok(RecordingArtifact::Buffer(data))
            }
            CaptureMode::Stream => Ok(RecordingArtifact::Streamed),
        }
    }

    /// Hand out the live stream receiver, once per stream session.
    pub async fn take_audio_stream(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        let mut session = self.session.lock().await;
        session.as_mut().and_then(|s| s.stream_rx.take())
    }

    /// Abandon any active session: kill the process and delete its
    /// artifact. No-op when idle.
    pub async fn cleanup(&self) {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);

        session.cancel.cancel();
        self.terminate(&mut session.child, session.id).await;
        if let Some(reader) = session.reader.take() {
            reader.abort();
        }
        self.meter.clear();

        if let Some(path) = session.output_path {
            if let Err(e) = self.temp.remove_file(&path, true) {
                warn!(path = %path.display(), "cleanup failed to delete artifact: {e:#}");
            }
        }
        info!(session = %session.id, backend = self.backend, "session cleaned up");
    }

    /// Escalation ladder: graceful interrupt, then kills, each bounded by
    /// the grace window, up to the configured attempt count.
    async fn terminate(&self, child: &mut Child, id: Uuid) {
        for attempt in 1..=self.config.kill_attempts {
            if attempt == 1 {
                graceful_interrupt(child);
            } else if let Err(e) = child.start_kill() {
                debug!(session = %id, attempt, "kill failed (already gone?): {e}");
            }

            match tokio::time::timeout(self.config.stop_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(session = %id, attempt, %status, "recorder process exited");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(session = %id, "wait on recorder process failed: {e}");
                    return;
                }
                Err(_) => {
                    warn!(session = %id, attempt, "recorder did not exit within grace window");
                }
            }
        }

        // Last resort; SIGKILL'd processes reap promptly.
        if let Err(e) = child.kill().await {
            warn!(session = %id, "final kill failed: {e}");
        }
    }

    async fn read_output(
        mut stdout: ChildStdout,
        buffer: Arc<Mutex<Vec<u8>>>,
        meter: LevelMeter,
        cancel: CancellationToken,
        stream_tx: Option<mpsc::Sender<Vec<u8>>>,
    ) {
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = stdout.read(&mut chunk) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let bytes = &chunk[..n];
                        meter.publish(chunk_level(bytes));

                        if let Some(tx) = &stream_tx {
                            if tx.send(bytes.to_vec()).await.is_err() {
                                debug!("stream consumer closed, discarding audio");
                            }
                        } else {
                            buffer.lock().await.extend_from_slice(bytes);
                        }
                    }
                    Err(e) => {
                        warn!("error reading recorder output: {e}");
                        break;
                    }
                }
            }
        }
    }
}

/// A WAV file with nothing past the 44-byte container header carries no
/// audio.
pub fn validate_wav_artifact(path: &Path) -> Result<(), RecorderError> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size <= WAV_HEADER_LEN {
        return Err(RecorderError::EmptyAudioFile {
            path: path.to_path_buf(),
            size,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn graceful_interrupt(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM delivery failed: {e}");
            }
        }
        // Already reaped.
        None => {}
    }
}

#[cfg(not(unix))]
fn graceful_interrupt(child: &mut Child) {
    let _ = child.start_kill();
}
