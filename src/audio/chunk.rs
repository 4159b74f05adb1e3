//! Stream segmentation: fixed-duration windows gated by voice activity.
//!
//! The chunk processor consumes the raw s16le byte stream of a live
//! recording session, cuts it into fixed windows, and forwards only the
//! windows in which the voice activity detector saw speech. Downstream
//! consumers (streaming transcription) never see pure silence.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::vad::{SpeechState, VadConfig, VoiceActivityDetector};

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Duration of one forwarded window in milliseconds.
    pub window_ms: u64,
    /// VAD frame size in milliseconds.
    pub frame_ms: u64,
    pub sample_rate: u32,
    pub vad: VadConfig,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            frame_ms: 30,
            sample_rate: 16000,
            vad: VadConfig::default(),
        }
    }
}

/// A window that contained speech, with its position in the stream.
#[derive(Debug, Clone)]
pub struct VoicedWindow {
    /// Window number (0-indexed, counts all windows including dropped ones).
    pub index: usize,
    /// Start offset in milliseconds since the stream began.
    pub start_ms: u64,
    pub samples: Vec<i16>,
    /// Frames inside this window the detector classified as speech.
    pub voiced_frames: usize,
    pub total_frames: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkStats {
    pub windows_seen: usize,
    pub windows_forwarded: usize,
}

/// Segments a live byte stream into VAD-gated windows.
pub struct ChunkProcessor {
    config: ChunkConfig,
    vad: VoiceActivityDetector,
}

impl ChunkProcessor {
    pub fn new(config: ChunkConfig) -> Self {
        let vad = VoiceActivityDetector::new(config.vad.clone());
        Self { config, vad }
    }

    /// Consume the stream until it closes, forwarding voiced windows.
    pub async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
        window_tx: mpsc::Sender<VoicedWindow>,
    ) -> Result<ChunkStats> {
        let frame_len = (self.config.sample_rate as u64 * self.config.frame_ms / 1000) as usize;
        let window_len = (self.config.sample_rate as u64 * self.config.window_ms / 1000) as usize;

        let mut stats = ChunkStats::default();
        let mut pending_byte: Option<u8> = None;
        let mut frame: Vec<i16> = Vec::with_capacity(frame_len);
        let mut window: Vec<i16> = Vec::with_capacity(window_len);
        let mut voiced_frames = 0usize;
        let mut total_frames = 0usize;

        info!(
            window_ms = self.config.window_ms,
            frame_ms = self.config.frame_ms,
            "chunk processor started"
        );

        while let Some(bytes) = audio_rx.recv().await {
            for byte in bytes {
                // Re-pair bytes across chunk boundaries.
                let low = match pending_byte.take() {
                    Some(low) => low,
                    None => {
                        pending_byte = Some(byte);
                        continue;
                    }
                };
                let sample = i16::from_le_bytes([low, byte]);
                frame.push(sample);

                if frame.len() == frame_len {
                    total_frames += 1;
                    if self.vad.process_frame(&frame) == SpeechState::Speech {
                        voiced_frames += 1;
                    }
                    window.extend_from_slice(&frame);
                    frame.clear();
                }

                if window.len() >= window_len {
                    Self::emit_window(
                        &window_tx,
                        &mut stats,
                        &mut window,
                        &mut voiced_frames,
                        &mut total_frames,
                        self.config.window_ms,
                    )
                    .await;
                }
            }
        }

        // Flush the partial tail window once the stream closes.
        if !frame.is_empty() {
            total_frames += 1;
            if self.vad.process_frame(&frame) == SpeechState::Speech {
                voiced_frames += 1;
            }
            window.extend_from_slice(&frame);
        }
        if !window.is_empty() {
            Self::emit_window(
                &window_tx,
                &mut stats,
                &mut window,
                &mut voiced_frames,
                &mut total_frames,
                self.config.window_ms,
            )
            .await;
        }

        info!(
            seen = stats.windows_seen,
            forwarded = stats.windows_forwarded,
            "chunk processor finished"
        );

        Ok(stats)
    }

    async fn emit_window(
        window_tx: &mpsc::Sender<VoicedWindow>,
        stats: &mut ChunkStats,
        window: &mut Vec<i16>,
        voiced_frames: &mut usize,
        total_frames: &mut usize,
        window_ms: u64,
    ) {
        let index = stats.windows_seen;
        stats.windows_seen += 1;

        let voiced = *voiced_frames;
        let total = *total_frames;
        let samples = std::mem::take(window);
        *voiced_frames = 0;
        *total_frames = 0;

        if voiced == 0 {
            debug!(index, "dropping silent window");
            return;
        }

        stats.windows_forwarded += 1;
        let forwarded = VoicedWindow {
            index,
            start_ms: index as u64 * window_ms,
            samples,
            voiced_frames: voiced,
            total_frames: total,
        };

        // A closed receiver just means the consumer is gone; keep counting.
        if window_tx.send(forwarded).await.is_err() {
            debug!("window consumer closed");
        }
    }
}
