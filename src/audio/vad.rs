//! Energy-based voice activity detection.
//!
//! Two-state machine (silence/speech) over per-frame RMS energy. The
//! threshold adapts to ambient noise: it is the mean plus two standard
//! deviations of the recent ambient frame energies, floored at a
//! sensitivity-dependent minimum. Hysteresis on both transitions keeps the
//! state from flickering on single noisy frames.

use std::collections::VecDeque;

use tracing::debug;

/// Frames of energy history used for the adaptive threshold.
const HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Silence,
    Speech,
}

/// Sensitivity presets scale the threshold floor and both debounce counts
/// together, never independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    fn floor(self) -> f32 {
        match self {
            Self::Low => 0.04,
            Self::Medium => 0.02,
            Self::High => 0.01,
        }
    }

    fn onset_frames(self) -> u32 {
        match self {
            Self::Low => 4,
            Self::Medium => 3,
            Self::High => 2,
        }
    }

    fn offset_frames(self) -> u32 {
        match self {
            Self::Low => 8,
            Self::Medium => 6,
            Self::High => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub threshold_floor: f32,
    pub onset_frames: u32,
    pub offset_frames: u32,
}

impl VadConfig {
    pub fn from_sensitivity(sensitivity: Sensitivity) -> Self {
        Self {
            threshold_floor: sensitivity.floor(),
            onset_frames: sensitivity.onset_frames(),
            offset_frames: sensitivity.offset_frames(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from_sensitivity(Sensitivity::Medium)
    }
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    state: SpeechState,
    /// Energies of recent ambient (below-threshold) frames only, so the
    /// threshold calibrates to noise rather than to speech.
    history: VecDeque<f32>,
    threshold: f32,
    onset_count: u32,
    offset_count: u32,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        let threshold = config.threshold_floor;
        Self {
            config,
            state: SpeechState::Silence,
            history: VecDeque::with_capacity(HISTORY_LEN),
            threshold,
            onset_count: 0,
            offset_count: 0,
        }
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Classify one frame of samples and advance the state machine.
    /// Returns the state after this frame.
    pub fn process_frame(&mut self, samples: &[i16]) -> SpeechState {
        let energy = frame_energy(samples);
        let voiced = energy > self.threshold;

        match self.state {
            SpeechState::Silence => {
                if voiced {
                    self.onset_count += 1;
                    if self.onset_count >= self.config.onset_frames {
                        debug!(energy, threshold = self.threshold, "speech onset");
                        self.state = SpeechState::Speech;
                        self.onset_count = 0;
                        self.offset_count = 0;
                    }
                } else {
                    self.onset_count = 0;
                    self.absorb_ambient(energy);
                }
            }
            SpeechState::Speech => {
                if voiced {
                    self.offset_count = 0;
                } else {
                    self.offset_count += 1;
                    if self.offset_count >= self.config.offset_frames {
                        debug!(energy, threshold = self.threshold, "speech offset");
                        self.state = SpeechState::Silence;
                        self.offset_count = 0;
                        self.onset_count = 0;
                    }
                }
            }
        }

        self.state
    }

    /// Clear history and counters; configuration is preserved.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = SpeechState::Silence;
        self.threshold = self.config.threshold_floor;
        self.onset_count = 0;
        self.offset_count = 0;
    }

    fn absorb_ambient(&mut self, energy: f32) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(energy);

        let n = self.history.len() as f32;
        let mean = self.history.iter().sum::<f32>() / n;
        let variance = self.history.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / n;
        let adaptive = mean + 2.0 * variance.sqrt();

        self.threshold = adaptive.max(self.config.threshold_floor);
    }
}

/// RMS energy of one frame, with samples normalized to [-1, 1].
pub fn frame_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let norm = s as f64 / i16::MAX as f64;
            norm * norm
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}
