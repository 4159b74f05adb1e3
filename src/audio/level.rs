//! Audio level estimation and the single-slot level observer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked with each new normalized level sample.
pub type LevelCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Scale factor applied to the raw RMS so quiet speech is still visible
/// on a meter.
const LEVEL_GAIN: f32 = 4.0;

/// Compute a normalized [0, 1] level for one chunk of s16le bytes.
///
/// Samples are normalized to [-1, 1], squared and averaged; the square
/// root is scaled for perceptual visibility. All-zero input yields 0.
pub fn chunk_level(bytes: &[u8]) -> f32 {
    if bytes.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;

    for pair in bytes.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / i16::MAX as f64;
        sum_squares += sample * sample;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let rms = (sum_squares / count as f64).sqrt() as f32;
    (rms * LEVEL_GAIN).clamp(0.0, 1.0)
}

/// Holds the most recent level and a single replaceable subscriber.
///
/// Only one UI subscriber exists at a time, so this is an observer slot
/// rather than an event bus: registering a new callback replaces the old
/// one.
#[derive(Clone, Default)]
pub struct LevelMeter {
    level_bits: Arc<AtomicU32>,
    callback: Arc<Mutex<Option<LevelCallback>>>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level, 0.0 when nothing has been published yet.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    /// Publish a new level and notify the subscriber, if any.
    pub fn publish(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
        if let Ok(guard) = self.callback.lock() {
            if let Some(cb) = guard.as_ref() {
                cb(level);
            }
        }
    }

    /// Replace the subscriber slot.
    pub fn set_callback(&self, callback: Option<LevelCallback>) {
        if let Ok(mut guard) = self.callback.lock() {
            *guard = callback;
        }
    }

    /// Reset the published level to zero, e.g. when a session ends.
    pub fn clear(&self) {
        self.level_bits.store(0.0f32.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_input_yields_zero_level() {
        let bytes = vec![0u8; 1024];
        assert_eq!(chunk_level(&bytes), 0.0);
    }

    #[test]
    fn loud_input_yields_positive_clamped_level() {
        // Full-scale square wave.
        let mut bytes = Vec::new();
        for _ in 0..512 {
            bytes.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        let level = chunk_level(&bytes);
        assert!(level > 0.9);
        assert!(level <= 1.0);
    }

    #[test]
    fn meter_publishes_to_latest_subscriber_only() {
        let meter = LevelMeter::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let first_clone = Arc::clone(&first);
        meter.set_callback(Some(Box::new(move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        })));

        let second_clone = Arc::clone(&second);
        meter.set_callback(Some(Box::new(move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        })));

        meter.publish(0.5);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!((meter.level() - 0.5).abs() < f32::EPSILON);
    }
}
