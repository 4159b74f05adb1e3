pub mod chunk;
pub mod level;
pub mod vad;

pub use chunk::{ChunkConfig, ChunkProcessor, ChunkStats, VoicedWindow};
pub use level::{chunk_level, LevelCallback, LevelMeter};
pub use vad::{Sensitivity, SpeechState, VadConfig, VoiceActivityDetector};
