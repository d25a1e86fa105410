//! Engine configuration
//!
//! Loaded from JSON; every field falls back to its default when omitted.

use crate::{PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default output sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default number of simultaneous plain channels
pub const DEFAULT_MAX_CHANNELS: usize = 32;

/// Default bytes pulled from a stream source per callback
pub const DEFAULT_STREAM_CHUNK_BYTES: usize = 4096;

/// Semitones reached at pitch ±1.0
pub const DEFAULT_PITCH_RANGE_SEMITONES: f32 = 12.0;

/// Configuration shared by the mixer and playback instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count (1 or 2)
    pub channels: u16,

    /// Maximum live plain channels; requests beyond this report
    /// "no channel available". Promoted streams are not counted.
    pub max_channels: usize,

    /// Bytes requested from a stream source per callback.
    /// Also bounds how far a promoted stream's read cursor runs ahead of
    /// what is audible.
    pub stream_chunk_bytes: usize,

    /// Pitch shift in semitones at pitch = ±1.0
    pub pitch_range_semitones: f32,
}

impl EngineConfig {
    /// Small stream chunks, fewer voices
    /// 1024-byte chunks ≈ 6ms of 16-bit stereo @ 44.1kHz
    pub fn low_latency(sample_rate: u32) -> Self {
        EngineConfig {
            sample_rate,
            max_channels: 16,
            stream_chunk_bytes: 1024,
            ..Self::default()
        }
    }

    /// Large stream chunks for heavily loaded mixes
    /// 16384-byte chunks ≈ 93ms of 16-bit stereo @ 44.1kHz
    pub fn stable(sample_rate: u32) -> Self {
        EngineConfig {
            sample_rate,
            stream_chunk_bytes: 16_384,
            ..Self::default()
        }
    }

    /// Parse from a JSON document and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| PlaybackError::ConfigError(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PlaybackError::ConfigError(
                "sample_rate must be greater than 0".into(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(PlaybackError::ConfigError(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.max_channels == 0 {
            return Err(PlaybackError::ConfigError(
                "max_channels must be greater than 0".into(),
            ));
        }
        if self.stream_chunk_bytes < 16 {
            return Err(PlaybackError::ConfigError(format!(
                "stream_chunk_bytes must be at least 16, got {}",
                self.stream_chunk_bytes
            )));
        }
        if !self.pitch_range_semitones.is_finite() || self.pitch_range_semitones <= 0.0 {
            return Err(PlaybackError::ConfigError(
                "pitch_range_semitones must be a positive number".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            max_channels: DEFAULT_MAX_CHANNELS,
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            pitch_range_semitones: DEFAULT_PITCH_RANGE_SEMITONES,
        }
    }
}
