//! Playback state, parameters and status snapshots.

use crate::{PlaybackError, Result};
use std::time::Duration;

/// Playback state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing playing (initial state, after `stop`, or after the sound ended).
    #[default]
    Stopped,
    /// Actively playing.
    Playing,
    /// Paused (can resume).
    Paused,
}

/// Parameters for [`PlaybackInstance::play`](super::PlaybackInstance::play).
///
/// Defaults: full volume, no pitch shift, centred, not looping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayParams {
    /// Linear gain in [0, 1]
    pub volume: f32,
    /// Pitch in [-1, 1]; 0 plays unshifted, ±1 shifts by the configured range
    pub pitch: f32,
    /// Stereo balance in [-1, 1]
    pub pan: f32,
    /// Restart at the end instead of stopping
    pub looping: bool,
}

impl Default for PlayParams {
    fn default() -> Self {
        PlayParams {
            volume: 1.0,
            pitch: 0.0,
            pan: 0.0,
            looping: false,
        }
    }
}

impl PlayParams {
    /// Set the volume
    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set the pitch
    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Set the pan
    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    /// Set looping
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Check every field against its range
    pub fn validate(&self) -> Result<()> {
        check_range("volume", self.volume, 0.0, 1.0)?;
        check_range("pitch", self.pitch, -1.0, 1.0)?;
        check_range("pan", self.pan, -1.0, 1.0)
    }
}

pub(crate) fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PlaybackError::OutOfRange(format!(
            "{name} {value} outside [{min}, {max}]"
        )))
    }
}

/// Point-in-time view of an instance, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStatus {
    /// Current state
    pub state: PlaybackState,
    /// Playback position
    pub position: Duration,
    /// Duration of the bound sample
    pub duration: Duration,
    /// Current volume
    pub volume: f32,
    /// Current pitch in [-1, 1]
    pub pitch: f32,
    /// Current pan
    pub pan: f32,
    /// Looping enabled
    pub looping: bool,
    /// Backed by a stream rather than a plain channel
    pub promoted: bool,
}
