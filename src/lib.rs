//! Sound-effect playback engine
//!
//! Plays preloaded, immutable PCM samples through any number of live
//! playback instances, each independently controllable (volume, pan, pitch,
//! looping, seek) while the mix is being rendered.
//!
//! # Features
//! - Channel allocation with "no channel available" as a normal outcome
//! - Transparent promotion of a plain sample channel into a callback-fed
//!   stream the first time a pitch change is requested
//! - A stream data feeder that runs on the mixing thread, concurrently with
//!   control calls on the caller's thread
//! - Linear attribute slides (volume, pan, pitch)
//! - Device-change teardown
//! - An in-process reference mixer (`SoftMixer`) usable offline or live
//! - WAV export of offline renders (`WavExporter`)
//!
//! # Crate feature flags
//! - `streaming` (opt-in): Real-time audio output via rodio (`AudioDevice`)
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use sfx_voice::{EngineConfig, PlayParams, PlaybackInstance, Sample, SoftMixer};
//!
//! let config = EngineConfig::default();
//! let mixer = Arc::new(SoftMixer::new(config.clone()).unwrap());
//! let tone: Vec<i16> = (0..44_100).map(|i| ((i as f32 * 0.06).sin() * 8000.0) as i16).collect();
//! let sample = Arc::new(Sample::from_i16(&tone, 44_100, 1).unwrap());
//!
//! let voice = PlaybackInstance::new(mixer.clone(), &config);
//! if voice.play(&sample, PlayParams::default().pitch(0.25)).unwrap() {
//!     let mut out = vec![0.0f32; 1024];
//!     mixer.render(&mut out);
//! }
//! ```

#![warn(missing_docs)]

pub mod allocator; // Channel allocation over the shared backend
pub mod backend; // Native backend seam and the reference software mixer
pub mod config; // Engine configuration
pub mod device; // Device-changed notification delivery
pub mod export; // Offline WAV rendering
pub mod feeder; // Stream data feeder for promoted instances
pub mod playback; // Playback instance state machine
pub mod sample; // Immutable PCM samples

#[cfg(feature = "streaming")]
pub mod streaming; // Live audio output

/// Error types for playback operations
#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    /// Operation is not valid in the instance's current state
    #[error("{operation} is not valid while {state:?}")]
    InvalidState {
        /// Name of the rejected operation
        operation: &'static str,
        /// State the instance was in
        state: PlaybackState,
    },

    /// A parameter or seek target was outside its permitted range
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// The native backend reported a failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// PCM data or format descriptor is inconsistent
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for PlaybackError {
    /// Converts a String into `PlaybackError::Other`.
    ///
    /// Prefer the specific variants where the failure has a known category;
    /// this conversion exists for ad-hoc messages only.
    fn from(msg: String) -> Self {
        PlaybackError::Other(msg)
    }
}

impl From<&str> for PlaybackError {
    /// Converts a string slice into `PlaybackError::Other`.
    fn from(msg: &str) -> Self {
        PlaybackError::Other(msg.to_string())
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

// Public API exports
pub use allocator::ChannelAllocator;
pub use backend::soft::SoftMixer;
pub use backend::{
    Activity, Allocation, Attribute, BackendError, BackendResult, ChannelHandle, FeedResult,
    Handle, MixerBackend, StreamHandle, StreamSource,
};
pub use config::EngineConfig;
pub use device::{DeviceId, DeviceListener, DeviceNotifier};
pub use export::WavExporter;
pub use feeder::{FeederLink, SampleFeeder};
pub use playback::{PlayParams, PlaybackInstance, PlaybackState, PlaybackStatus};
pub use sample::{BitDepth, Sample, SampleBuffer, SampleFormat, SampleTags};

#[cfg(feature = "streaming")]
pub use streaming::AudioDevice;
