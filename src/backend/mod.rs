//! Native playback backend abstraction
//!
//! This module defines the boundary between playback instances and whatever
//! actually mixes audio. A backend hands out two kinds of handles:
//!
//! - **Channels**: cheap playback slots bound directly to a sample's PCM.
//!   They support volume, pan, looping and seeking but no effects.
//! - **Streams**: effect-capable slots whose PCM is pulled on demand from a
//!   [`StreamSource`] callback running on the backend's mixing thread.
//!
//! [`soft::SoftMixer`] is the in-process implementation.

pub mod soft;

use crate::sample::{Sample, SampleFormat};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Backend handle to a plain sample channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(NonZeroU32);

/// Backend handle to a callback-fed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(NonZeroU32);

impl ChannelHandle {
    /// Wrap a raw backend id
    pub fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    /// Raw backend id
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl StreamHandle {
    /// Wrap a raw backend id
    pub fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    /// Raw backend id
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Any playback handle the backend understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    /// Plain sample channel
    Channel(ChannelHandle),
    /// Callback-fed stream
    Stream(StreamHandle),
}

impl Handle {
    /// Raw backend id
    pub fn raw(self) -> u32 {
        match self {
            Handle::Channel(c) => c.raw(),
            Handle::Stream(s) => s.raw(),
        }
    }
}

impl From<ChannelHandle> for Handle {
    fn from(handle: ChannelHandle) -> Self {
        Handle::Channel(handle)
    }
}

impl From<StreamHandle> for Handle {
    fn from(handle: StreamHandle) -> Self {
        Handle::Stream(handle)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Channel(c) => write!(f, "channel #{}", c.raw()),
            Handle::Stream(s) => write!(f, "stream #{}", s.raw()),
        }
    }
}

/// Outcome of a channel request.
///
/// Running out of channels is an expected condition, so it is a value rather
/// than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A channel was bound to the sample
    Granted(ChannelHandle),
    /// Every channel is in use
    NoChannelAvailable,
}

/// Controllable per-handle attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Linear gain in [0, 1]
    Volume,
    /// Stereo balance in [-1, 1]
    Pan,
    /// Pitch shift in semitones; requires a pitch-shift filter
    Pitch,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Attribute::Volume => "volume",
            Attribute::Pan => "pan",
            Attribute::Pitch => "pitch",
        })
    }
}

/// Backend-side activity of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Not started, stopped, reached its end, or unknown
    Stopped,
    /// Producing audio
    Playing,
    /// Paused, keeps its position
    Paused,
    /// Playing but starved of data
    Stalled,
}

/// Result of one stream source callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedResult {
    /// Bytes written to the front of the destination buffer
    pub written: usize,
    /// No further data will be produced
    pub end_of_stream: bool,
}

impl FeedResult {
    /// End of stream with nothing written
    pub fn ended() -> Self {
        Self {
            written: 0,
            end_of_stream: true,
        }
    }
}

/// Pull-style PCM source for a stream.
///
/// Invoked by the backend on its mixing thread whenever the stream needs more
/// bytes. Implementations must not block and must tolerate being called after
/// the owning playback instance has torn the stream down.
pub trait StreamSource: Send {
    /// Fill the front of `dest` with PCM in the stream's format
    fn feed(&mut self, dest: &mut [u8]) -> FeedResult;

    /// Move the read position to a frame-aligned byte offset.
    ///
    /// Called on the mixing thread with the stream's buffered data already
    /// discarded. Returns `false` if the source cannot seek.
    fn seek(&mut self, _position: u64) -> bool {
        false
    }
}

/// Error types reported by a backend.
///
/// Any of these is fatal to the operation that triggered it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The handle was never issued or has been released
    #[error("invalid handle: {0}")]
    InvalidHandle(Handle),

    /// The handle cannot carry this attribute (e.g. pitch on a plain channel)
    #[error("{attribute} is not supported on {handle}")]
    UnsupportedAttribute {
        /// Requested attribute
        attribute: Attribute,
        /// Handle the request targeted
        handle: Handle,
    },

    /// Seek target beyond the end of the data
    #[error("position {requested} is beyond length {length}")]
    PositionOutOfRange {
        /// Requested byte offset
        requested: u64,
        /// Length in bytes
        length: u64,
    },

    /// The handle's data cannot be repositioned (stream source without seek support)
    #[error("{0} is not seekable")]
    NotSeekable(Handle),

    /// Format the backend cannot play
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Output device failure
    #[error("device error: {0}")]
    Device(String),
}

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Contract for a native mixing backend.
///
/// Implementations are shared process-wide, so every method takes `&self`
/// and must complete in bounded time.
pub trait MixerBackend: Send + Sync {
    /// Bind `sample` to a fresh channel. Overlapping channels on the same
    /// sample are allowed.
    fn allocate_channel(&self, sample: &Sample) -> BackendResult<Allocation>;

    /// Create a stream whose PCM, laid out as `format`, comes from `source`
    fn create_stream(
        &self,
        format: SampleFormat,
        source: Box<dyn StreamSource>,
    ) -> BackendResult<StreamHandle>;

    /// Attach the pitch-shift filter that enables [`Attribute::Pitch`]
    fn attach_pitch_shift(&self, stream: StreamHandle) -> BackendResult<()>;

    /// Return a handle to the backend. Unknown or already released handles
    /// are ignored.
    fn release(&self, handle: Handle) -> BackendResult<()>;

    /// Start or resume
    fn play(&self, handle: Handle) -> BackendResult<()>;

    /// Pause, keeping the position. A handle that has not started yet
    /// moves straight to [`Activity::Paused`] without pulling any data.
    fn pause(&self, handle: Handle) -> BackendResult<()>;

    /// Stop without releasing
    fn stop(&self, handle: Handle) -> BackendResult<()>;

    /// Current activity; [`Activity::Stopped`] for unknown handles
    fn activity(&self, handle: Handle) -> Activity;

    /// Playback position in bytes of the handle's own format
    fn position_bytes(&self, handle: Handle) -> BackendResult<u64>;

    /// Seek to a byte offset. On a stream this drops buffered data and seeks
    /// its source in one step, so no stale bytes are mixed afterwards.
    fn set_position_bytes(&self, handle: Handle, position: u64) -> BackendResult<()>;

    /// Read an attribute's current (possibly sliding) value
    fn attribute(&self, handle: Handle, attribute: Attribute) -> BackendResult<f32>;

    /// Set an attribute immediately, cancelling any slide on it
    fn set_attribute(&self, handle: Handle, attribute: Attribute, value: f32)
        -> BackendResult<()>;

    /// Ramp an attribute linearly to `target` over `duration`
    fn slide_attribute(
        &self,
        handle: Handle,
        attribute: Attribute,
        target: f32,
        duration: Duration,
    ) -> BackendResult<()>;

    /// Enable or disable looping
    fn set_looping(&self, handle: Handle, looping: bool) -> BackendResult<()>;

    /// Whether looping is enabled
    fn is_looping(&self, handle: Handle) -> BackendResult<bool>;
}
