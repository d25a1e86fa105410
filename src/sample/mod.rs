//! Immutable decoded PCM samples
//!
//! A [`Sample`] is created once by whatever loaded it and shared read-only by
//! every playback instance that plays it. Instances only hold a weak
//! reference, so dropping the owning `Arc<Sample>` disposes it even while
//! voices are still running.

mod format;
mod tags;

pub use format::{BitDepth, SampleFormat};
pub use tags::SampleTags;

use crate::{PlaybackError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Decoded PCM audio plus its format descriptor.
#[derive(Debug, Clone)]
pub struct Sample {
    data: Arc<[u8]>,
    format: SampleFormat,
    duration: Duration,
    tags: SampleTags,
}

/// Borrowed view of a sample's PCM bytes and layout.
#[derive(Debug, Clone, Copy)]
pub struct SampleBuffer<'a> {
    /// Raw interleaved PCM
    pub bytes: &'a [u8],
    /// Layout of `bytes`
    pub format: SampleFormat,
}

impl Sample {
    /// Wrap raw interleaved PCM bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::InvalidSample`] if the rate or channel count
    /// is zero, or if the byte length is not a whole number of frames.
    pub fn new(data: impl Into<Arc<[u8]>>, format: SampleFormat) -> Result<Self> {
        let data = data.into();
        if format.sample_rate == 0 {
            return Err(PlaybackError::InvalidSample(
                "sample rate must be greater than 0".into(),
            ));
        }
        if format.channels == 0 {
            return Err(PlaybackError::InvalidSample(
                "channel count must be greater than 0".into(),
            ));
        }
        if data.len() % format.block_align() != 0 {
            return Err(PlaybackError::InvalidSample(format!(
                "{} bytes is not a multiple of the {}-byte frame size",
                data.len(),
                format.block_align()
            )));
        }

        let duration = format.bytes_to_duration(data.len() as u64);
        Ok(Sample {
            data,
            format,
            duration,
            tags: SampleTags::default(),
        })
    }

    /// Build a 16-bit sample from interleaved frames
    pub fn from_i16(frames: &[i16], sample_rate: u32, channels: u16) -> Result<Self> {
        let bytes: Vec<u8> = frames.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(bytes, SampleFormat::new(sample_rate, channels, BitDepth::I16))
    }

    /// Build a float sample from interleaved frames
    pub fn from_f32(frames: &[f32], sample_rate: u32, channels: u16) -> Result<Self> {
        let bytes: Vec<u8> = frames.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(bytes, SampleFormat::new(sample_rate, channels, BitDepth::F32))
    }

    /// Attach tag metadata
    pub fn with_tags(mut self, tags: SampleTags) -> Self {
        self.tags = tags;
        self
    }

    /// Read-only access to the PCM and its layout
    pub fn buffer(&self) -> SampleBuffer<'_> {
        SampleBuffer {
            bytes: &self.data,
            format: self.format,
        }
    }

    /// Shared handle to the PCM bytes, for backends that bind the data to a channel
    pub fn data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Total length in bytes
    pub fn len_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// True if the sample holds no frames
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// PCM layout
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Total playback time at the native rate
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Tag metadata
    pub fn tags(&self) -> &SampleTags {
        &self.tags
    }
}
