//! PCM format descriptor and byte/time conversions.

use std::time::Duration;

/// Storage width of one PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    /// Unsigned 8-bit, silence at 128
    U8,
    /// Signed 16-bit little endian
    I16,
    /// 32-bit IEEE float little endian
    F32,
}

impl BitDepth {
    /// Bytes occupied by a single sample of one channel
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitDepth::U8 => 1,
            BitDepth::I16 => 2,
            BitDepth::F32 => 4,
        }
    }

    /// Decode one sample starting at `bytes[0]` into the range [-1.0, 1.0].
    ///
    /// `bytes` must hold at least [`bytes_per_sample`](Self::bytes_per_sample) bytes.
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            BitDepth::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            BitDepth::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            BitDepth::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Layout of the interleaved PCM held by a [`Sample`](super::Sample).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Per-sample storage
    pub bit_depth: BitDepth,
}

impl SampleFormat {
    /// Create a format descriptor
    pub fn new(sample_rate: u32, channels: u16, bit_depth: BitDepth) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Bytes per frame (one sample for every channel)
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bit_depth.bytes_per_sample()
    }

    /// Bytes consumed per second of audio
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Convert a byte offset into playback time
    pub fn bytes_to_duration(&self, bytes: u64) -> Duration {
        let rate = self.byte_rate();
        if rate == 0 {
            return Duration::ZERO;
        }
        let secs = bytes / rate;
        let rem = bytes % rate;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / rate)
    }

    /// Convert playback time into a byte offset, rounded down to a frame boundary
    pub fn duration_to_bytes(&self, time: Duration) -> u64 {
        let frames = (time.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64;
        frames * self.block_align() as u64
    }

    /// Round a byte offset down to the nearest frame boundary
    pub fn align_down(&self, bytes: u64) -> u64 {
        let align = self.block_align() as u64;
        if align == 0 {
            return 0;
        }
        bytes - bytes % align
    }
}
