//! Live audio output
//!
//! Drives [`SoftMixer::render`](crate::SoftMixer::render) from rodio's output
//! thread, which makes that thread the mixing thread: stream feeders of
//! promoted instances are called from it.

pub mod audio_device;

pub use audio_device::AudioDevice;

/// Interleaved samples rendered per mixer call on the output thread
pub const RENDER_BLOCK_SAMPLES: usize = 1024;
