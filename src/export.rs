//! Offline WAV export
//!
//! Renders a [`SoftMixer`] block by block on the calling thread and writes
//! 16-bit PCM with hound. Control calls may be made between blocks, which is
//! how scripted renders (the demo binary, tests) change pitch or volume part
//! way through.

use crate::backend::soft::SoftMixer;
use crate::{PlaybackError, Result};
use log::debug;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Interleaved samples rendered per mixer call
const SAMPLES_PER_CHUNK: usize = 4096;

/// Streaming WAV writer fed by a mixer
pub struct WavExporter<'a> {
    mixer: &'a SoftMixer,
    writer: hound::WavWriter<BufWriter<File>>,
    buffer: Vec<f32>,
    frames_written: u64,
}

impl<'a> WavExporter<'a> {
    /// Create `path` with the mixer's rate and channel count
    pub fn create(mixer: &'a SoftMixer, path: impl AsRef<Path>) -> Result<Self> {
        let config = mixer.config();
        let spec = hound::WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|e| PlaybackError::Other(format!("Failed to create WAV file: {e}")))?;
        Ok(WavExporter {
            mixer,
            writer,
            buffer: vec![0.0; SAMPLES_PER_CHUNK],
            frames_written: 0,
        })
    }

    /// Render and write `duration` of audio, rounded down to whole frames
    pub fn render(&mut self, duration: Duration) -> Result<()> {
        let config = self.mixer.config();
        let channels = config.channels as usize;
        let frames = (duration.as_secs_f64() * config.sample_rate as f64) as u64;
        let chunk_frames = (SAMPLES_PER_CHUNK / channels) as u64;

        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(chunk_frames) as usize;
            let block = &mut self.buffer[..n * channels];
            self.mixer.render(block);
            for &sample in block.iter() {
                let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                self.writer
                    .write_sample(sample_i16)
                    .map_err(|e| PlaybackError::Other(format!("Failed to write sample: {e}")))?;
            }
            remaining -= n as u64;
        }
        self.frames_written += frames;
        Ok(())
    }

    /// Flush the header and close the file
    pub fn finalize(self) -> Result<u64> {
        let frames = self.frames_written;
        self.writer
            .finalize()
            .map_err(|e| PlaybackError::Other(format!("Failed to finalize WAV file: {e}")))?;
        debug!("wav export finished: {frames} frames");
        Ok(frames)
    }
}
