//! Audio device integration using rodio
//!
//! The mixer is rendered in fixed blocks on demand, so the amount of audio
//! buffered between a control call and the speaker is one block plus
//! whatever rodio and the OS hold.

use super::RENDER_BLOCK_SAMPLES;
use crate::backend::soft::SoftMixer;
use crate::{PlaybackError, Result};
use log::debug;
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Audio source that renders the mixer block by block
struct MixerSource {
    mixer: Arc<SoftMixer>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    /// Last rendered block
    buffer: Vec<f32>,
    /// Current position in the block
    buffer_pos: usize,
}

impl MixerSource {
    fn new(mixer: Arc<SoftMixer>, finished: Arc<AtomicBool>) -> Self {
        let sample_rate = mixer.config().sample_rate;
        let channels = mixer.config().channels;
        // Whole frames only, so a block never splits left from right
        let block = RENDER_BLOCK_SAMPLES - RENDER_BLOCK_SAMPLES % channels as usize;
        MixerSource {
            mixer,
            sample_rate,
            channels,
            finished,
            buffer: vec![0.0f32; block],
            buffer_pos: block,
        }
    }
}

impl Source for MixerSource {
    fn current_frame_len(&self) -> Option<usize> {
        // Format never changes mid-stream
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for MixerSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.buffer_pos >= self.buffer.len() {
            self.mixer.render(&mut self.buffer);
            self.buffer_pos = 0;
        }
        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample.clamp(-1.0, 1.0))
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start rendering `mixer` into it
    pub fn new(mixer: Arc<SoftMixer>) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            PlaybackError::AudioDeviceError(format!("Failed to create audio stream: {e}"))
        })?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| {
            PlaybackError::AudioDeviceError(format!("Failed to create audio sink: {e}"))
        })?;

        let finished = Arc::new(AtomicBool::new(false));
        let config = mixer.config().clone();
        sink.append(MixerSource::new(mixer, Arc::clone(&finished)));
        debug!(
            "audio device opened: {} Hz, {} ch",
            config.sample_rate, config.channels
        );

        Ok(AudioDevice {
            _stream: stream,
            sink,
            running: Arc::new(AtomicBool::new(true)),
            finished,
        })
    }

    /// Pause output; the mixer is not rendered while paused
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume output
    pub fn play(&self) {
        self.sink.play();
    }

    /// Check if audio device is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop pulling from the mixer
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
        self.pause();
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, PlayParams, PlaybackInstance, Sample};

    fn mixer(channels: u16) -> Arc<SoftMixer> {
        let config = EngineConfig {
            channels,
            ..EngineConfig::default()
        };
        Arc::new(SoftMixer::new(config).unwrap())
    }

    fn try_audio_device() -> Option<AudioDevice> {
        match AudioDevice::new(mixer(2)) {
            Ok(device) => Some(device),
            Err(err) => {
                eprintln!(
                    "Skipping streaming::audio_device test (audio backend unavailable): {}",
                    err
                );
                None
            }
        }
    }

    #[test]
    fn test_audio_device_creation() {
        let Some(device) = try_audio_device() else {
            return;
        };
        assert!(device.is_running());
    }

    #[test]
    fn test_pause_and_play() {
        let Some(device) = try_audio_device() else {
            return;
        };
        device.pause();
        assert!(device.is_running());
        device.play();
        assert!(device.is_running());
    }

    #[test]
    fn test_source_reports_mixer_format() {
        let source = MixerSource::new(mixer(1), Arc::new(AtomicBool::new(false)));
        assert_eq!(source.sample_rate(), 44_100);
        assert_eq!(source.channels(), 1);
        assert_eq!(source.total_duration(), None);
    }

    #[test]
    fn test_source_plays_silence_when_idle() {
        let mut source = MixerSource::new(mixer(2), Arc::new(AtomicBool::new(false)));
        for _ in 0..RENDER_BLOCK_SAMPLES * 2 {
            assert_eq!(source.next(), Some(0.0));
        }
    }

    #[test]
    fn test_source_renders_playing_voice() {
        let mixer = mixer(1);
        let config = mixer.config().clone();
        let sample = Arc::new(Sample::from_f32(&[0.5; 4096], 44_100, 1).unwrap());
        let voice = PlaybackInstance::new(mixer.clone(), &config);
        voice.play(&sample, PlayParams::default()).unwrap();

        let mut source = MixerSource::new(mixer, Arc::new(AtomicBool::new(false)));
        let first = source.next().unwrap();
        assert!(first > 0.0);
        assert!(voice.position() > Duration::ZERO);
    }

    #[test]
    fn test_source_stops_after_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut source = MixerSource::new(mixer(2), Arc::clone(&finished));
        assert!(source.next().is_some());
        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }
}
