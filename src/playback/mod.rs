//! Playback instances
//!
//! A [`PlaybackInstance`] is one logical "player" that is reused across many
//! `play` calls. It starts every sound on a cheap plain channel and promotes
//! itself to a callback-fed stream the first time a pitch change is asked
//! for. Queries are answered by whichever handle is currently active.
//!
//! All methods take `&self`, so an instance can be shared behind an `Arc`
//! (for instance to subscribe it to a [`DeviceNotifier`](crate::DeviceNotifier)).

mod promotion;
mod state;

pub use state::{PlayParams, PlaybackState, PlaybackStatus};

use crate::allocator::ChannelAllocator;
use crate::backend::{
    Activity, Allocation, Attribute, ChannelHandle, Handle, MixerBackend, StreamHandle,
};
use crate::config::EngineConfig;
use crate::device::{DeviceId, DeviceListener};
use crate::feeder::FeederLink;
use crate::sample::{BitDepth, Sample, SampleFormat};
use crate::{PlaybackError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use state::check_range;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// The native resource currently backing an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveHandle {
    /// Plain sample channel
    Channel(ChannelHandle),
    /// Promoted stream fed by the instance's feeder
    Stream(StreamHandle),
}

impl From<ActiveHandle> for Handle {
    fn from(active: ActiveHandle) -> Self {
        match active {
            ActiveHandle::Channel(c) => Handle::Channel(c),
            ActiveHandle::Stream(s) => Handle::Stream(s),
        }
    }
}

struct InstanceState {
    active: Option<ActiveHandle>,
    sample: Weak<Sample>,
    format: SampleFormat,
    length: u64,
    duration: Duration,
    /// Last requested values; reported when no handle can answer
    params: PlayParams,
}

/// Controllable playback of one sample at a time
pub struct PlaybackInstance {
    allocator: ChannelAllocator,
    link: FeederLink,
    pitch_range: f32,
    state: Mutex<InstanceState>,
}

impl PlaybackInstance {
    /// Create a stopped instance on a shared backend
    pub fn new(backend: Arc<dyn MixerBackend>, config: &EngineConfig) -> Self {
        Self::with_allocator(ChannelAllocator::new(backend), config)
    }

    /// Create a stopped instance sharing an existing allocator
    pub fn with_allocator(allocator: ChannelAllocator, config: &EngineConfig) -> Self {
        PlaybackInstance {
            allocator,
            link: FeederLink::new(),
            pitch_range: config.pitch_range_semitones,
            state: Mutex::new(InstanceState {
                active: None,
                sample: Weak::new(),
                format: SampleFormat::new(config.sample_rate, config.channels, BitDepth::I16),
                length: 0,
                duration: Duration::ZERO,
                params: PlayParams::default(),
            }),
        }
    }

    fn backend(&self) -> &Arc<dyn MixerBackend> {
        self.allocator.backend()
    }

    /// Start playing `sample`, replacing whatever was playing.
    ///
    /// Returns `Ok(false)` and stays stopped when no channel is available.
    pub fn play(&self, sample: &Arc<Sample>, params: PlayParams) -> Result<bool> {
        params.validate()?;
        let mut st = self.state.lock();
        self.stop_locked(&mut st)?;

        let channel = match self.allocator.allocate(sample)? {
            Allocation::Granted(channel) => channel,
            Allocation::NoChannelAvailable => {
                debug!("play refused: no channel available");
                return Ok(false);
            }
        };
        st.active = Some(ActiveHandle::Channel(channel));
        st.sample = Arc::downgrade(sample);
        st.format = sample.format();
        st.length = sample.len_bytes();
        st.duration = sample.duration();
        st.params = params;

        let backend = self.backend();
        let handle = Handle::Channel(channel);
        backend.set_attribute(handle, Attribute::Volume, params.volume)?;
        backend.set_attribute(handle, Attribute::Pan, params.pan)?;
        backend.set_looping(handle, params.looping)?;

        if params.pitch != 0.0 {
            self.promote(&mut st, params.pitch)?;
        }

        if let Some(active) = st.active {
            backend.play(active.into())?;
            debug!("playing on {}", Handle::from(active));
        }
        Ok(true)
    }

    /// Release whatever handle is held. Safe when already stopped.
    pub fn stop(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.stop_locked(&mut st)
    }

    fn stop_locked(&self, st: &mut InstanceState) -> Result<()> {
        match st.active.take() {
            None => {}
            Some(ActiveHandle::Channel(channel)) => {
                self.allocator.release(channel)?;
                debug!("stopped channel #{}", channel.raw());
            }
            Some(ActiveHandle::Stream(stream)) => {
                // Detach the feeder first so an in-flight callback ends the stream
                self.link.invalidate();
                let handle = Handle::Stream(stream);
                if let Err(e) = self.backend().stop(handle) {
                    warn!("failed to stop {handle} before release: {e}");
                }
                self.backend().release(handle)?;
                debug!("stopped stream #{}", stream.raw());
            }
        }
        Ok(())
    }

    /// Pause; ignored unless playing
    pub fn pause(&self) -> Result<()> {
        let st = self.state.lock();
        if self.state_locked(&st) != PlaybackState::Playing {
            return Ok(());
        }
        if let Some(active) = st.active {
            self.backend().pause(active.into())?;
        }
        Ok(())
    }

    /// Resume; ignored unless paused
    pub fn resume(&self) -> Result<()> {
        let st = self.state.lock();
        if self.state_locked(&st) != PlaybackState::Paused {
            return Ok(());
        }
        if let Some(active) = st.active {
            self.backend().play(active.into())?;
        }
        Ok(())
    }

    fn require_active(
        &self,
        st: &InstanceState,
        operation: &'static str,
    ) -> Result<ActiveHandle> {
        let state = self.state_locked(st);
        match st.active {
            Some(active) if state != PlaybackState::Stopped => Ok(active),
            _ => Err(PlaybackError::InvalidState { operation, state }),
        }
    }

    /// Ramp the volume to `target` over `duration`
    pub fn slide_volume(&self, target: f32, duration: Duration) -> Result<()> {
        check_range("volume", target, 0.0, 1.0)?;
        let mut st = self.state.lock();
        let active = self.require_active(&st, "slide_volume")?;
        self.backend()
            .slide_attribute(active.into(), Attribute::Volume, target, duration)?;
        st.params.volume = target;
        Ok(())
    }

    /// Ramp the pan to `target` over `duration`
    pub fn slide_pan(&self, target: f32, duration: Duration) -> Result<()> {
        check_range("pan", target, -1.0, 1.0)?;
        let mut st = self.state.lock();
        let active = self.require_active(&st, "slide_pan")?;
        self.backend()
            .slide_attribute(active.into(), Attribute::Pan, target, duration)?;
        st.params.pan = target;
        Ok(())
    }

    /// Ramp the pitch to `target` over `duration`, promoting first if needed
    pub fn slide_pitch(&self, target: f32, duration: Duration) -> Result<()> {
        check_range("pitch", target, -1.0, 1.0)?;
        let mut st = self.state.lock();
        self.require_active(&st, "slide_pitch")?;
        let current = st.params.pitch;
        self.promote(&mut st, current)?;
        if let Some(active) = st.active {
            self.backend().slide_attribute(
                active.into(),
                Attribute::Pitch,
                target * self.pitch_range,
                duration,
            )?;
        }
        st.params.pitch = target;
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.state_locked(&self.state.lock())
    }

    fn state_locked(&self, st: &InstanceState) -> PlaybackState {
        match st.active {
            None => PlaybackState::Stopped,
            Some(active) => match self.backend().activity(active.into()) {
                Activity::Playing | Activity::Stalled => PlaybackState::Playing,
                Activity::Paused => PlaybackState::Paused,
                Activity::Stopped => PlaybackState::Stopped,
            },
        }
    }

    /// Whether the instance is playing
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Whether the instance has been promoted to a stream
    pub fn is_promoted(&self) -> bool {
        matches!(self.state.lock().active, Some(ActiveHandle::Stream(_)))
    }

    /// Playback position; zero when nothing is bound
    pub fn position(&self) -> Duration {
        self.position_locked(&self.state.lock())
    }

    fn position_locked(&self, st: &InstanceState) -> Duration {
        match st.active {
            None => Duration::ZERO,
            // The stream's own position counts bytes handed out by the feeder,
            // so the cursor is the authority
            Some(ActiveHandle::Stream(_)) => st.format.bytes_to_duration(self.link.cursor()),
            Some(ActiveHandle::Channel(channel)) => self
                .backend()
                .position_bytes(channel.into())
                .map(|bytes| st.format.bytes_to_duration(bytes))
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Seek to `position` within the bound sample.
    ///
    /// Not valid while stopped.
    pub fn set_position(&self, position: Duration) -> Result<()> {
        let st = self.state.lock();
        let active = self.require_active(&st, "set_position")?;
        if position > st.duration {
            return Err(PlaybackError::OutOfRange(format!(
                "position {position:?} beyond duration {:?}",
                st.duration
            )));
        }
        let bytes = st.format.duration_to_bytes(position).min(st.length);
        // Streams drop their buffered audio and reposition the feeder in one step
        self.backend().set_position_bytes(active.into(), bytes)?;
        Ok(())
    }

    /// Duration of the bound sample; zero when nothing is bound
    pub fn duration(&self) -> Duration {
        let st = self.state.lock();
        if st.active.is_some() {
            st.duration
        } else {
            Duration::ZERO
        }
    }

    fn attribute_locked(&self, st: &InstanceState, attribute: Attribute, fallback: f32) -> f32 {
        match st.active {
            Some(active) => self
                .backend()
                .attribute(active.into(), attribute)
                .unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Current volume
    pub fn volume(&self) -> f32 {
        let st = self.state.lock();
        self.attribute_locked(&st, Attribute::Volume, st.params.volume)
    }

    /// Set the volume
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        check_range("volume", volume, 0.0, 1.0)?;
        let mut st = self.state.lock();
        st.params.volume = volume;
        if let Some(active) = st.active {
            self.backend()
                .set_attribute(active.into(), Attribute::Volume, volume)?;
        }
        Ok(())
    }

    /// Current pan
    pub fn pan(&self) -> f32 {
        let st = self.state.lock();
        self.attribute_locked(&st, Attribute::Pan, st.params.pan)
    }

    /// Set the pan
    pub fn set_pan(&self, pan: f32) -> Result<()> {
        check_range("pan", pan, -1.0, 1.0)?;
        let mut st = self.state.lock();
        st.params.pan = pan;
        if let Some(active) = st.active {
            self.backend()
                .set_attribute(active.into(), Attribute::Pan, pan)?;
        }
        Ok(())
    }

    /// Current pitch in [-1, 1].
    ///
    /// Before promotion this is the requested pitch; afterwards it is read
    /// from the stream, so it follows slides.
    pub fn pitch(&self) -> f32 {
        self.pitch_locked(&self.state.lock())
    }

    fn pitch_locked(&self, st: &InstanceState) -> f32 {
        match st.active {
            Some(ActiveHandle::Stream(stream)) => self
                .backend()
                .attribute(stream.into(), Attribute::Pitch)
                .map(|semitones| semitones / self.pitch_range)
                .unwrap_or(st.params.pitch),
            _ => st.params.pitch,
        }
    }

    /// Set the pitch; a non-zero pitch on a plain channel promotes it
    pub fn set_pitch(&self, pitch: f32) -> Result<()> {
        check_range("pitch", pitch, -1.0, 1.0)?;
        let mut st = self.state.lock();
        st.params.pitch = pitch;
        match st.active {
            Some(ActiveHandle::Channel(_)) if pitch != 0.0 => self.promote(&mut st, pitch)?,
            Some(ActiveHandle::Stream(stream)) => self.backend().set_attribute(
                stream.into(),
                Attribute::Pitch,
                pitch * self.pitch_range,
            )?,
            _ => {}
        }
        Ok(())
    }

    /// Whether looping is enabled
    pub fn is_looping(&self) -> bool {
        self.looping_locked(&self.state.lock())
    }

    fn looping_locked(&self, st: &InstanceState) -> bool {
        match st.active {
            Some(ActiveHandle::Stream(_)) => self.link.is_looping(),
            Some(ActiveHandle::Channel(channel)) => self
                .backend()
                .is_looping(channel.into())
                .unwrap_or(st.params.looping),
            None => st.params.looping,
        }
    }

    /// Enable or disable looping
    pub fn set_looping(&self, looping: bool) -> Result<()> {
        let mut st = self.state.lock();
        st.params.looping = looping;
        match st.active {
            Some(ActiveHandle::Stream(stream)) => {
                self.link.set_looping(looping);
                self.backend().set_looping(stream.into(), looping)?;
            }
            Some(ActiveHandle::Channel(channel)) => {
                self.backend().set_looping(channel.into(), looping)?;
            }
            None => {}
        }
        Ok(())
    }

    /// Snapshot of every queryable property
    pub fn status(&self) -> PlaybackStatus {
        let st = self.state.lock();
        PlaybackStatus {
            state: self.state_locked(&st),
            position: self.position_locked(&st),
            duration: if st.active.is_some() {
                st.duration
            } else {
                Duration::ZERO
            },
            volume: self.attribute_locked(&st, Attribute::Volume, st.params.volume),
            pitch: self.pitch_locked(&st),
            pan: self.attribute_locked(&st, Attribute::Pan, st.params.pan),
            looping: self.looping_locked(&st),
            promoted: matches!(st.active, Some(ActiveHandle::Stream(_))),
        }
    }
}

impl DeviceListener for PlaybackInstance {
    fn device_changed(&self, device: &DeviceId) {
        debug!("device changed to {device}, tearing down");
        if let Err(e) = self.stop() {
            warn!("teardown on device change failed: {e}");
        }
    }
}

impl Drop for PlaybackInstance {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("failed to release handle on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceNotifier, SoftMixer};
    use approx::assert_relative_eq;

    fn config(max_channels: usize) -> EngineConfig {
        EngineConfig {
            sample_rate: 8_000,
            channels: 1,
            max_channels,
            stream_chunk_bytes: 64,
            ..EngineConfig::default()
        }
    }

    fn setup(max_channels: usize) -> (Arc<SoftMixer>, PlaybackInstance) {
        let config = config(max_channels);
        let mixer = Arc::new(SoftMixer::new(config.clone()).unwrap());
        let voice = PlaybackInstance::new(mixer.clone(), &config);
        (mixer, voice)
    }

    /// One second of a mono 16-bit ramp at 8 kHz
    fn second() -> Arc<Sample> {
        let frames: Vec<i16> = (0..8_000).map(|i| (i % 100) as i16 * 300).collect();
        Arc::new(Sample::from_i16(&frames, 8_000, 1).unwrap())
    }

    #[test]
    fn test_stopped_instance_reports_neutral_values() {
        let (_mixer, voice) = setup(4);
        let status = voice.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.position, Duration::ZERO);
        assert_eq!(status.duration, Duration::ZERO);
        assert_relative_eq!(status.volume, 1.0);
        assert_relative_eq!(status.pitch, 0.0);
        assert!(!status.looping);
        assert!(!status.promoted);
        assert!(voice.stop().is_ok());
        assert!(voice.pause().is_ok());
        assert!(voice.resume().is_ok());
    }

    #[test]
    fn test_play_pause_resume_stop() {
        let (mixer, voice) = setup(4);
        assert!(voice.play(&second(), PlayParams::default()).unwrap());
        assert!(voice.is_playing());
        assert!(!voice.is_promoted());
        assert_eq!(voice.duration(), Duration::from_secs(1));

        voice.pause().unwrap();
        assert_eq!(voice.state(), PlaybackState::Paused);
        voice.pause().unwrap();
        assert_eq!(voice.state(), PlaybackState::Paused);
        voice.resume().unwrap();
        assert_eq!(voice.state(), PlaybackState::Playing);

        voice.stop().unwrap();
        assert_eq!(voice.state(), PlaybackState::Stopped);
        assert_eq!(mixer.live_voices(), 0);
        voice.stop().unwrap();
    }

    #[test]
    fn test_exhaustion_returns_false_and_stays_stopped() {
        let (mixer, first) = setup(1);
        let second_voice = PlaybackInstance::new(mixer.clone(), &config(1));
        assert!(first.play(&second(), PlayParams::default()).unwrap());
        assert!(!second_voice.play(&second(), PlayParams::default()).unwrap());
        assert_eq!(second_voice.state(), PlaybackState::Stopped);
        assert_eq!(mixer.live_voices(), 1);

        first.stop().unwrap();
        assert!(second_voice.play(&second(), PlayParams::default()).unwrap());
    }

    #[test]
    fn test_replay_releases_previous_handle() {
        let (mixer, voice) = setup(4);
        let sample = second();
        voice.play(&sample, PlayParams::default()).unwrap();
        voice.set_pitch(0.3).unwrap();
        voice.play(&sample, PlayParams::default()).unwrap();
        assert_eq!(mixer.live_voices(), 1);
        assert!(!voice.is_promoted());
        assert_relative_eq!(voice.pitch(), 0.0);
    }

    #[test]
    fn test_operations_rejected_while_stopped() {
        let (_mixer, voice) = setup(4);
        let err = voice
            .slide_volume(0.5, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            PlaybackError::InvalidState {
                operation: "slide_volume",
                state: PlaybackState::Stopped
            }
        ));
        assert!(voice.slide_pan(0.5, Duration::ZERO).is_err());
        assert!(voice.slide_pitch(0.5, Duration::ZERO).is_err());
        assert!(voice.set_position(Duration::ZERO).is_err());
    }

    #[test]
    fn test_setters_reject_out_of_range() {
        let (_mixer, voice) = setup(4);
        assert!(matches!(
            voice.set_volume(2.0),
            Err(PlaybackError::OutOfRange(_))
        ));
        assert!(voice.set_pan(-1.5).is_err());
        assert!(voice.set_pitch(f32::INFINITY).is_err());
        assert!(voice
            .play(&second(), PlayParams::default().volume(-0.1))
            .is_err());
    }

    #[test]
    fn test_setters_while_stopped_are_remembered() {
        let (_mixer, voice) = setup(4);
        voice.set_volume(0.25).unwrap();
        voice.set_pan(0.5).unwrap();
        voice.set_looping(true).unwrap();
        assert_relative_eq!(voice.volume(), 0.25);
        assert_relative_eq!(voice.pan(), 0.5);
        assert!(voice.is_looping());
    }

    #[test]
    fn test_seek_on_channel_and_stream() {
        let (mixer, voice) = setup(4);
        voice.play(&second(), PlayParams::default()).unwrap();
        voice.set_position(Duration::from_millis(500)).unwrap();
        assert_eq!(voice.position(), Duration::from_millis(500));

        voice.set_pitch(0.5).unwrap();
        assert_eq!(voice.position(), Duration::from_millis(500));
        voice.set_position(Duration::from_millis(250)).unwrap();
        assert_eq!(voice.position(), Duration::from_millis(250));

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        // Position never runs more than one chunk (32 frames) ahead
        let position = voice.position();
        assert!(position > Duration::from_millis(250));
        assert!(position <= Duration::from_millis(254));

        assert!(matches!(
            voice.set_position(Duration::from_secs(2)),
            Err(PlaybackError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_set_looping_on_stream_reaches_feeder() {
        let (_mixer, voice) = setup(4);
        voice.play(&second(), PlayParams::default().pitch(0.2)).unwrap();
        assert!(!voice.is_looping());
        voice.set_looping(true).unwrap();
        assert!(voice.is_looping());
        assert!(voice.link.is_looping());
    }

    #[test]
    fn test_device_change_tears_down() {
        let (mixer, voice) = setup(4);
        let voice = Arc::new(voice);
        let notifier = DeviceNotifier::new();
        notifier.subscribe(voice.clone());

        voice.play(&second(), PlayParams::default().pitch(0.5)).unwrap();
        assert!(voice.is_promoted());

        assert_eq!(notifier.notify(&DeviceId::new("hdmi")), 1);
        assert_eq!(voice.state(), PlaybackState::Stopped);
        assert!(!voice.is_promoted());
        assert!(!voice.link.is_bound());
        assert_eq!(mixer.live_voices(), 0);
    }

    #[test]
    fn test_drop_releases_handle() {
        let (mixer, voice) = setup(4);
        voice.play(&second(), PlayParams::default()).unwrap();
        assert_eq!(mixer.live_voices(), 1);
        drop(voice);
        assert_eq!(mixer.live_voices(), 0);
    }

    #[test]
    fn test_natural_end_reports_stopped() {
        let (mixer, voice) = setup(4);
        let short = Arc::new(Sample::from_i16(&[100; 16], 8_000, 1).unwrap());
        voice.play(&short, PlayParams::default()).unwrap();

        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out);
        assert_eq!(voice.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_disposed_sample_ends_promoted_stream() {
        let (mixer, voice) = setup(4);
        let sample = second();
        voice.play(&sample, PlayParams::default().pitch(0.1)).unwrap();
        drop(sample);

        let mut out = vec![0.0f32; 64];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(voice.state(), PlaybackState::Stopped);
    }
}
