//! In-process software mixer
//!
//! Reference [`MixerBackend`] that keeps every voice in memory and sums them
//! into an interleaved `f32` buffer when [`SoftMixer::render`] is called.
//! Whoever calls `render` (an output device callback, an offline export loop)
//! is the mixing thread: stream sources are pulled from inside that call.
//!
//! Features:
//! - Fixed cap on plain channels; requests beyond it report no channel
//!   available. Streams are not capped.
//! - Nearest-frame varispeed used as the pitch-shift filter
//! - Linear attribute ramps advanced once per render block
//! - Constant output gain for headroom, no normalization

use super::{
    Activity, Allocation, Attribute, BackendError, BackendResult, ChannelHandle, FeedResult,
    Handle, MixerBackend, StreamHandle, StreamSource,
};
use crate::config::EngineConfig;
use crate::device::DeviceId;
use crate::sample::{Sample, SampleFormat};
use crate::Result;
use bitflags::bitflags;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest pitch shift the varispeed filter accepts, in semitones
const MAX_PITCH_SEMITONES: f32 = 48.0;

bitflags! {
    /// Per-voice behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VoiceFlags: u8 {
        /// Restart from the beginning at the end of channel data
        const LOOP = 0x01;
        /// Pitch-shift filter attached (streams only)
        const PITCH_SHIFT = 0x02;
        /// Stream source reported end of stream
        const SOURCE_ENDED = 0x04;
        /// Played at least once
        const STARTED = 0x08;
    }
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f32,
    to: f32,
    elapsed: f32,
    duration: f32,
}

/// Attribute value with an optional linear ramp
#[derive(Debug, Clone, Copy)]
struct Param {
    value: f32,
    ramp: Option<Ramp>,
}

impl Param {
    fn new(value: f32) -> Self {
        Param { value, ramp: None }
    }

    fn current(&self) -> f32 {
        match self.ramp {
            Some(r) => r.from + (r.to - r.from) * (r.elapsed / r.duration),
            None => self.value,
        }
    }

    fn set(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    fn slide(&mut self, target: f32, duration: Duration) {
        let secs = duration.as_secs_f32();
        if secs <= 0.0 {
            self.set(target);
            return;
        }
        self.ramp = Some(Ramp {
            from: self.current(),
            to: target,
            elapsed: 0.0,
            duration: secs,
        });
    }

    fn advance(&mut self, secs: f32) {
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.elapsed += secs;
            if ramp.elapsed >= ramp.duration {
                self.value = ramp.to;
                self.ramp = None;
            }
        }
    }
}

enum VoiceData {
    Channel {
        data: Arc<[u8]>,
        cursor: u64,
    },
    Stream {
        source: Box<dyn StreamSource>,
        pending: Vec<u8>,
        pending_pos: usize,
        consumed: u64,
    },
}

enum FrameRead {
    Frame([f32; 2]),
    Starved,
    Ended,
}

struct Voice {
    data: VoiceData,
    format: SampleFormat,
    activity: Activity,
    flags: VoiceFlags,
    volume: Param,
    pan: Param,
    pitch: Param,
    /// Fractional source frames owed before the held frame changes
    phase: f64,
    held: [f32; 2],
}

impl Voice {
    fn new(data: VoiceData, format: SampleFormat) -> Self {
        Voice {
            data,
            format,
            activity: Activity::Stopped,
            flags: VoiceFlags::empty(),
            volume: Param::new(1.0),
            pan: Param::new(0.0),
            pitch: Param::new(0.0),
            phase: 1.0,
            held: [0.0; 2],
        }
    }

    fn is_stream(&self) -> bool {
        matches!(self.data, VoiceData::Stream { .. })
    }

    fn param(&self, handle: Handle, attribute: Attribute) -> BackendResult<&Param> {
        match attribute {
            Attribute::Volume => Ok(&self.volume),
            Attribute::Pan => Ok(&self.pan),
            Attribute::Pitch if self.flags.contains(VoiceFlags::PITCH_SHIFT) => Ok(&self.pitch),
            Attribute::Pitch => Err(BackendError::UnsupportedAttribute { attribute, handle }),
        }
    }

    fn param_mut(&mut self, handle: Handle, attribute: Attribute) -> BackendResult<&mut Param> {
        match attribute {
            Attribute::Volume => Ok(&mut self.volume),
            Attribute::Pan => Ok(&mut self.pan),
            Attribute::Pitch if self.flags.contains(VoiceFlags::PITCH_SHIFT) => {
                Ok(&mut self.pitch)
            }
            Attribute::Pitch => Err(BackendError::UnsupportedAttribute { attribute, handle }),
        }
    }

    fn decode_frame(format: SampleFormat, bytes: &[u8]) -> [f32; 2] {
        let width = format.bit_depth.bytes_per_sample();
        let left = format.bit_depth.decode(bytes);
        if format.channels == 1 {
            [left, left]
        } else {
            [left, format.bit_depth.decode(&bytes[width..])]
        }
    }

    fn next_frame(&mut self, chunk_bytes: usize) -> FrameRead {
        let align = self.format.block_align();
        let format = self.format;
        let looping = self.flags.contains(VoiceFlags::LOOP);

        match &mut self.data {
            VoiceData::Channel { data, cursor } => {
                let len = data.len() as u64;
                if *cursor + align as u64 > len {
                    if !looping || len < align as u64 {
                        return FrameRead::Ended;
                    }
                    *cursor = 0;
                }
                let start = *cursor as usize;
                *cursor += align as u64;
                FrameRead::Frame(Self::decode_frame(format, &data[start..start + align]))
            }
            VoiceData::Stream {
                source,
                pending,
                pending_pos,
                consumed,
            } => {
                if pending.len() - *pending_pos < align {
                    if self.flags.contains(VoiceFlags::SOURCE_ENDED) {
                        return FrameRead::Ended;
                    }
                    // Whole frames only, so the source cursor stays frame aligned
                    let request = (chunk_bytes - chunk_bytes % align).max(align);
                    // Keep any partial frame, then pull a fresh chunk behind it
                    pending.drain(..*pending_pos);
                    *pending_pos = 0;
                    let kept = pending.len();
                    pending.resize(kept + request, 0);
                    let FeedResult {
                        written,
                        end_of_stream,
                    } = source.feed(&mut pending[kept..]);
                    pending.truncate(kept + written.min(request));
                    trace!("stream source fed {written} bytes (eos: {end_of_stream})");
                    if end_of_stream {
                        self.flags.insert(VoiceFlags::SOURCE_ENDED);
                    }
                    if pending.len() < align {
                        return if self.flags.contains(VoiceFlags::SOURCE_ENDED) {
                            FrameRead::Ended
                        } else {
                            FrameRead::Starved
                        };
                    }
                }
                let start = *pending_pos;
                *pending_pos += align;
                *consumed += align as u64;
                FrameRead::Frame(Self::decode_frame(format, &pending[start..start + align]))
            }
        }
    }

    fn mix_into(&mut self, out: &mut [f32], out_channels: usize, out_rate: u32, chunk: usize) {
        let mut step = self.format.sample_rate as f64 / out_rate as f64;
        if self.flags.contains(VoiceFlags::PITCH_SHIFT) {
            step *= 2f64.powf(self.pitch.current() as f64 / 12.0);
        }

        let volume = self.volume.current();
        let pan = self.pan.current();
        let left_gain = volume * (1.0 - pan).min(1.0) * SoftMixer::OUTPUT_GAIN;
        let right_gain = volume * (1.0 + pan).min(1.0) * SoftMixer::OUTPUT_GAIN;

        for frame in out.chunks_exact_mut(out_channels) {
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                match self.next_frame(chunk) {
                    FrameRead::Frame(f) => {
                        self.held = f;
                        self.activity = Activity::Playing;
                    }
                    FrameRead::Starved => {
                        self.held = [0.0; 2];
                        self.activity = Activity::Stalled;
                    }
                    FrameRead::Ended => {
                        self.held = [0.0; 2];
                        self.activity = Activity::Stopped;
                        self.phase = 1.0;
                        return;
                    }
                }
            }
            self.phase += step;

            let left = self.held[0] * left_gain;
            let right = self.held[1] * right_gain;
            if out_channels == 1 {
                frame[0] += (left + right) * 0.5;
            } else {
                frame[0] += left;
                frame[1] += right;
            }
        }
    }

    fn advance_params(&mut self, secs: f32) {
        self.volume.advance(secs);
        self.pan.advance(secs);
        self.pitch.advance(secs);
    }
}

struct MixerState {
    voices: HashMap<u32, Voice>,
    device: DeviceId,
}

/// Software mixing backend
pub struct SoftMixer {
    config: EngineConfig,
    state: Mutex<MixerState>,
    next_id: AtomicU32,
}

impl SoftMixer {
    /// Output gain scaling to keep summed voices within comfortable headroom
    const OUTPUT_GAIN: f32 = 0.75;

    /// Create a mixer bound to the default device
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "soft mixer: {} Hz, {} ch, {} voices",
            config.sample_rate, config.channels, config.max_channels
        );
        Ok(SoftMixer {
            config,
            state: Mutex::new(MixerState {
                voices: HashMap::new(),
                device: DeviceId::default(),
            }),
            next_id: AtomicU32::new(1),
        })
    }

    /// Mixer configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of handles (channels and streams) not yet released
    pub fn live_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Device currently rendered to
    pub fn device(&self) -> DeviceId {
        self.state.lock().device.clone()
    }

    /// Switch output device. Every handle still alive is invalidated.
    pub fn rebind(&self, device: DeviceId) {
        let mut state = self.state.lock();
        let dropped = state.voices.len();
        state.voices.clear();
        debug!("soft mixer rebound to {device}, dropped {dropped} stale voices");
        state.device = device;
    }

    /// Mix every playing voice into `out` (interleaved, configured channel count).
    ///
    /// The buffer is overwritten. Stream sources are pulled from inside this call.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let out_channels = self.config.channels as usize;
        let frames = out.len() / out_channels;
        if frames == 0 {
            return;
        }
        let secs = frames as f32 / self.config.sample_rate as f32;
        let usable = frames * out_channels;

        let mut state = self.state.lock();
        for voice in state.voices.values_mut() {
            if matches!(voice.activity, Activity::Playing | Activity::Stalled) {
                voice.mix_into(
                    &mut out[..usable],
                    out_channels,
                    self.config.sample_rate,
                    self.config.stream_chunk_bytes,
                );
                voice.advance_params(secs);
            }
        }
    }

    fn next_handle_id(&self) -> NonZeroU32 {
        loop {
            if let Some(id) = NonZeroU32::new(self.next_id.fetch_add(1, Ordering::Relaxed)) {
                return id;
            }
        }
    }

    fn check_format(format: SampleFormat) -> BackendResult<()> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(BackendError::InvalidFormat(format!(
                "{} Hz / {} channels",
                format.sample_rate, format.channels
            )));
        }
        Ok(())
    }

    fn with_voice<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut Voice) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.state.lock();
        let voice = state
            .voices
            .get_mut(&handle.raw())
            .filter(|v| v.is_stream() == matches!(handle, Handle::Stream(_)))
            .ok_or(BackendError::InvalidHandle(handle))?;
        f(voice)
    }
}

fn clamp_attribute(attribute: Attribute, value: f32) -> f32 {
    match attribute {
        Attribute::Volume => value.clamp(0.0, 1.0),
        Attribute::Pan => value.clamp(-1.0, 1.0),
        Attribute::Pitch => value.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES),
    }
}

impl MixerBackend for SoftMixer {
    fn allocate_channel(&self, sample: &Sample) -> BackendResult<Allocation> {
        Self::check_format(sample.format())?;
        let mut state = self.state.lock();
        let channels = state.voices.values().filter(|v| !v.is_stream()).count();
        if channels >= self.config.max_channels {
            debug!("no channel available ({channels} channels live)");
            return Ok(Allocation::NoChannelAvailable);
        }
        let id = self.next_handle_id();
        let data = VoiceData::Channel {
            data: sample.data(),
            cursor: 0,
        };
        state.voices.insert(id.get(), Voice::new(data, sample.format()));
        trace!("allocated channel #{id}");
        Ok(Allocation::Granted(ChannelHandle::from_raw(id)))
    }

    fn create_stream(
        &self,
        format: SampleFormat,
        source: Box<dyn StreamSource>,
    ) -> BackendResult<StreamHandle> {
        Self::check_format(format)?;
        let id = self.next_handle_id();
        let data = VoiceData::Stream {
            source,
            pending: Vec::with_capacity(self.config.stream_chunk_bytes),
            pending_pos: 0,
            consumed: 0,
        };
        self.state
            .lock()
            .voices
            .insert(id.get(), Voice::new(data, format));
        trace!("created stream #{id}");
        Ok(StreamHandle::from_raw(id))
    }

    fn attach_pitch_shift(&self, stream: StreamHandle) -> BackendResult<()> {
        self.with_voice(stream.into(), |voice| {
            voice.flags.insert(VoiceFlags::PITCH_SHIFT);
            Ok(())
        })
    }

    fn release(&self, handle: Handle) -> BackendResult<()> {
        if self.state.lock().voices.remove(&handle.raw()).is_some() {
            trace!("released {handle}");
        }
        Ok(())
    }

    fn play(&self, handle: Handle) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            if voice.activity == Activity::Stopped {
                if let VoiceData::Channel { data, cursor } = &mut voice.data {
                    if *cursor >= data.len() as u64 {
                        *cursor = 0;
                        voice.phase = 1.0;
                    }
                }
            }
            voice.activity = Activity::Playing;
            voice.flags.insert(VoiceFlags::STARTED);
            Ok(())
        })
    }

    fn pause(&self, handle: Handle) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            let unstarted = !voice.flags.contains(VoiceFlags::STARTED);
            match voice.activity {
                Activity::Playing | Activity::Stalled => voice.activity = Activity::Paused,
                Activity::Stopped if unstarted => {
                    voice.activity = Activity::Paused;
                    voice.flags.insert(VoiceFlags::STARTED);
                }
                _ => {}
            }
            Ok(())
        })
    }

    fn stop(&self, handle: Handle) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            voice.activity = Activity::Stopped;
            Ok(())
        })
    }

    fn activity(&self, handle: Handle) -> Activity {
        self.with_voice(handle, |voice| Ok(voice.activity))
            .unwrap_or(Activity::Stopped)
    }

    fn position_bytes(&self, handle: Handle) -> BackendResult<u64> {
        self.with_voice(handle, |voice| {
            Ok(match &voice.data {
                VoiceData::Channel { cursor, .. } => *cursor,
                VoiceData::Stream { consumed, .. } => *consumed,
            })
        })
    }

    fn set_position_bytes(&self, handle: Handle, position: u64) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            let format = voice.format;
            match &mut voice.data {
                VoiceData::Channel { data, cursor } => {
                    let length = data.len() as u64;
                    if position > length {
                        return Err(BackendError::PositionOutOfRange {
                            requested: position,
                            length,
                        });
                    }
                    *cursor = format.align_down(position);
                    voice.phase = 1.0;
                    Ok(())
                }
                VoiceData::Stream {
                    source,
                    pending,
                    pending_pos,
                    consumed,
                } => {
                    let position = format.align_down(position);
                    if !source.seek(position) {
                        return Err(BackendError::NotSeekable(handle));
                    }
                    pending.clear();
                    *pending_pos = 0;
                    *consumed = position;
                    voice.flags.remove(VoiceFlags::SOURCE_ENDED);
                    voice.phase = 1.0;
                    trace!("{handle} flushed and seeked to byte {position}");
                    Ok(())
                }
            }
        })
    }

    fn attribute(&self, handle: Handle, attribute: Attribute) -> BackendResult<f32> {
        self.with_voice(handle, |voice| {
            voice.param(handle, attribute).map(Param::current)
        })
    }

    fn set_attribute(
        &self,
        handle: Handle,
        attribute: Attribute,
        value: f32,
    ) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            voice
                .param_mut(handle, attribute)?
                .set(clamp_attribute(attribute, value));
            Ok(())
        })
    }

    fn slide_attribute(
        &self,
        handle: Handle,
        attribute: Attribute,
        target: f32,
        duration: Duration,
    ) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            voice
                .param_mut(handle, attribute)?
                .slide(clamp_attribute(attribute, target), duration);
            Ok(())
        })
    }

    fn set_looping(&self, handle: Handle, looping: bool) -> BackendResult<()> {
        self.with_voice(handle, |voice| {
            voice.flags.set(VoiceFlags::LOOP, looping);
            Ok(())
        })
    }

    fn is_looping(&self, handle: Handle) -> BackendResult<bool> {
        self.with_voice(handle, |voice| Ok(voice.flags.contains(VoiceFlags::LOOP)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mono_config(max_channels: usize) -> EngineConfig {
        EngineConfig {
            sample_rate: 8_000,
            channels: 1,
            max_channels,
            ..EngineConfig::default()
        }
    }

    fn dc_sample(frames: usize, value: f32) -> Sample {
        Sample::from_f32(&vec![value; frames], 8_000, 1).unwrap()
    }

    fn granted(allocation: Allocation) -> ChannelHandle {
        match allocation {
            Allocation::Granted(handle) => handle,
            Allocation::NoChannelAvailable => panic!("expected a channel"),
        }
    }

    struct CountingSource {
        remaining: usize,
    }

    impl StreamSource for CountingSource {
        fn feed(&mut self, dest: &mut [u8]) -> FeedResult {
            let n = dest.len().min(self.remaining);
            for chunk in dest[..n].chunks_exact_mut(4) {
                chunk.copy_from_slice(&0.5f32.to_le_bytes());
            }
            self.remaining -= n;
            FeedResult {
                written: n,
                end_of_stream: self.remaining == 0,
            }
        }
    }

    /// Mono f32 source whose frame `n` has the value `n / 100`
    struct RampSource {
        cursor: u64,
        length: u64,
        requests: Arc<Mutex<Vec<usize>>>,
    }

    impl StreamSource for RampSource {
        fn feed(&mut self, dest: &mut [u8]) -> FeedResult {
            self.requests.lock().push(dest.len());
            let n = dest.len().min((self.length - self.cursor) as usize);
            for chunk in dest[..n].chunks_exact_mut(4) {
                let value = (self.cursor / 4) as f32 / 100.0;
                chunk.copy_from_slice(&value.to_le_bytes());
                self.cursor += 4;
            }
            FeedResult {
                written: n,
                end_of_stream: self.cursor >= self.length,
            }
        }

        fn seek(&mut self, position: u64) -> bool {
            self.cursor = position.min(self.length);
            true
        }
    }

    #[test]
    fn test_channel_cap() {
        let mixer = SoftMixer::new(mono_config(2)).unwrap();
        let sample = dc_sample(16, 0.5);
        let a = granted(mixer.allocate_channel(&sample).unwrap());
        granted(mixer.allocate_channel(&sample).unwrap());
        assert_eq!(
            mixer.allocate_channel(&sample).unwrap(),
            Allocation::NoChannelAvailable
        );

        mixer.release(a.into()).unwrap();
        assert!(matches!(
            mixer.allocate_channel(&sample).unwrap(),
            Allocation::Granted(_)
        ));
    }

    #[test]
    fn test_streams_do_not_use_channel_slots() {
        let mixer = SoftMixer::new(mono_config(1)).unwrap();
        let fmt = dc_sample(1, 0.0).format();
        mixer
            .create_stream(fmt, Box::new(CountingSource { remaining: 64 }))
            .unwrap();
        granted(mixer.allocate_channel(&dc_sample(4, 0.0)).unwrap());
        assert_eq!(mixer.live_voices(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let ch = granted(mixer.allocate_channel(&dc_sample(4, 0.0)).unwrap());
        mixer.release(ch.into()).unwrap();
        mixer.release(ch.into()).unwrap();
        assert_eq!(mixer.live_voices(), 0);
        assert_eq!(mixer.activity(ch.into()), Activity::Stopped);
        assert!(matches!(
            mixer.play(ch.into()),
            Err(BackendError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_render_applies_volume_and_stops_at_end() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let ch = granted(mixer.allocate_channel(&dc_sample(8, 0.5)).unwrap());
        let handle = Handle::from(ch);
        mixer.set_attribute(handle, Attribute::Volume, 0.5).unwrap();
        mixer.play(handle).unwrap();

        let mut out = vec![0.0f32; 16];
        mixer.render(&mut out);
        assert_relative_eq!(out[0], 0.5 * 0.5 * SoftMixer::OUTPUT_GAIN);
        assert_relative_eq!(out[7], 0.5 * 0.5 * SoftMixer::OUTPUT_GAIN);
        assert_eq!(out[8], 0.0);
        assert_eq!(mixer.activity(handle), Activity::Stopped);
        assert_eq!(mixer.position_bytes(handle).unwrap(), 32);
    }

    #[test]
    fn test_looping_channel_wraps() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let handle = Handle::from(granted(mixer.allocate_channel(&dc_sample(4, 1.0)).unwrap()));
        mixer.set_looping(handle, true).unwrap();
        mixer.play(handle).unwrap();

        let mut out = vec![0.0f32; 10];
        mixer.render(&mut out);
        assert!(out.iter().all(|s| *s > 0.0));
        assert_eq!(mixer.activity(handle), Activity::Playing);
    }

    #[test]
    fn test_pitch_requires_filter() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let ch = Handle::from(granted(mixer.allocate_channel(&dc_sample(4, 0.0)).unwrap()));
        assert!(matches!(
            mixer.set_attribute(ch, Attribute::Pitch, 3.0),
            Err(BackendError::UnsupportedAttribute { .. })
        ));
        assert!(mixer.attach_pitch_shift(StreamHandle(NonZeroU32::MIN)).is_err());

        let fmt = dc_sample(1, 0.0).format();
        let stream = mixer
            .create_stream(fmt, Box::new(CountingSource { remaining: 64 }))
            .unwrap();
        mixer.attach_pitch_shift(stream).unwrap();
        mixer
            .set_attribute(stream.into(), Attribute::Pitch, 12.0)
            .unwrap();
        assert_relative_eq!(
            mixer.attribute(stream.into(), Attribute::Pitch).unwrap(),
            12.0
        );
    }

    #[test]
    fn test_stream_pulls_source_until_end() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let fmt = dc_sample(1, 0.0).format();
        let stream = mixer
            .create_stream(fmt, Box::new(CountingSource { remaining: 40 }))
            .unwrap();
        mixer.play(stream.into()).unwrap();

        let mut out = vec![0.0f32; 16];
        mixer.render(&mut out);
        assert_eq!(mixer.position_bytes(stream.into()).unwrap(), 40);
        assert!(out[..10].iter().all(|s| *s > 0.0));
        assert!(out[10..].iter().all(|s| *s == 0.0));
        assert_eq!(mixer.activity(stream.into()), Activity::Stopped);
        assert!(matches!(
            mixer.set_position_bytes(stream.into(), 0),
            Err(BackendError::NotSeekable(_))
        ));
    }

    #[test]
    fn test_stream_pulls_whole_frames_and_seek_flushes() {
        let config = EngineConfig {
            stream_chunk_bytes: 17,
            ..mono_config(4)
        };
        let mixer = SoftMixer::new(config).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let source = RampSource {
            cursor: 0,
            length: 400,
            requests: requests.clone(),
        };
        let fmt = dc_sample(1, 0.0).format();
        let stream = Handle::from(mixer.create_stream(fmt, Box::new(source)).unwrap());
        mixer.play(stream).unwrap();

        // Leaves one pulled frame buffered
        let mut out = vec![0.0f32; 3];
        mixer.render(&mut out);
        assert_relative_eq!(out[2], 0.02 * SoftMixer::OUTPUT_GAIN);
        assert!(requests.lock().iter().all(|len| *len == 16));

        mixer.set_position_bytes(stream, 202).unwrap();
        assert_eq!(mixer.position_bytes(stream).unwrap(), 200);

        let mut out = vec![0.0f32; 6];
        mixer.render(&mut out);
        for (i, sample) in out.iter().enumerate() {
            assert_relative_eq!(*sample, (50 + i) as f32 / 100.0 * SoftMixer::OUTPUT_GAIN);
        }
        assert!(requests.lock().iter().all(|len| *len == 16));
    }

    #[test]
    fn test_seek_revives_ended_stream() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let source = RampSource {
            cursor: 0,
            length: 16,
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let fmt = dc_sample(1, 0.0).format();
        let stream = Handle::from(mixer.create_stream(fmt, Box::new(source)).unwrap());
        mixer.play(stream).unwrap();

        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        assert_eq!(mixer.activity(stream), Activity::Stopped);

        mixer.set_position_bytes(stream, 8).unwrap();
        mixer.play(stream).unwrap();
        mixer.render(&mut out);
        assert_relative_eq!(out[0], 0.02 * SoftMixer::OUTPUT_GAIN);
        assert_relative_eq!(out[1], 0.03 * SoftMixer::OUTPUT_GAIN);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_pause_before_play_does_not_pull() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let source = RampSource {
            cursor: 0,
            length: 400,
            requests: requests.clone(),
        };
        let fmt = dc_sample(1, 0.0).format();
        let stream = Handle::from(mixer.create_stream(fmt, Box::new(source)).unwrap());

        mixer.pause(stream).unwrap();
        assert_eq!(mixer.activity(stream), Activity::Paused);
        let mut out = vec![0.0f32; 8];
        mixer.render(&mut out);
        assert!(requests.lock().is_empty());
        assert!(out.iter().all(|s| *s == 0.0));

        mixer.play(stream).unwrap();
        mixer.render(&mut out);
        assert!(!requests.lock().is_empty());
        assert_eq!(mixer.position_bytes(stream).unwrap(), 32);

        // Once started, stop is final for pause
        mixer.stop(stream).unwrap();
        mixer.pause(stream).unwrap();
        assert_eq!(mixer.activity(stream), Activity::Stopped);
    }

    #[test]
    fn test_slide_reaches_target() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        let handle = Handle::from(granted(
            mixer.allocate_channel(&dc_sample(8_000, 0.1)).unwrap(),
        ));
        mixer.play(handle).unwrap();
        mixer
            .slide_attribute(handle, Attribute::Volume, 0.0, Duration::from_millis(100))
            .unwrap();

        let mut out = vec![0.0f32; 400]; // 50ms
        mixer.render(&mut out);
        assert_relative_eq!(
            mixer.attribute(handle, Attribute::Volume).unwrap(),
            0.5,
            epsilon = 1e-4
        );
        mixer.render(&mut out);
        assert_relative_eq!(mixer.attribute(handle, Attribute::Volume).unwrap(), 0.0);
    }

    #[test]
    fn test_pan_hard_left() {
        let config = EngineConfig {
            sample_rate: 8_000,
            channels: 2,
            ..EngineConfig::default()
        };
        let mixer = SoftMixer::new(config).unwrap();
        let handle = Handle::from(granted(mixer.allocate_channel(&dc_sample(8, 1.0)).unwrap()));
        mixer.set_attribute(handle, Attribute::Pan, -1.0).unwrap();
        mixer.play(handle).unwrap();

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out);
        assert_relative_eq!(out[0], SoftMixer::OUTPUT_GAIN);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_rebind_drops_voices() {
        let mixer = SoftMixer::new(mono_config(4)).unwrap();
        granted(mixer.allocate_channel(&dc_sample(4, 0.0)).unwrap());
        mixer.rebind(DeviceId::new("usb-headset"));
        assert_eq!(mixer.live_voices(), 0);
        assert_eq!(mixer.device(), DeviceId::new("usb-headset"));
    }
}
