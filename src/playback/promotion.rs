//! Promotion of a plain channel to a callback-fed stream
//!
//! Plain channels cannot carry a pitch-shift filter. The first time an
//! instance needs one, its channel is swapped for a stream that replays the
//! same sample from the same byte offset through the instance's feeder, with
//! volume, pan and looping carried across. Exactly one handle is alive at
//! the end of every path through [`PlaybackInstance::promote`], including
//! failures.

use super::{ActiveHandle, InstanceState, PlaybackInstance, PlaybackState};
use crate::backend::{Activity, Attribute, Handle, MixerBackend, StreamHandle};
use crate::feeder::FeederLink;
use crate::{PlaybackError, Result};
use log::{debug, warn};

/// What the plain channel was doing when promotion started
#[derive(Debug, Clone, Copy)]
struct ChannelSnapshot {
    was_playing: bool,
    was_paused: bool,
    position: u64,
    volume: f32,
    pan: f32,
    looping: bool,
}

/// Stream created during promotion but not yet installed.
///
/// Dropping it uncommitted releases the stream, detaches the feeder and
/// resumes the channel that was paused for the swap.
struct PendingStream<'a> {
    backend: &'a dyn MixerBackend,
    link: &'a FeederLink,
    stream: Option<StreamHandle>,
    resume: Option<Handle>,
}

impl PendingStream<'_> {
    fn commit(mut self) {
        self.stream = None;
    }
}

impl Drop for PendingStream<'_> {
    fn drop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        self.link.invalidate();
        if let Err(e) = self.backend.release(stream.into()) {
            warn!("failed to release abandoned stream #{}: {e}", stream.raw());
        }
        if let Some(channel) = self.resume {
            if let Err(e) = self.backend.play(channel) {
                warn!("failed to resume {channel} after aborted promotion: {e}");
            }
        }
    }
}

impl PlaybackInstance {
    /// Swap the active plain channel for a pitch-capable stream.
    ///
    /// No-op when already promoted.
    pub(super) fn promote(&self, st: &mut InstanceState, pitch: f32) -> Result<()> {
        let channel = match st.active {
            Some(ActiveHandle::Channel(channel)) => channel,
            Some(ActiveHandle::Stream(_)) => return Ok(()),
            None => {
                return Err(PlaybackError::InvalidState {
                    operation: "promote",
                    state: PlaybackState::Stopped,
                })
            }
        };
        let backend: &dyn MixerBackend = &**self.backend();
        let old = Handle::Channel(channel);

        let activity = backend.activity(old);
        let snapshot = ChannelSnapshot {
            was_playing: matches!(activity, Activity::Playing | Activity::Stalled),
            was_paused: activity == Activity::Paused,
            position: backend.position_bytes(old)?,
            volume: backend.attribute(old, Attribute::Volume)?,
            pan: backend.attribute(old, Attribute::Pan)?,
            looping: backend.is_looping(old)?,
        };

        if snapshot.was_playing {
            backend.pause(old)?;
        }

        let feeder = self.link.bind(
            st.sample.clone(),
            snapshot.position,
            st.length,
            snapshot.looping,
        );
        let stream = match backend.create_stream(st.format, Box::new(feeder)) {
            Ok(stream) => stream,
            Err(e) => {
                self.link.invalidate();
                if snapshot.was_playing {
                    let _ = backend.play(old);
                }
                return Err(e.into());
            }
        };
        let pending = PendingStream {
            backend,
            link: &self.link,
            stream: Some(stream),
            resume: snapshot.was_playing.then_some(old),
        };

        let new = Handle::Stream(stream);
        backend.attach_pitch_shift(stream)?;
        backend.set_attribute(new, Attribute::Volume, snapshot.volume)?;
        backend.set_attribute(new, Attribute::Pan, snapshot.pan)?;
        backend.set_attribute(new, Attribute::Pitch, pitch * self.pitch_range)?;
        backend.set_looping(new, snapshot.looping)?;

        st.active = Some(ActiveHandle::Stream(stream));
        pending.commit();
        self.allocator.release(channel)?;

        if snapshot.was_playing {
            backend.play(new)?;
        } else if snapshot.was_paused {
            // Straight from stopped to paused; the stream never mixes in between
            backend.pause(new)?;
        }
        debug!(
            "promoted channel #{} to stream #{} at byte {}",
            channel.raw(),
            stream.raw(),
            snapshot.position
        );
        Ok(())
    }
}
