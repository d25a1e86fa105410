//! Stream data feeder
//!
//! Once a playback instance has been promoted to a stream, the backend pulls
//! PCM through a [`SampleFeeder`] on its mixing thread. The feeder and the
//! instance share exactly three things, all behind one lock:
//!
//! - the read cursor (byte offset into the sample)
//! - the loop flag
//! - the owner token, which identifies the stream the instance currently
//!   considers live
//!
//! Tearing a stream down clears the owner token, so a callback that races
//! with `stop` sees a token mismatch and ends the stream instead of touching
//! anything else. The sample itself is only weakly held; if its owner
//! disposed it, the feeder ends the stream as well.

use crate::backend::{FeedResult, StreamSource};
use crate::sample::Sample;
use log::trace;
use parking_lot::Mutex;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identifies one binding between an instance and a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackToken(NonZeroU64);

impl PlaybackToken {
    fn next() -> Self {
        loop {
            if let Some(id) = NonZeroU64::new(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)) {
                return PlaybackToken(id);
            }
        }
    }
}

#[derive(Debug, Default)]
struct CursorState {
    cursor: u64,
    length: u64,
    looping: bool,
    owner: Option<PlaybackToken>,
}

/// Instance-side handle on the state shared with the feeder.
#[derive(Debug, Clone, Default)]
pub struct FeederLink {
    shared: Arc<Mutex<CursorState>>,
}

impl FeederLink {
    /// Create an unbound link
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the cursor state for a new stream and build the feeder that
    /// will serve it. Any feeder built earlier stops producing data.
    pub fn bind(
        &self,
        sample: Weak<Sample>,
        cursor: u64,
        length: u64,
        looping: bool,
    ) -> SampleFeeder {
        let token = PlaybackToken::next();
        {
            let mut state = self.shared.lock();
            state.cursor = cursor.min(length);
            state.length = length;
            state.looping = looping;
            state.owner = Some(token);
        }
        trace!("feeder bound at {cursor}/{length} (loop: {looping})");
        SampleFeeder {
            sample,
            shared: Arc::clone(&self.shared),
            token,
        }
    }

    /// Detach the live feeder; its next callback ends the stream
    pub fn invalidate(&self) {
        self.shared.lock().owner = None;
    }

    /// Whether a feeder is currently bound
    pub fn is_bound(&self) -> bool {
        self.shared.lock().owner.is_some()
    }

    /// Current read cursor in bytes
    pub fn cursor(&self) -> u64 {
        self.shared.lock().cursor
    }

    /// Loop flag read by the feeder
    pub fn is_looping(&self) -> bool {
        self.shared.lock().looping
    }

    /// Change the loop flag seen by the next callback
    pub fn set_looping(&self, looping: bool) {
        self.shared.lock().looping = looping;
    }
}

/// [`StreamSource`] serving a sample's bytes from the shared cursor
pub struct SampleFeeder {
    sample: Weak<Sample>,
    shared: Arc<Mutex<CursorState>>,
    token: PlaybackToken,
}

impl SampleFeeder {
    /// Token this feeder answers to
    pub fn token(&self) -> PlaybackToken {
        self.token
    }
}

impl StreamSource for SampleFeeder {
    fn feed(&mut self, dest: &mut [u8]) -> FeedResult {
        let mut state = self.shared.lock();
        if state.owner != Some(self.token) {
            return FeedResult::ended();
        }
        let Some(sample) = self.sample.upgrade() else {
            return FeedResult::ended();
        };

        let bytes = sample.buffer().bytes;
        let length = (state.length as usize).min(bytes.len());
        if length == 0 {
            return FeedResult::ended();
        }

        let mut written = 0;
        while written < dest.len() {
            if state.cursor as usize >= length {
                if !state.looping {
                    break;
                }
                state.cursor = 0;
            }
            let start = state.cursor as usize;
            let n = (dest.len() - written).min(length - start);
            dest[written..written + n].copy_from_slice(&bytes[start..start + n]);
            state.cursor += n as u64;
            written += n;
            if !state.looping {
                break;
            }
        }

        FeedResult {
            written,
            end_of_stream: !state.looping && state.cursor as usize >= length,
        }
    }

    fn seek(&mut self, position: u64) -> bool {
        let mut state = self.shared.lock();
        if state.owner != Some(self.token) {
            return false;
        }
        state.cursor = position.min(state.length);
        trace!("feeder cursor moved to {}", state.cursor);
        true
    }
}
