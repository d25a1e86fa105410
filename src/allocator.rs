//! Channel allocation over the shared backend.

use crate::backend::{Allocation, BackendResult, ChannelHandle, Handle, MixerBackend};
use crate::sample::Sample;
use log::{trace, warn};
use std::sync::Arc;

/// Binds samples to backend channels.
///
/// Cheap to clone; every clone talks to the same process-wide backend.
#[derive(Clone)]
pub struct ChannelAllocator {
    backend: Arc<dyn MixerBackend>,
}

impl ChannelAllocator {
    /// Wrap a shared backend
    pub fn new(backend: Arc<dyn MixerBackend>) -> Self {
        Self { backend }
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn MixerBackend> {
        &self.backend
    }

    /// Request a channel bound to `sample`.
    ///
    /// Exhaustion comes back as [`Allocation::NoChannelAvailable`]; an `Err`
    /// is a genuine backend failure.
    pub fn allocate(&self, sample: &Sample) -> BackendResult<Allocation> {
        let allocation = self.backend.allocate_channel(sample)?;
        match allocation {
            Allocation::Granted(handle) => trace!("granted channel #{}", handle.raw()),
            Allocation::NoChannelAvailable => warn!("channel pool exhausted"),
        }
        Ok(allocation)
    }

    /// Stop and return a channel. Releasing twice is harmless.
    pub fn release(&self, handle: ChannelHandle) -> BackendResult<()> {
        let handle = Handle::Channel(handle);
        // Stop fails on handles the backend no longer knows; release is what matters
        let _ = self.backend.stop(handle);
        self.backend.release(handle)
    }
}
