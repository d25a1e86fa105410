//! Output device change notifications
//!
//! Channel and stream handles do not survive a device switch. Whoever owns the
//! output device calls [`DeviceNotifier::notify`] when the device changes;
//! every live subscriber is told synchronously, before the backend is
//! rebound.

use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Identifier of an output device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a backend-specific device name
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId("default".into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiver of device change notifications
pub trait DeviceListener: Send + Sync {
    /// Called synchronously on the notifying thread
    fn device_changed(&self, device: &DeviceId);
}

/// Fan-out of device change events to weakly held listeners
#[derive(Default)]
pub struct DeviceNotifier {
    listeners: Mutex<Vec<Weak<dyn DeviceListener>>>,
}

impl DeviceNotifier {
    /// Create a notifier with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The notifier does not keep it alive.
    pub fn subscribe(&self, listener: Arc<dyn DeviceListener>) {
        self.listeners.lock().push(Arc::downgrade(&listener));
    }

    /// Deliver a change to every live listener, pruning dropped ones.
    ///
    /// Returns the number of listeners notified.
    pub fn notify(&self, device: &DeviceId) -> usize {
        // Collect first so listeners may subscribe from inside the callback
        let live: Vec<Arc<dyn DeviceListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        debug!("device changed to {device}, notifying {} listeners", live.len());
        for listener in &live {
            listener.device_changed(device);
        }
        live.len()
    }

    /// Number of listeners still alive
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DeviceListener for Counter {
        fn device_changed(&self, _device: &DeviceId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notify_reaches_live_listeners() {
        let notifier = DeviceNotifier::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        notifier.subscribe(a.clone());
        notifier.subscribe(b.clone());

        assert_eq!(notifier.notify(&DeviceId::new("hdmi")), 2);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let notifier = DeviceNotifier::new();
        let kept = Arc::new(Counter::default());
        notifier.subscribe(kept.clone());
        notifier.subscribe(Arc::new(Counter::default()));

        assert_eq!(notifier.listener_count(), 1);
        assert_eq!(notifier.notify(&DeviceId::default()), 1);
    }
}
