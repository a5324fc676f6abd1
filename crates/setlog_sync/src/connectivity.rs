//! Connectivity signal consumed by the driver and reconciler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply clonable online/offline signal.
///
/// The host runtime owns one handle and flips it from its network-status
/// facility; the driver and reconciler hold clones and read it between
/// suspension points. Going offline pauses dispatch rather than failing
/// operations.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    online: Arc<AtomicBool>,
}

impl ConnectivitySignal {
    /// Creates a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Returns true if the device is currently online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Updates the connectivity state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = ConnectivitySignal::new(true);
        let clone = signal.clone();

        assert!(clone.is_online());
        signal.set_online(false);
        assert!(!clone.is_online());
        clone.set_online(true);
        assert!(signal.is_online());
    }
}
