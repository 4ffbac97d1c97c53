//! # Completion Events
//!
//! Observer fan-out for channel lifecycle notifications. Observers are
//! registered once at setup (fence frameworks, debug tooling) and receive
//! every event synchronously on the emitting context, so handlers must be
//! short and must not call back into the manager.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use tephra_core::{ChannelId, JobOrdinal, RecoveryReason};

// =============================================================================
// EVENTS
// =============================================================================

/// Something observable happened to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// A job's fence expired and its resources were released.
    JobCompleted {
        /// Channel the job ran on.
        channel: ChannelId,
        /// The job's position in that channel's submission history.
        ordinal: JobOrdinal,
    },
    /// Recovery ran against the channel; it is now unserviceable.
    ChannelRecovered {
        /// Channel that was recovered.
        channel: ChannelId,
        /// What triggered the recovery.
        reason: RecoveryReason,
    },
    /// The channel finished teardown and its slot returned to the pool.
    ChannelClosed {
        /// Identifier of the occupancy that just ended.
        channel: ChannelId,
    },
}

/// Receiver of [`ChannelEvent`]s.
pub trait CompletionObserver: Send + Sync {
    /// Handle one event. Called synchronously; keep it short.
    fn on_event(&self, event: &ChannelEvent);
}

// =============================================================================
// EVENT HUB
// =============================================================================

/// Registered observers for one device.
pub struct EventHub {
    observers: RwLock<Vec<Arc<dyn CompletionObserver>>>,
}

impl EventHub {
    /// Create a hub with no observers.
    pub const fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer. There is no unregister; observers live as
    /// long as the device.
    pub fn register(&self, observer: Arc<dyn CompletionObserver>) {
        self.observers.write().push(observer);
    }

    /// Deliver `event` to every observer, in registration order.
    pub fn emit(&self, event: &ChannelEvent) {
        for observer in self.observers.read().iter() {
            observer.on_event(event);
        }
    }
}

static_assertions::assert_impl_all!(EventHub: Send, Sync);
