//! # Cleanup Worker Queue
//!
//! Deferred-cleanup queue for the device: completion signals enqueue the
//! affected channel here, and the host's service loop drains it via the
//! manager. Each entry holds a [`ChannelRef`], so a queued channel cannot
//! finish teardown until its cleanup pass has run.
//!
//! Enqueueing is deduplicated per channel: a channel has at most one entry
//! queued at a time. The pending flag is cleared at dequeue, before the
//! cleanup pass runs, so a completion arriving mid-pass re-enqueues the
//! channel rather than being lost.

use alloc::collections::VecDeque;
use core::sync::atomic::Ordering;

use spin::Mutex;

use crate::channel::ChannelRef;

// =============================================================================
// WORKER
// =============================================================================

/// Per-device queue of channels awaiting a cleanup pass.
pub struct Worker {
    pending: Mutex<VecDeque<ChannelRef>>,
}

impl Worker {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue `ch` for cleanup. Returns false (and drops the reference) if
    /// the channel is already queued.
    pub fn enqueue(&self, ch: ChannelRef) -> bool {
        if ch.pending_cleanup.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pending.lock().push_back(ch);
        true
    }

    /// Dequeue the next channel, clearing its pending flag so later
    /// completions can queue it again.
    pub fn take_next(&self) -> Option<ChannelRef> {
        let ch = self.pending.lock().pop_front()?;
        ch.pending_cleanup.store(false, Ordering::Release);
        Some(ch)
    }

    /// Number of channels currently queued.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

static_assertions::assert_impl_all!(Worker: Send, Sync);
