//! # Backend Traits
//!
//! Abstract capabilities the channel manager consumes from its hardware
//! collaborators. Register encoding, interrupt routing, and HAL dispatch
//! live behind these seams; the manager only sees success/failure and
//! opaque markers.
//!
//! All traits are object-safe. The manager stores them as `Arc<dyn …>` so
//! a device can swap generations (or a test can swap in a simulator)
//! without touching the core.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::Result;
use crate::types::*;

// =============================================================================
// ENGINE BACKEND
// =============================================================================

/// Engine-side scheduling operations.
///
/// Channels are scheduled as members of a group (TSG); enable, disable, and
/// preempt act on the whole group. Bind/unbind attach a single channel to
/// its runlist.
pub trait EngineBackend: Send + Sync {
    /// Make the group eligible to run.
    fn enable(&self, group: GroupId);

    /// Remove the group from scheduling. Does not preempt running work.
    fn disable(&self, group: GroupId);

    /// Synchronously preempt the group off the engine. Bounded; an internal
    /// timeout is reported as [`Error::PreemptTimeout`](crate::Error), never
    /// retried here.
    fn preempt(&self, group: GroupId) -> Result<()>;

    /// Force-reset a hung channel's engine context.
    fn force_reset(&self, channel: ChannelId, reason: RecoveryReason) -> Result<()>;

    /// Attach the channel to its runlist.
    fn bind(&self, channel: ChannelId, runlist: RunlistId) -> Result<()>;

    /// Detach the channel from its runlist.
    fn unbind(&self, channel: ChannelId);

    /// Read the channel's current hardware progress marker (submission-ring
    /// consumer position). Non-blocking.
    fn read_progress(&self, channel: ChannelId) -> ProgressMarker;
}

// =============================================================================
// ADDRESS SPACE BACKEND
// =============================================================================

/// GPU address-space operations used during bind and teardown.
///
/// Opaque to the channel manager beyond success/failure. Buffer tracking
/// snapshots the usage-refcounts of mapped buffers at submit time so they
/// can be dropped once the job's fence expires.
pub trait AddressSpaceBackend: Send + Sync {
    /// Attach an address space to the channel.
    fn map(&self, channel: ChannelId) -> Result<()>;

    /// Detach the channel's address space.
    fn unmap(&self, channel: ChannelId);

    /// Take usage references on all buffers currently mapped for this
    /// channel and return their handles.
    fn get_buffers(&self, channel: ChannelId) -> Result<Vec<BufferHandle>>;

    /// Drop usage references taken by [`get_buffers`](Self::get_buffers).
    fn put_buffers(&self, channel: ChannelId, buffers: &[BufferHandle]);
}

// =============================================================================
// SYNC BACKEND
// =============================================================================

/// A job's post-completion fence.
///
/// Fences resolve monotonically: once expired, always expired.
pub trait CompletionFence: Send + Sync {
    /// Has the hardware signaled completion past this fence?
    fn is_expired(&self) -> bool;
}

/// Per-channel sync primitive. Owned by the channel; produces the
/// completion fence for each submitted job.
pub trait ChannelSync: Send + Sync {
    /// Allocate the post-completion fence for the next job.
    fn next_fence(&self) -> Result<Arc<dyn CompletionFence>>;

    /// Put the primitive into a safe state before destruction, so an
    /// abruptly killed owner cannot leave waiters stuck.
    fn set_safe_state(&self);
}

/// Factory for per-channel sync primitives. Destruction is by drop.
pub trait SyncBackend: Send + Sync {
    /// Create the sync primitive for a channel.
    fn create_sync(&self, channel: ChannelId) -> Result<Box<dyn ChannelSync>>;
}

// =============================================================================
// POWER BACKEND
// =============================================================================

/// Power-management references.
///
/// A deterministic channel holds one reference for its entire bound
/// lifetime so the device cannot rail-gate between its submissions.
pub trait PowerBackend: Send + Sync {
    /// Take a power reference.
    fn acquire(&self) -> Result<()>;

    /// Release a power reference.
    fn release(&self);
}
