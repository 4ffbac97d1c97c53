//! # Tephra Core Types
//!
//! Fundamental identifiers used across the channel manager.
//!
//! These types provide:
//! - Generation-counted channel handles that cannot alias a recycled slot
//! - Strong typing for group, runlist, and progress identifiers
//! - Type-safe opaque handles for externally owned resources

use core::fmt;

// =============================================================================
// CHANNEL ID
// =============================================================================

/// Identifier for a channel slot in the device's channel pool.
///
/// A `ChannelId` pairs the arena index with the slot's generation counter at
/// the time the channel was opened. The generation is bumped every time a
/// slot is returned to the pool, so a stale id held past `close()` can never
/// resolve to the slot's next occupant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u32,
    generation: u32,
}

impl ChannelId {
    /// Create a channel id from an arena index and generation counter.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena index of the channel slot.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation counter captured when the channel was opened.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({}#{})", self.index, self.generation)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

// =============================================================================
// GROUP / RUNLIST IDS
// =============================================================================

/// Identifier of a scheduling group (TSG).
///
/// A group is the unit of engine enable/disable/preemption. One or more
/// channels belong to a group; channels only ever hold the id, never own
/// the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tsg{}", self.0)
    }
}

/// Identifier of an engine-side runlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RunlistId(pub u32);

// =============================================================================
// PROGRESS MARKER
// =============================================================================

/// Opaque hardware-progress marker for one channel.
///
/// This is the submission-ring consumer position as observed by the engine
/// backend. The watchdog only ever compares markers for equality; it
/// assigns no meaning to the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct ProgressMarker(pub u32);

// =============================================================================
// JOB ORDINAL
// =============================================================================

/// Ordinal position of a job within its channel's submission history.
///
/// Monotonically increasing per channel; never reused for the lifetime of
/// one open/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct JobOrdinal(pub u64);

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque, type-safe handle to an externally owned resource.
///
/// Handles prevent mixing resource kinds at compile time; the id space is
/// owned by whichever backend issued the handle.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: core::marker::PhantomData<T>,
}

// Manual impls: a derive would bound `T`, but the marker is phantom and
// handles are plain ids regardless of `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> core::hash::Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Handle<T> {
    /// Create a new handle.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: core::marker::PhantomData,
        }
    }

    /// Get the raw id.
    #[inline]
    pub const fn id(self) -> u64 {
        self.id
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", core::any::type_name::<T>(), self.id)
    }
}

/// Marker for buffer handles.
pub struct BufferMarker;

/// Handle to a mapped buffer whose usage-refcount is tracked by the
/// address-space backend.
pub type BufferHandle = Handle<BufferMarker>;

// =============================================================================
// RECOVERY REASON
// =============================================================================

/// Why a channel or group is being force-reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The channel's watchdog expired with no submission-ring progress.
    WatchdogExpired,
    /// The channel's owner asked for it to be killed.
    Killed,
    /// The whole device is shutting down.
    DeviceShutdown,
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WatchdogExpired => write!(f, "watchdog expired"),
            Self::Killed => write!(f, "killed by request"),
            Self::DeviceShutdown => write!(f, "device shutdown"),
        }
    }
}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(ChannelId: Send, Sync, Copy);
static_assertions::assert_impl_all!(GroupId: Send, Sync, Copy);
static_assertions::assert_impl_all!(ProgressMarker: Send, Sync, Copy);
static_assertions::assert_impl_all!(BufferHandle: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_roundtrip() {
        let id = ChannelId::new(17, 3);
        assert_eq!(id.index(), 17);
        assert_eq!(id.generation(), 3);
    }

    #[test]
    fn test_stale_id_differs_after_generation_bump() {
        let stale = ChannelId::new(4, 1);
        let fresh = ChannelId::new(4, 2);
        assert_ne!(stale, fresh);
    }

    #[test]
    fn test_buffer_handles_copy_and_compare_by_id() {
        let a = BufferHandle::new(7);
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, BufferHandle::new(8));
    }
}
