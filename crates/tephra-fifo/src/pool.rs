//! # Channel Pool
//!
//! Fixed arena of channel slots plus a free list. Slots are allocated at
//! construction and never freed; acquire and release move indices between
//! the free list and the in-use set. The free list is FIFO so slots recycle
//! round-robin, maximizing the time before a generation is reused.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use tephra_core::{ChannelId, Error, Result};

use crate::channel::Channel;
use crate::watchdog::WatchdogConfig;

// =============================================================================
// CHANNEL POOL
// =============================================================================

/// Arena of `capacity` channel slots.
pub struct ChannelPool {
    channels: Vec<Arc<Channel>>,
    free: Mutex<VecDeque<u32>>,
}

impl ChannelPool {
    /// Build a pool of `capacity` slots, all free.
    pub fn new(capacity: u32, wdt_config: WatchdogConfig) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParameter);
        }
        let channels = (0..capacity)
            .map(|slot| Arc::new(Channel::new(slot, wdt_config)))
            .collect();
        Ok(Self {
            channels,
            free: Mutex::new((0..capacity).collect()),
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.channels.len() as u32
    }

    /// Slots currently on the free list.
    pub fn free_count(&self) -> u32 {
        self.free.lock().len() as u32
    }

    /// Slots currently handed out.
    pub fn used_count(&self) -> u32 {
        self.capacity() - self.free_count()
    }

    /// Take a free slot. The returned channel is not yet referenceable;
    /// the caller finishes initialization and activates it.
    pub fn acquire(&self) -> Result<Arc<Channel>> {
        let slot = self.free.lock().pop_front().ok_or(Error::PoolExhausted)?;
        Ok(Arc::clone(&self.channels[slot as usize]))
    }

    /// Return a fully drained slot to the free list. Retires the channel
    /// first, which bumps its generation and invalidates old ids.
    pub fn release(&self, ch: &Arc<Channel>) {
        ch.retire();
        self.free.lock().push_back(ch.slot());
    }

    /// Resolve a channel id, checking both slot bounds and generation.
    pub fn lookup(&self, id: ChannelId) -> Result<Arc<Channel>> {
        let ch = self
            .channels
            .get(id.index() as usize)
            .ok_or(Error::InvalidHandle)?;
        if ch.id().generation() != id.generation() {
            return Err(Error::InvalidHandle);
        }
        Ok(Arc::clone(ch))
    }

    /// All slots, in-use or not. Shutdown walks this to find live channels.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }
}

static_assertions::assert_impl_all!(ChannelPool: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OpenFlags;

    fn pool(capacity: u32) -> ChannelPool {
        ChannelPool::new(capacity, WatchdogConfig::default()).unwrap()
    }

    #[test]
    fn test_counts_always_sum_to_capacity() {
        let p = pool(4);
        let a = p.acquire().unwrap();
        let _b = p.acquire().unwrap();
        assert_eq!(p.free_count() + p.used_count(), p.capacity());
        assert_eq!(p.used_count(), 2);

        a.open(OpenFlags::empty());
        a.guard.begin_teardown().unwrap();
        p.release(&a);
        assert_eq!(p.free_count() + p.used_count(), p.capacity());
        assert_eq!(p.used_count(), 1);
    }

    #[test]
    fn test_exhaustion() {
        let p = pool(2);
        let _a = p.acquire().unwrap();
        let _b = p.acquire().unwrap();
        assert_eq!(p.acquire().err(), Some(Error::PoolExhausted));
    }

    #[test]
    fn test_lookup_rejects_stale_generation() {
        let p = pool(2);
        let ch = p.acquire().unwrap();
        ch.open(OpenFlags::empty());
        let id = ch.id();
        assert!(p.lookup(id).is_ok());

        ch.guard.begin_teardown().unwrap();
        p.release(&ch);
        assert_eq!(p.lookup(id).err(), Some(Error::InvalidHandle));
    }

    #[test]
    fn test_lookup_rejects_out_of_range_slot() {
        let p = pool(2);
        assert_eq!(
            p.lookup(ChannelId::new(99, 0)).err(),
            Some(Error::InvalidHandle)
        );
    }

    #[test]
    fn test_slots_recycle_round_robin() {
        let p = pool(3);
        let a = p.acquire().unwrap();
        assert_eq!(a.slot(), 0);
        a.open(OpenFlags::empty());
        a.guard.begin_teardown().unwrap();
        p.release(&a);
        // Slots 1 and 2 come out before slot 0 is reused.
        assert_eq!(p.acquire().unwrap().slot(), 1);
        assert_eq!(p.acquire().unwrap().slot(), 2);
        assert_eq!(p.acquire().unwrap().slot(), 0);
    }
}
