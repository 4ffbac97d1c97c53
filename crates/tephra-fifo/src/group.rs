//! # Channel Groups
//!
//! Scheduling groups: every bound channel belongs to exactly one group, and
//! all channels in a group are served by the same runlist. The table only
//! tracks membership; scheduling itself is the engine backend's business.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;
use spin::Mutex;

use tephra_core::{Error, GroupId, Result, RunlistId};

// =============================================================================
// GROUP TABLE
// =============================================================================

struct GroupEntry {
    runlist: RunlistId,
    /// Member channel slots, in join order.
    members: Vec<u32>,
}

/// Registry of the device's channel groups.
pub struct GroupTable {
    groups: Mutex<HashMap<u32, GroupEntry>>,
    next_id: AtomicU32,
}

impl GroupTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Create a group served by `runlist`.
    pub fn create(&self, runlist: RunlistId) -> GroupId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.groups.lock().insert(
            id,
            GroupEntry {
                runlist,
                members: Vec::new(),
            },
        );
        GroupId(id)
    }

    /// Destroy a group. Fails while channels are still members.
    pub fn destroy(&self, group: GroupId) -> Result<()> {
        let mut groups = self.groups.lock();
        let entry = groups.get(&group.0).ok_or(Error::InvalidHandle)?;
        if !entry.members.is_empty() {
            return Err(Error::InvalidState);
        }
        groups.remove(&group.0);
        Ok(())
    }

    /// Add channel `slot` to the group, returning the runlist it will be
    /// served by.
    pub fn join(&self, group: GroupId, slot: u32) -> Result<RunlistId> {
        let mut groups = self.groups.lock();
        let entry = groups.get_mut(&group.0).ok_or(Error::InvalidHandle)?;
        if entry.members.contains(&slot) {
            return Err(Error::AlreadyBound);
        }
        entry.members.push(slot);
        Ok(entry.runlist)
    }

    /// Remove channel `slot` from the group. A missing member is tolerated;
    /// unbind runs on error paths where the join may not have happened.
    pub fn leave(&self, group: GroupId, slot: u32) {
        if let Some(entry) = self.groups.lock().get_mut(&group.0) {
            entry.members.retain(|&m| m != slot);
        }
    }

    /// Runlist serving a group.
    pub fn runlist_of(&self, group: GroupId) -> Result<RunlistId> {
        self.groups
            .lock()
            .get(&group.0)
            .map(|e| e.runlist)
            .ok_or(Error::InvalidHandle)
    }

    /// Number of channels currently in the group.
    pub fn member_count(&self, group: GroupId) -> Result<usize> {
        self.groups
            .lock()
            .get(&group.0)
            .map(|e| e.members.len())
            .ok_or(Error::InvalidHandle)
    }
}

static_assertions::assert_impl_all!(GroupTable: Send, Sync);
