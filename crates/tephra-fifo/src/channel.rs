//! # Channel State
//!
//! One submission channel: lifecycle flags, bind-time resources, the
//! in-flight job queue, and the per-channel watchdog.
//!
//! A [`Channel`] is a pool slot that lives for the whole device lifetime
//! and is recycled across open/close cycles; the generation counter in its
//! [`ChannelId`] distinguishes occupancies so stale handles cannot reach a
//! reused slot. All external access goes through a [`ChannelRef`], which
//! holds one guard reference for as long as the caller uses the channel.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use tephra_core::{AddressSpaceBackend, ChannelId, ChannelSync, GroupId, RunlistId};

use crate::cmdbuf::CmdBufAllocator;
use crate::events::{ChannelEvent, EventHub};
use crate::guard::RefGuard;
use crate::job::{Job, JobQueue};
use crate::ring::SubmitRing;
use crate::watchdog::{Watchdog, WatchdogConfig};

// =============================================================================
// FLAGS AND NOTICES
// =============================================================================

bitflags::bitflags! {
    /// Caller-selected channel properties, fixed at open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Deterministic submission path: no watchdog, no job-lifetime
        /// buffer refcounting, predictable submit latency.
        const DETERMINISTIC = 1 << 0;
        /// Channel may carry privileged commands.
        const PRIVILEGED = 1 << 1;
    }
}

/// Error condition latched on a channel for its owner to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNotice {
    /// The watchdog declared the channel hung.
    Timeout,
    /// The channel was reset underneath its owner (kill or shutdown).
    ForcedReset,
}

const NOTICE_NONE: u32 = 0;
const NOTICE_TIMEOUT: u32 = 1;
const NOTICE_FORCED_RESET: u32 = 2;

// =============================================================================
// CHANNEL
// =============================================================================

/// Per-slot channel state. Shared via `Arc`; interior mutability
/// throughout, since submit, cleanup, and teardown race by design.
pub struct Channel {
    slot: u32,
    generation: AtomicU32,

    /// Reference gate; see [`guard`](crate::guard).
    pub(crate) guard: RefGuard,

    unserviceable: AtomicBool,
    bound: AtomicBool,
    deterministic: AtomicBool,
    privileged: AtomicBool,
    /// Set while a cleanup entry for this channel sits in the worker queue.
    pub(crate) pending_cleanup: AtomicBool,

    group: Mutex<Option<GroupId>>,
    runlist: Mutex<Option<RunlistId>>,
    pub(crate) ring: Mutex<Option<SubmitRing>>,
    pub(crate) cmdbuf: Mutex<Option<CmdBufAllocator>>,
    pub(crate) sync: Mutex<Option<Box<dyn ChannelSync>>>,
    pub(crate) joblist: Mutex<JobQueue>,

    pub(crate) wdt: Watchdog,

    error_notice: AtomicU32,
}

impl Channel {
    /// Create the slot's channel object, unopened.
    pub fn new(slot: u32, wdt_config: WatchdogConfig) -> Self {
        Self {
            slot,
            generation: AtomicU32::new(0),
            guard: RefGuard::new(),
            unserviceable: AtomicBool::new(false),
            bound: AtomicBool::new(false),
            deterministic: AtomicBool::new(false),
            privileged: AtomicBool::new(false),
            pending_cleanup: AtomicBool::new(false),
            group: Mutex::new(None),
            runlist: Mutex::new(None),
            ring: Mutex::new(None),
            cmdbuf: Mutex::new(None),
            sync: Mutex::new(None),
            joblist: Mutex::new(JobQueue::new()),
            wdt: Watchdog::new(wdt_config),
            error_notice: AtomicU32::new(NOTICE_NONE),
        }
    }

    /// Stable slot index within the pool.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Identifier for the current occupancy of this slot.
    pub fn id(&self) -> ChannelId {
        ChannelId::new(self.slot, self.generation.load(Ordering::Acquire))
    }

    /// Finish opening: record flags and make the channel referenceable.
    pub(crate) fn open(&self, flags: OpenFlags) {
        self.deterministic
            .store(flags.contains(OpenFlags::DETERMINISTIC), Ordering::Release);
        self.privileged
            .store(flags.contains(OpenFlags::PRIVILEGED), Ordering::Release);
        self.error_notice.store(NOTICE_NONE, Ordering::Release);
        self.guard.activate();
    }

    /// Whether the channel was opened deterministic.
    pub fn is_deterministic(&self) -> bool {
        self.deterministic.load(Ordering::Acquire)
    }

    /// Whether the channel was opened privileged.
    pub fn is_privileged(&self) -> bool {
        self.privileged.load(Ordering::Acquire)
    }

    /// Whether the channel has engine resources bound.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub(crate) fn set_bound(&self, bound: bool) {
        self.bound.store(bound, Ordering::Release);
    }

    /// Group this channel is bound into, if any.
    pub fn group(&self) -> Option<GroupId> {
        *self.group.lock()
    }

    pub(crate) fn set_group(&self, group: Option<GroupId>) {
        *self.group.lock() = group;
    }

    /// Runlist serving this channel, if bound.
    pub fn runlist(&self) -> Option<RunlistId> {
        *self.runlist.lock()
    }

    pub(crate) fn set_runlist(&self, runlist: Option<RunlistId>) {
        *self.runlist.lock() = runlist;
    }

    /// Whether the channel has been declared dead by recovery or shutdown.
    /// Once set, submits fail and the only useful operation is close.
    pub fn is_unserviceable(&self) -> bool {
        self.unserviceable.load(Ordering::Acquire)
    }

    pub(crate) fn set_unserviceable(&self) {
        self.unserviceable.store(true, Ordering::Release);
    }

    /// Latch an error notice for the owner. The first notice wins.
    pub(crate) fn set_error_notice(&self, notice: ErrorNotice) {
        let code = match notice {
            ErrorNotice::Timeout => NOTICE_TIMEOUT,
            ErrorNotice::ForcedReset => NOTICE_FORCED_RESET,
        };
        let _ = self.error_notice.compare_exchange(
            NOTICE_NONE,
            code,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Read and clear the latched error notice.
    pub fn take_error_notice(&self) -> Option<ErrorNotice> {
        match self.error_notice.swap(NOTICE_NONE, Ordering::AcqRel) {
            NOTICE_TIMEOUT => Some(ErrorNotice::Timeout),
            NOTICE_FORCED_RESET => Some(ErrorNotice::ForcedReset),
            _ => None,
        }
    }

    /// Number of jobs currently in flight.
    pub fn jobs_in_flight(&self) -> usize {
        self.joblist.lock().len()
    }

    /// Current progress marker (submission-ring consumer position).
    /// Zero when unbound.
    pub fn progress(&self) -> tephra_core::ProgressMarker {
        self.ring
            .lock()
            .as_ref()
            .map(|r| r.progress())
            .unwrap_or(tephra_core::ProgressMarker(0))
    }

    // =========================================================================
    // JOB CLEANUP
    // =========================================================================

    /// Drain completed jobs from the head of the queue.
    ///
    /// Stops the watchdog for the duration so time spent here never counts
    /// against the running job, pops head jobs whose fences have expired,
    /// releases their resources in submission order, and resumes the
    /// watchdog if jobs remain. Returns how many jobs were finalized.
    pub(crate) fn clean_up_jobs(
        &self,
        aspace: &dyn AddressSpaceBackend,
        events: &EventHub,
    ) -> usize {
        // Deterministic channels never arm the watchdog; their cleanup
        // must not touch it either.
        let wdt_was_running = if self.is_deterministic() {
            false
        } else {
            self.wdt.stop()
        };
        let mut completed = 0;

        loop {
            // Pop the head only if its fence expired; the queue lock is not
            // held across finalization.
            let job = {
                let mut joblist = self.joblist.lock();
                match joblist.peek_head() {
                    Some(head) if head.fence.is_expired() => joblist.pop_head(),
                    _ => None,
                }
            };
            let Some(job) = job else { break };
            self.finalize_job(job, aspace, events);
            completed += 1;
        }

        if wdt_was_running && !self.joblist.lock().is_empty() {
            self.wdt.resume();
        }
        completed
    }

    /// Release every in-flight job regardless of fence state. Used when the
    /// channel is unserviceable or being shut down and its fences will
    /// never expire on their own.
    pub(crate) fn abort_jobs(&self, aspace: &dyn AddressSpaceBackend, events: &EventHub) -> usize {
        if !self.is_deterministic() {
            self.wdt.stop();
        }
        if let Some(sync) = self.sync.lock().as_ref() {
            // Resolve outstanding waits so nothing blocks on a dead channel.
            sync.set_safe_state();
        }

        let mut aborted = 0;
        loop {
            let job = self.joblist.lock().pop_head();
            let Some(job) = job else { break };
            self.finalize_job(job, aspace, events);
            aborted += 1;
        }
        aborted
    }

    /// Release one completed (or aborted) job's resources, oldest-first.
    fn finalize_job(&self, job: Job, aspace: &dyn AddressSpaceBackend, events: &EventHub) {
        {
            let mut cmdbuf = self.cmdbuf.lock();
            if let Some(cmdbuf) = cmdbuf.as_mut() {
                // Slices free in allocation order: wait first, then incr.
                if let Some(wait) = job.wait_cmd {
                    cmdbuf.free(wait);
                }
                cmdbuf.free(job.incr_cmd);
            }
        }
        if let Some(ring) = self.ring.lock().as_mut() {
            ring.release(job.ring_entries);
        }
        if !job.tracked_buffers.is_empty() {
            aspace.put_buffers(self.id(), &job.tracked_buffers);
        }
        events.emit(&ChannelEvent::JobCompleted {
            channel: self.id(),
            ordinal: job.ordinal,
        });
    }

    /// Strip the slot back to its unopened state and advance the
    /// generation, invalidating outstanding [`ChannelId`]s. Called by the
    /// pool on release, after the job queue has drained.
    pub(crate) fn retire(&self) {
        debug_assert!(self.joblist.lock().is_empty());
        debug_assert_eq!(self.guard.count(), 0);

        *self.group.lock() = None;
        *self.runlist.lock() = None;
        *self.ring.lock() = None;
        *self.cmdbuf.lock() = None;
        *self.sync.lock() = None;
        self.joblist.lock().reset();
        self.wdt.stop();

        self.bound.store(false, Ordering::Release);
        self.deterministic.store(false, Ordering::Release);
        self.privileged.store(false, Ordering::Release);
        self.unserviceable.store(false, Ordering::Release);
        self.pending_cleanup.store(false, Ordering::Release);
        self.error_notice.store(NOTICE_NONE, Ordering::Release);

        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

static_assertions::assert_impl_all!(Channel: Send, Sync);

// =============================================================================
// CHANNEL REF
// =============================================================================

/// RAII guard reference to a live channel.
///
/// Holding one keeps the channel out of teardown's final drain; dropping it
/// puts the reference back. Obtained via [`ChannelRef::try_new`], which
/// fails once teardown has begun.
pub struct ChannelRef {
    ch: Arc<Channel>,
}

impl ChannelRef {
    /// Take a reference on `ch`. Fails iff the channel is not
    /// referenceable.
    pub fn try_new(ch: &Arc<Channel>) -> Option<Self> {
        if ch.guard.try_get() {
            Some(Self { ch: Arc::clone(ch) })
        } else {
            None
        }
    }

    /// The underlying shared channel object.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.ch
    }
}

impl Deref for ChannelRef {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.ch
    }
}

impl Drop for ChannelRef {
    fn drop(&mut self) {
        self.ch.guard.put();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Arc<Channel> {
        Arc::new(Channel::new(3, WatchdogConfig::default()))
    }

    #[test]
    fn test_ref_fails_before_open() {
        let ch = fresh();
        assert!(ChannelRef::try_new(&ch).is_none());
    }

    #[test]
    fn test_ref_drop_puts_reference() {
        let ch = fresh();
        ch.open(OpenFlags::empty());
        {
            let r = ChannelRef::try_new(&ch).unwrap();
            assert_eq!(r.guard.count(), 2);
        }
        assert_eq!(ch.guard.count(), 1);
    }

    #[test]
    fn test_open_records_flags() {
        let ch = fresh();
        ch.open(OpenFlags::DETERMINISTIC | OpenFlags::PRIVILEGED);
        assert!(ch.is_deterministic());
        assert!(ch.is_privileged());
    }

    #[test]
    fn test_retire_bumps_generation() {
        let ch = fresh();
        ch.open(OpenFlags::empty());
        let before = ch.id();
        ch.guard.begin_teardown().unwrap();
        ch.retire();
        let after = ch.id();
        assert_eq!(before.index(), after.index());
        assert_ne!(before.generation(), after.generation());
    }

    #[test]
    fn test_deterministic_cleanup_leaves_watchdog_alone() {
        use crate::cmdbuf::CmdSlice;
        use crate::sim::{ManualFence, SimAspace};

        let ch = fresh();
        ch.open(OpenFlags::DETERMINISTIC);
        // Deterministic channels never arm the watchdog themselves; arm it
        // by hand to observe whether cleanup touches it.
        ch.wdt.launch(tephra_core::ProgressMarker(0));
        assert!(ch.wdt.is_running());

        let fence = ManualFence::new();
        fence.signal();
        {
            let mut joblist = ch.joblist.lock();
            let job = Job {
                ordinal: joblist.next_ordinal(),
                fence,
                wait_cmd: None,
                incr_cmd: CmdSlice {
                    offset: 0,
                    len: 4,
                    reserved: 4,
                },
                ring_entries: 1,
                tracked_buffers: alloc::vec::Vec::new(),
            };
            joblist.push(job);
        }

        let aspace = SimAspace::default();
        let events = EventHub::new();
        assert_eq!(ch.clean_up_jobs(&aspace, &events), 1);
        assert!(ch.wdt.is_running());
        assert_eq!(ch.abort_jobs(&aspace, &events), 0);
        assert!(ch.wdt.is_running());
    }

    #[test]
    fn test_first_error_notice_wins() {
        let ch = fresh();
        ch.open(OpenFlags::empty());
        ch.set_error_notice(ErrorNotice::Timeout);
        ch.set_error_notice(ErrorNotice::ForcedReset);
        assert_eq!(ch.take_error_notice(), Some(ErrorNotice::Timeout));
        assert_eq!(ch.take_error_notice(), None);
    }
}
