//! # FIFO Manager
//!
//! Per-device facade tying the pool, groups, worker, and backends together.
//! All public entry points take a [`ChannelId`] and internally resolve it to
//! a guard reference, so callers never observe a channel mid-teardown.
//!
//! The manager is passive: completion interrupts call
//! [`completion_signal`](FifoManager::completion_signal), and the host's
//! service loop drives [`process_pending`](FifoManager::process_pending)
//! and [`tick`](FifoManager::tick).

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use tephra_core::{
    AddressSpaceBackend, ChannelId, EngineBackend, Error, GroupId, JobOrdinal, PowerBackend,
    RecoveryReason, Result, RunlistId, SyncBackend,
};

use crate::channel::{Channel, ChannelRef, ErrorNotice, OpenFlags};
use crate::cmdbuf::CmdBufAllocator;
use crate::events::{ChannelEvent, CompletionObserver, EventHub};
use crate::group::GroupTable;
use crate::job::Job;
use crate::pool::ChannelPool;
use crate::ring::SubmitRing;
use crate::watchdog::{WatchdogConfig, WatchdogOutcome};
use crate::worker::Worker;

// =============================================================================
// CONFIGURATION AND ARGUMENTS
// =============================================================================

/// Device-wide FIFO sizing and policy.
#[derive(Debug, Clone, Copy)]
pub struct FifoConfig {
    /// Channel slots in the pool.
    pub num_channels: u32,
    /// Watchdog policy for non-deterministic channels.
    pub watchdog: WatchdogConfig,
    /// Submission-ring entries when bind does not override.
    pub default_ring_entries: u32,
    /// Private command buffer size in words when bind does not override.
    pub default_cmdbuf_words: u32,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            num_channels: 128,
            watchdog: WatchdogConfig::default(),
            default_ring_entries: 512,
            default_cmdbuf_words: 4096,
        }
    }
}

/// Per-bind resource selection.
#[derive(Debug, Clone, Copy)]
pub struct BindArgs {
    /// Group the channel joins; decides its runlist.
    pub group: GroupId,
    /// Submission-ring entries, or the config default.
    pub ring_entries: Option<u32>,
    /// Command buffer words, or the config default.
    pub cmdbuf_words: Option<u32>,
}

bitflags::bitflags! {
    /// Per-submit options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubmitFlags: u32 {
        /// Skip job-lifetime buffer refcounting. Only legal on
        /// deterministic channels, where it is implied anyway.
        const SKIP_BUFFER_REFCOUNT = 1 << 0;
    }
}

/// One submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmitArgs {
    /// Ring entries the job occupies.
    pub entries: u32,
    /// Words for a pre-job wait command, if the job has one.
    pub wait_cmd_words: Option<u32>,
    /// Words for the post-job fence-increment command.
    pub incr_cmd_words: u32,
    /// Options.
    pub flags: SubmitFlags,
}

/// Record of the most recent recovery, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RecoverySnapshot {
    /// Channel that was recovered.
    pub channel: ChannelId,
    /// What triggered it.
    pub reason: RecoveryReason,
    /// In-flight jobs force-released by the recovery.
    pub jobs_aborted: usize,
}

// =============================================================================
// FIFO MANAGER
// =============================================================================

/// The per-device channel manager.
pub struct FifoManager {
    config: FifoConfig,
    pool: ChannelPool,
    groups: GroupTable,
    worker: Worker,
    events: EventHub,

    engine: Arc<dyn EngineBackend>,
    aspace: Arc<dyn AddressSpaceBackend>,
    sync: Arc<dyn SyncBackend>,
    power: Arc<dyn PowerBackend>,

    shutting_down: AtomicBool,
    last_recovery: Mutex<Option<RecoverySnapshot>>,
}

impl FifoManager {
    /// Build the manager and its channel pool.
    pub fn new(
        config: FifoConfig,
        engine: Arc<dyn EngineBackend>,
        aspace: Arc<dyn AddressSpaceBackend>,
        sync: Arc<dyn SyncBackend>,
        power: Arc<dyn PowerBackend>,
    ) -> Result<Self> {
        let pool = ChannelPool::new(config.num_channels, config.watchdog)?;
        log::info!(
            "fifo: {} channel slots, watchdog {} ({}ms)",
            config.num_channels,
            if config.watchdog.enabled { "on" } else { "off" },
            config.watchdog.timeout_ms
        );
        Ok(Self {
            config,
            pool,
            groups: GroupTable::new(),
            worker: Worker::new(),
            events: EventHub::new(),
            engine,
            aspace,
            sync,
            power,
            shutting_down: AtomicBool::new(false),
            last_recovery: Mutex::new(None),
        })
    }

    /// Register a lifecycle-event observer.
    pub fn register_observer(&self, observer: Arc<dyn CompletionObserver>) {
        self.events.register(observer);
    }

    /// Create a scheduling group on `runlist`.
    pub fn create_group(&self, runlist: RunlistId) -> GroupId {
        self.groups.create(runlist)
    }

    /// Destroy an empty group.
    pub fn destroy_group(&self, group: GroupId) -> Result<()> {
        self.groups.destroy(group)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Allocate a channel slot and make it referenceable.
    pub fn open(&self, flags: OpenFlags) -> Result<ChannelId> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::PoweredOff);
        }
        let ch = self.pool.acquire()?;
        ch.open(flags);
        log::debug!("channel {}: opened ({:?})", ch.id(), flags);
        Ok(ch.id())
    }

    /// Take a guard reference on a live channel.
    pub fn get(&self, id: ChannelId) -> Result<ChannelRef> {
        let ch = self.pool.lookup(id)?;
        ChannelRef::try_new(&ch).ok_or(Error::InvalidState)
    }

    /// Bind engine resources to an open channel: join its group, map the
    /// address space, create the sync primitive, size the ring and command
    /// buffer, and attach to the runlist.
    ///
    /// A failed bind unwinds the steps already taken and then frees the
    /// channel; no half-initialized channel survives, and the id is dead.
    pub fn bind(&self, id: ChannelId, args: BindArgs) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::PoweredOff);
        }
        let ch = self.get(id)?;
        if ch.is_bound() {
            return Err(Error::AlreadyBound);
        }

        match self.bind_inner(&ch, id, args) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("channel {}: bind failed ({}), releasing slot", id, err);
                drop(ch);
                let _ = self.close(id);
                Err(err)
            }
        }
    }

    fn bind_inner(&self, ch: &ChannelRef, id: ChannelId, args: BindArgs) -> Result<()> {
        let ring_entries = args.ring_entries.unwrap_or(self.config.default_ring_entries);
        let cmdbuf_words = args.cmdbuf_words.unwrap_or(self.config.default_cmdbuf_words);
        let ring = SubmitRing::new(ring_entries)?;
        let cmdbuf = CmdBufAllocator::new(cmdbuf_words)?;

        let runlist = self.groups.join(args.group, ch.slot())?;

        if let Err(err) = self.aspace.map(id) {
            self.groups.leave(args.group, ch.slot());
            return Err(err);
        }

        let sync = match self.sync.create_sync(id) {
            Ok(sync) => sync,
            Err(err) => {
                self.aspace.unmap(id);
                self.groups.leave(args.group, ch.slot());
                return Err(err);
            }
        };

        if ch.is_deterministic() {
            if let Err(err) = self.power.acquire() {
                self.aspace.unmap(id);
                self.groups.leave(args.group, ch.slot());
                return Err(err);
            }
        }

        if let Err(err) = self.engine.bind(id, runlist) {
            if ch.is_deterministic() {
                self.power.release();
            }
            self.aspace.unmap(id);
            self.groups.leave(args.group, ch.slot());
            return Err(err);
        }

        *ch.ring.lock() = Some(ring);
        *ch.cmdbuf.lock() = Some(cmdbuf);
        *ch.sync.lock() = Some(sync);
        ch.set_group(Some(args.group));
        ch.set_runlist(Some(runlist));
        ch.set_bound(true);

        self.engine.enable(args.group);
        log::debug!(
            "channel {}: bound to {} on runlist {} ({} ring entries, {} cmdbuf words)",
            id,
            args.group,
            runlist.0,
            ring_entries,
            cmdbuf_words
        );
        Ok(())
    }

    /// Tear a channel down and return its slot to the pool.
    ///
    /// Flushes pending cleanup, waits for outstanding guard references to
    /// drain, drains or aborts remaining jobs, unbinds from the engine,
    /// and releases the slot. Blocks the calling context while references
    /// are held elsewhere.
    pub fn close(&self, id: ChannelId) -> Result<()> {
        self.close_inner(id, false)
    }

    /// `force` skips the reference-drain waits. Only device shutdown uses
    /// it, once no other context can still be running against the channel.
    fn close_inner(&self, id: ChannelId, force: bool) -> Result<()> {
        let ch = self.pool.lookup(id)?;
        if !ch.guard.is_referenceable() {
            return Err(Error::InvalidState);
        }

        // Queued cleanup entries hold references; flush them first.
        self.process_pending();

        if !force {
            ch.guard.wait_for_count(1, ch.slot(), "references to drain");
        }
        ch.guard.begin_teardown()?;
        if !force {
            ch.guard.wait_for_count(0, ch.slot(), "final reference");
        }

        // The hardware must be off the channel before any job resource is
        // released; the engine may still be reading tracked buffers.
        if ch.is_bound() {
            self.unbind(&ch, id);
        }

        // Reap what completed normally, then force out the rest.
        ch.clean_up_jobs(self.aspace.as_ref(), &self.events);
        let aborted = ch.abort_jobs(self.aspace.as_ref(), &self.events);
        if aborted > 0 {
            log::warn!("channel {}: {} jobs aborted at close", id, aborted);
        }

        self.events.emit(&ChannelEvent::ChannelClosed { channel: id });
        self.pool.release(&ch);
        log::debug!("channel {}: closed", id);
        Ok(())
    }

    fn unbind(&self, ch: &Arc<Channel>, id: ChannelId) {
        if let Some(group) = ch.group() {
            self.engine.disable(group);
            if let Err(err) = self.engine.preempt(group) {
                log::warn!("channel {}: preempt at unbind failed: {}", id, err);
            }
            self.groups.leave(group, ch.slot());
        }
        self.engine.unbind(id);
        self.aspace.unmap(id);
        if ch.is_deterministic() {
            self.power.release();
        }
        ch.set_group(None);
        ch.set_runlist(None);
        ch.set_bound(false);
    }

    /// Force a channel dead: reset its engine context, abort its jobs, and
    /// latch an error notice. The slot is not freed; the owner still
    /// observes the notice and calls [`close`](Self::close).
    pub fn kill(&self, id: ChannelId) -> Result<()> {
        let ch = self.get(id)?;
        self.recover(ch.channel(), RecoveryReason::Killed);
        Ok(())
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Submit one job.
    ///
    /// Claims command-buffer slices, snapshots mapped-buffer references (on
    /// tracked channels), allocates the completion fence, reserves ring
    /// entries, and queues the job. Every step unwinds on failure; a failed
    /// submit leaves the channel exactly as it was.
    pub fn submit(&self, id: ChannelId, args: SubmitArgs) -> Result<JobOrdinal> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::PoweredOff);
        }
        let ch = self.get(id)?;
        if ch.is_unserviceable() {
            return Err(Error::Unserviceable);
        }
        if !ch.is_bound() {
            return Err(Error::NotBound);
        }
        if args.entries == 0 || args.incr_cmd_words == 0 {
            return Err(Error::InvalidParameter);
        }
        let deterministic = ch.is_deterministic();
        if args.flags.contains(SubmitFlags::SKIP_BUFFER_REFCOUNT) && !deterministic {
            return Err(Error::NotDeterministic);
        }

        // Deterministic channels reclaim completed-job resources inline;
        // nothing else will, since they bypass the worker.
        if deterministic {
            ch.clean_up_jobs(self.aspace.as_ref(), &self.events);
        }

        // Command slices first: wait, then incr, so they free in order.
        let (wait_cmd, incr_cmd) = {
            let mut cmdbuf = ch.cmdbuf.lock();
            let cmdbuf = cmdbuf.as_mut().ok_or(Error::NotBound)?;
            let wait_cmd = match args.wait_cmd_words {
                Some(words) => Some(cmdbuf.alloc(words)?),
                None => None,
            };
            let incr_cmd = match cmdbuf.alloc(args.incr_cmd_words) {
                Ok(slice) => slice,
                Err(err) => {
                    if let Some(wait) = wait_cmd {
                        cmdbuf.rollback(wait);
                    }
                    return Err(err);
                }
            };
            (wait_cmd, incr_cmd)
        };

        let rollback_cmds = |ch: &Channel| {
            let mut cmdbuf = ch.cmdbuf.lock();
            if let Some(cmdbuf) = cmdbuf.as_mut() {
                cmdbuf.rollback(incr_cmd);
                if let Some(wait) = wait_cmd {
                    cmdbuf.rollback(wait);
                }
            }
        };

        let tracked_buffers = if deterministic {
            Vec::new()
        } else {
            match self.aspace.get_buffers(id) {
                Ok(buffers) => buffers,
                Err(err) => {
                    rollback_cmds(&ch);
                    return Err(err);
                }
            }
        };

        let fence = {
            let sync = ch.sync.lock();
            let sync = sync.as_ref().ok_or(Error::NotBound)?;
            match sync.next_fence() {
                Ok(fence) => fence,
                Err(err) => {
                    if !tracked_buffers.is_empty() {
                        self.aspace.put_buffers(id, &tracked_buffers);
                    }
                    rollback_cmds(&ch);
                    return Err(err);
                }
            }
        };

        {
            let mut ring = ch.ring.lock();
            let ring = ring.as_mut().ok_or(Error::NotBound)?;
            if let Err(err) = ring.reserve(args.entries) {
                if !tracked_buffers.is_empty() {
                    self.aspace.put_buffers(id, &tracked_buffers);
                }
                rollback_cmds(&ch);
                return Err(err);
            }
        }

        let ordinal = {
            let mut joblist = ch.joblist.lock();
            let ordinal = joblist.next_ordinal();
            joblist.push(Job {
                ordinal,
                fence,
                wait_cmd,
                incr_cmd,
                ring_entries: args.entries,
                tracked_buffers,
            });
            ordinal
        };

        if !deterministic {
            // Snapshot the hardware marker, not the software consumer
            // index; the latter lags until the next cleanup pass.
            ch.wdt.launch(self.engine.read_progress(id));
        }

        log::trace!("channel {}: submitted job {:?}", id, ordinal);
        Ok(ordinal)
    }

    // =========================================================================
    // COMPLETION AND SERVICE LOOP
    // =========================================================================

    /// Completion interrupt entry point: queue the channel for a deferred
    /// cleanup pass. Deterministic channels are cleaned inline instead.
    /// Signals landing on a channel mid-teardown are dropped; the final
    /// drain in [`close`](Self::close) reaps those jobs.
    pub fn completion_signal(&self, id: ChannelId) -> Result<()> {
        let ch = self.pool.lookup(id)?;
        let Some(r) = ChannelRef::try_new(&ch) else {
            return Ok(());
        };
        if r.is_deterministic() {
            r.clean_up_jobs(self.aspace.as_ref(), &self.events);
        } else {
            self.worker.enqueue(r);
        }
        Ok(())
    }

    /// Drain the cleanup queue. Returns how many jobs were finalized.
    pub fn process_pending(&self) -> usize {
        let mut completed = 0;
        while let Some(ch) = self.worker.take_next() {
            completed += ch.clean_up_jobs(self.aspace.as_ref(), &self.events);
        }
        completed
    }

    /// Advance every armed watchdog by `delta_ms` and recover channels
    /// whose watchdog expired.
    pub fn tick(&self, delta_ms: u32) {
        for slot in self.pool.iter() {
            // Hold a reference across the poll so the channel cannot be
            // torn down and recycled underneath the recovery. A refusal
            // means teardown owns the channel now; skip it.
            let Some(ch) = ChannelRef::try_new(slot) else {
                continue;
            };
            if !ch.is_bound() || ch.is_deterministic() || ch.is_unserviceable() {
                continue;
            }
            if !ch.wdt.is_running() {
                continue;
            }
            let progress = self.engine.read_progress(ch.id());
            if ch.wdt.check(progress, delta_ms) == WatchdogOutcome::Expired {
                log::warn!(
                    "channel {}: no progress in {}ms, recovering",
                    ch.id(),
                    self.config.watchdog.timeout_ms
                );
                self.recover(ch.channel(), RecoveryReason::WatchdogExpired);
            }
        }
    }

    /// Recovery: declare the channel dead, reset its engine context, and
    /// force-release its jobs. Idempotent per occupancy.
    fn recover(&self, ch: &Arc<Channel>, reason: RecoveryReason) {
        if ch.is_unserviceable() {
            return;
        }
        let id = ch.id();
        log::error!("channel {}: recovery ({})", id, reason);

        ch.set_unserviceable();
        ch.set_error_notice(match reason {
            RecoveryReason::WatchdogExpired => ErrorNotice::Timeout,
            RecoveryReason::Killed | RecoveryReason::DeviceShutdown => ErrorNotice::ForcedReset,
        });

        let group = ch.group();
        if let Some(group) = group {
            self.engine.disable(group);
            if let Err(err) = self.engine.preempt(group) {
                log::warn!("channel {}: preempt during recovery failed: {}", id, err);
            }
        }
        if ch.is_bound() {
            if let Err(err) = self.engine.force_reset(id, reason) {
                log::error!("channel {}: force reset failed: {}", id, err);
            }
        }

        let jobs_aborted = ch.abort_jobs(self.aspace.as_ref(), &self.events);

        if let Some(group) = group {
            // Let the group's surviving channels run again.
            self.engine.enable(group);
        }

        self.events
            .emit(&ChannelEvent::ChannelRecovered { channel: id, reason });
        *self.last_recovery.lock() = Some(RecoverySnapshot {
            channel: id,
            reason,
            jobs_aborted,
        });
    }

    /// Shut the device down: refuse new opens and submits, flush pending
    /// cleanup, and force-close every live channel.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!(
            "fifo: shutting down with {} channels in use",
            self.pool.used_count()
        );
        self.process_pending();

        let live: Vec<ChannelId> = self
            .pool
            .iter()
            .filter(|ch| ch.guard.is_referenceable())
            .map(|ch| ch.id())
            .collect();
        for id in live {
            if let Ok(ch) = self.pool.lookup(id) {
                if ch.is_bound() {
                    self.recover(&ch, RecoveryReason::DeviceShutdown);
                }
            }
            if let Err(err) = self.close_inner(id, true) {
                log::warn!("channel {}: close at shutdown failed: {}", id, err);
            }
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Slots available for open.
    pub fn free_channels(&self) -> u32 {
        self.pool.free_count()
    }

    /// Slots currently open.
    pub fn used_channels(&self) -> u32 {
        self.pool.used_count()
    }

    /// Total pool capacity.
    pub fn capacity(&self) -> u32 {
        self.pool.capacity()
    }

    /// Channels queued for cleanup.
    pub fn pending_cleanups(&self) -> usize {
        self.worker.len()
    }

    /// The most recent recovery, if any.
    pub fn last_recovery(&self) -> Option<RecoverySnapshot> {
        *self.last_recovery.lock()
    }
}

static_assertions::assert_impl_all!(FifoManager: Send, Sync);
