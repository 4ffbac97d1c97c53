//! Simulated backends for the test suite.
//!
//! Every backend records the calls it receives so tests can assert on the
//! manager's exact interaction pattern. Fences are manually signaled, so
//! tests control completion timing precisely.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use spin::Mutex;

use tephra_core::{
    AddressSpaceBackend, BufferHandle, ChannelId, ChannelSync, CompletionFence, EngineBackend,
    Error, GroupId, PowerBackend, ProgressMarker, RecoveryReason, Result, RunlistId, SyncBackend,
};

/// Shared call-sequence log, so tests can assert cross-backend ordering.
pub type OpLog = Arc<Mutex<Vec<&'static str>>>;

// =============================================================================
// FENCES AND SYNC
// =============================================================================

/// Fence a test signals by hand.
pub struct ManualFence {
    expired: AtomicBool,
}

impl ManualFence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            expired: AtomicBool::new(false),
        })
    }

    pub fn signal(&self) {
        self.expired.store(true, Ordering::Release);
    }
}

impl CompletionFence for ManualFence {
    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

/// State shared between a [`SimSyncBackend`] and the sync objects it hands
/// out, so tests can reach the fences of every channel.
#[derive(Default)]
pub struct SyncLog {
    pub fences: Mutex<Vec<Arc<ManualFence>>>,
    pub safe_states: AtomicUsize,
}

impl SyncLog {
    /// Signal the `i`-th fence ever created.
    pub fn signal(&self, i: usize) {
        self.fences.lock()[i].signal();
    }

    pub fn signal_all(&self) {
        for fence in self.fences.lock().iter() {
            fence.signal();
        }
    }

    pub fn fence_count(&self) -> usize {
        self.fences.lock().len()
    }
}

struct SimSync {
    log: Arc<SyncLog>,
}

impl ChannelSync for SimSync {
    fn next_fence(&self) -> Result<Arc<dyn CompletionFence>> {
        let fence = ManualFence::new();
        self.log.fences.lock().push(Arc::clone(&fence));
        Ok(fence)
    }

    fn set_safe_state(&self) {
        self.log.safe_states.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct SimSyncBackend {
    pub log: Arc<SyncLog>,
    pub fail_create: AtomicBool,
}

impl SyncBackend for SimSyncBackend {
    fn create_sync(&self, _channel: ChannelId) -> Result<Box<dyn ChannelSync>> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(Error::SyncCreateFailed);
        }
        Ok(Box::new(SimSync {
            log: Arc::clone(&self.log),
        }))
    }
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Default)]
pub struct SimEngine {
    pub ops: OpLog,
    pub binds: Mutex<Vec<(ChannelId, RunlistId)>>,
    pub unbinds: Mutex<Vec<ChannelId>>,
    pub resets: Mutex<Vec<(ChannelId, RecoveryReason)>>,
    pub enables: AtomicUsize,
    pub disables: AtomicUsize,
    pub preempts: AtomicUsize,
    pub fail_bind: AtomicBool,
    /// Progress markers by channel slot, set by tests.
    progress: Mutex<Vec<(u32, u32)>>,
}

impl SimEngine {
    pub fn set_progress(&self, slot: u32, value: u32) {
        let mut progress = self.progress.lock();
        if let Some(entry) = progress.iter_mut().find(|(s, _)| *s == slot) {
            entry.1 = value;
        } else {
            progress.push((slot, value));
        }
    }

    pub fn reset_count(&self) -> usize {
        self.resets.lock().len()
    }
}

impl EngineBackend for SimEngine {
    fn enable(&self, _group: GroupId) {
        self.ops.lock().push("engine.enable");
        self.enables.fetch_add(1, Ordering::Relaxed);
    }

    fn disable(&self, _group: GroupId) {
        self.ops.lock().push("engine.disable");
        self.disables.fetch_add(1, Ordering::Relaxed);
    }

    fn preempt(&self, _group: GroupId) -> Result<()> {
        self.ops.lock().push("engine.preempt");
        self.preempts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn force_reset(&self, channel: ChannelId, reason: RecoveryReason) -> Result<()> {
        self.ops.lock().push("engine.force_reset");
        self.resets.lock().push((channel, reason));
        Ok(())
    }

    fn bind(&self, channel: ChannelId, runlist: RunlistId) -> Result<()> {
        if self.fail_bind.load(Ordering::Acquire) {
            return Err(Error::InvalidState);
        }
        self.ops.lock().push("engine.bind");
        self.binds.lock().push((channel, runlist));
        Ok(())
    }

    fn unbind(&self, channel: ChannelId) {
        self.ops.lock().push("engine.unbind");
        self.unbinds.lock().push(channel);
    }

    fn read_progress(&self, channel: ChannelId) -> ProgressMarker {
        let progress = self.progress.lock();
        let value = progress
            .iter()
            .find(|(s, _)| *s == channel.index())
            .map(|(_, v)| *v)
            .unwrap_or(0);
        ProgressMarker(value)
    }
}

// =============================================================================
// ADDRESS SPACE
// =============================================================================

#[derive(Default)]
pub struct SimAspace {
    pub ops: OpLog,
    pub maps: AtomicUsize,
    pub unmaps: AtomicUsize,
    pub buffer_gets: AtomicUsize,
    pub buffer_puts: AtomicUsize,
    /// Outstanding buffer usage references.
    pub live_buffer_refs: AtomicIsize,
    pub fail_map: AtomicBool,
    next_buffer_id: AtomicUsize,
}

impl AddressSpaceBackend for SimAspace {
    fn map(&self, _channel: ChannelId) -> Result<()> {
        if self.fail_map.load(Ordering::Acquire) {
            return Err(Error::MapFailed);
        }
        self.ops.lock().push("aspace.map");
        self.maps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unmap(&self, _channel: ChannelId) {
        self.ops.lock().push("aspace.unmap");
        self.unmaps.fetch_add(1, Ordering::Relaxed);
    }

    fn get_buffers(&self, _channel: ChannelId) -> Result<Vec<BufferHandle>> {
        self.ops.lock().push("aspace.get_buffers");
        self.buffer_gets.fetch_add(1, Ordering::Relaxed);
        // Two mapped buffers per snapshot is enough to exercise tracking.
        let buffers: Vec<BufferHandle> = (0..2)
            .map(|_| {
                let id = self.next_buffer_id.fetch_add(1, Ordering::Relaxed);
                BufferHandle::new(id as u64)
            })
            .collect();
        self.live_buffer_refs
            .fetch_add(buffers.len() as isize, Ordering::Relaxed);
        Ok(buffers)
    }

    fn put_buffers(&self, _channel: ChannelId, buffers: &[BufferHandle]) {
        self.ops.lock().push("aspace.put_buffers");
        self.buffer_puts.fetch_add(1, Ordering::Relaxed);
        self.live_buffer_refs
            .fetch_sub(buffers.len() as isize, Ordering::Relaxed);
    }
}

// =============================================================================
// POWER
// =============================================================================

#[derive(Default)]
pub struct SimPower {
    pub refs: AtomicIsize,
    pub fail_acquire: AtomicBool,
}

impl PowerBackend for SimPower {
    fn acquire(&self) -> Result<()> {
        if self.fail_acquire.load(Ordering::Acquire) {
            return Err(Error::PowerFailure);
        }
        self.refs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self) {
        self.refs.fetch_sub(1, Ordering::Relaxed);
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// One manager wired to simulated backends, with handles to each.
pub struct SimDevice {
    pub fifo: crate::manager::FifoManager,
    pub engine: Arc<SimEngine>,
    pub aspace: Arc<SimAspace>,
    pub sync: Arc<SimSyncBackend>,
    pub power: Arc<SimPower>,
    /// Backend calls in the order the manager issued them.
    pub ops: OpLog,
}

impl SimDevice {
    pub fn new(config: crate::manager::FifoConfig) -> Self {
        let ops: OpLog = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::new(SimEngine {
            ops: Arc::clone(&ops),
            ..Default::default()
        });
        let aspace = Arc::new(SimAspace {
            ops: Arc::clone(&ops),
            ..Default::default()
        });
        let sync = Arc::new(SimSyncBackend::default());
        let power = Arc::new(SimPower::default());
        let fifo = crate::manager::FifoManager::new(
            config,
            Arc::clone(&engine) as Arc<dyn EngineBackend>,
            Arc::clone(&aspace) as Arc<dyn AddressSpaceBackend>,
            Arc::clone(&sync) as Arc<dyn SyncBackend>,
            Arc::clone(&power) as Arc<dyn PowerBackend>,
        )
        .unwrap();
        Self {
            fifo,
            engine,
            aspace,
            sync,
            power,
            ops,
        }
    }
}
