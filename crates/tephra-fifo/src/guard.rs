//! # Reference Guard
//!
//! Per-channel reference counting gated by a `referenceable` flag.
//!
//! Whenever a channel pointer is about to be used, a reference must be
//! held on it. [`RefGuard::try_get`] hands out references only while the
//! channel is fully initialized and not yet tearing down; it never blocks
//! and never succeeds on a dying channel, which is what keeps new work from
//! attaching to a channel mid-destruction. Teardown clears the flag exactly
//! once, drops the initial self-reference, and waits for the count to drain.

use core::sync::atomic::{AtomicI32, Ordering};

use spin::Mutex;

use tephra_core::invariant_violation;

/// Relax iterations between "still waiting" diagnostics in
/// [`RefGuard::wait_for_count`].
const WAIT_GRACE_ITERS: u64 = 1 << 20;

// =============================================================================
// REF HISTORY (ref-history feature)
// =============================================================================

#[cfg(feature = "ref-history")]
mod history {
    use core::sync::atomic::{AtomicU64, Ordering};

    /// Global sequence source for ordering actions across channels.
    static SEQ: AtomicU64 = AtomicU64::new(0);

    const LEN: usize = 64;

    #[derive(Debug, Clone, Copy)]
    pub(super) enum Kind {
        Get,
        Put,
    }

    #[derive(Clone, Copy)]
    struct Action {
        kind: Kind,
        count_after: i32,
        seq: u64,
    }

    /// Bounded ring of the most recent get/put actions, for postmortem
    /// debugging of stuck teardowns. Not required for correctness.
    pub(super) struct RefHistory {
        actions: [Option<Action>; LEN],
        put: usize,
    }

    impl RefHistory {
        pub(super) const fn new() -> Self {
            Self {
                actions: [None; LEN],
                put: 0,
            }
        }

        pub(super) fn record(&mut self, kind: Kind, count_after: i32) {
            self.actions[self.put] = Some(Action {
                kind,
                count_after,
                seq: SEQ.fetch_add(1, Ordering::Relaxed),
            });
            self.put = (self.put + 1) % LEN;
        }

        /// Log all recorded actions, oldest first.
        pub(super) fn dump(&self) {
            // put is the next insertion point, so also the oldest entry.
            let mut get = self.put;
            for _ in 0..LEN {
                if let Some(act) = self.actions[get] {
                    log::info!(
                        "  {:?} -> count {} (seq {})",
                        act.kind,
                        act.count_after,
                        act.seq
                    );
                }
                get = (get + 1) % LEN;
            }
        }
    }
}

// =============================================================================
// REFERENCE GUARD
// =============================================================================

/// Atomic reference count plus `referenceable` gate for one channel.
pub struct RefGuard {
    /// True from the end of open until teardown begins. Guarded by a lock
    /// rather than an atomic so that activation and the count update are
    /// observed together.
    referenceable: Mutex<bool>,
    /// Outstanding references, including the initial self-reference.
    count: AtomicI32,
    #[cfg(feature = "ref-history")]
    history: Mutex<history::RefHistory>,
}

impl RefGuard {
    /// Create an inactive guard (slot sitting in the pool).
    pub const fn new() -> Self {
        Self {
            referenceable: Mutex::new(false),
            count: AtomicI32::new(0),
            #[cfg(feature = "ref-history")]
            history: Mutex::new(history::RefHistory::new()),
        }
    }

    /// Mark the channel alive and get-able, with the single initial
    /// lifecycle reference. Called at the end of open, under the lock,
    /// since an asynchronous context may probe the channel while it is
    /// still initializing.
    pub fn activate(&self) {
        let mut referenceable = self.referenceable.lock();
        if *referenceable {
            invariant_violation!("guard activated twice");
        }
        self.count.store(1, Ordering::Release);
        *referenceable = true;
    }

    /// Try to take a reference. Fails iff the channel is not referenceable;
    /// never blocks beyond the flag lock.
    #[must_use]
    pub fn try_get(&self) -> bool {
        let referenceable = self.referenceable.lock();
        if *referenceable {
            let after = self.count.fetch_add(1, Ordering::AcqRel) + 1;
            #[cfg(feature = "ref-history")]
            self.history.lock().record(history::Kind::Get, after);
            #[cfg(not(feature = "ref-history"))]
            let _ = after;
            true
        } else {
            false
        }
    }

    /// Drop a reference.
    pub fn put(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        #[cfg(feature = "ref-history")]
        self.history.lock().record(history::Kind::Put, prev - 1);

        if prev <= 0 {
            // More puts than gets. The channel is probably going to get stuck.
            invariant_violation!("channel ref-count went negative ({})", prev - 1);
        } else if prev == 1 && *self.referenceable.lock() {
            // Count can only drain to zero once teardown has begun.
            invariant_violation!("channel ref-count hit zero while referenceable");
        }
    }

    /// Begin teardown: atomically clear `referenceable`, then drop the
    /// initial self-reference. A second call is a caller bug and is
    /// reported as [`Error::InvalidState`](tephra_core::Error).
    pub fn begin_teardown(&self) -> tephra_core::Result<()> {
        {
            let mut referenceable = self.referenceable.lock();
            if !*referenceable {
                log::error!("extra teardown of a channel already being freed");
                return Err(tephra_core::Error::InvalidState);
            }
            *referenceable = false;
        }
        self.put();
        Ok(())
    }

    /// Whether new references can currently be taken.
    pub fn is_referenceable(&self) -> bool {
        *self.referenceable.lock()
    }

    /// Current reference count.
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Block the calling context until the count equals `target`.
    ///
    /// Cooperative: yields between polls where the platform allows, and
    /// logs a warning (plus the ref history, when enabled) every grace
    /// period while still waiting.
    pub fn wait_for_count(&self, target: i32, chid: u32, what: &str) {
        let mut iters: u64 = 0;
        loop {
            if self.count.load(Ordering::Acquire) == target {
                break;
            }
            iters += 1;
            if iters % WAIT_GRACE_ITERS == 0 {
                log::warn!(
                    "channel {}: still waiting for {}, count {} (want {})",
                    chid,
                    what,
                    self.count(),
                    target
                );
                #[cfg(feature = "ref-history")]
                {
                    log::info!("channel {}: ref actions, most recent last:", chid);
                    self.history.lock().dump();
                }
            }
            relax();
        }
    }
}

#[cfg(any(test, feature = "std"))]
fn relax() {
    std::thread::yield_now();
}

#[cfg(not(any(test, feature = "std")))]
fn relax() {
    core::hint::spin_loop();
}

static_assertions::assert_impl_all!(RefGuard: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_fails_before_activation() {
        let g = RefGuard::new();
        assert!(!g.try_get());
        assert_eq!(g.count(), 0);
    }

    #[test]
    fn test_get_put_counts() {
        let g = RefGuard::new();
        g.activate();
        assert_eq!(g.count(), 1);
        assert!(g.try_get());
        assert!(g.try_get());
        assert_eq!(g.count(), 3);
        g.put();
        g.put();
        assert_eq!(g.count(), 1);
    }

    #[test]
    fn test_teardown_blocks_new_gets() {
        let g = RefGuard::new();
        g.activate();
        assert!(g.begin_teardown().is_ok());
        assert!(!g.try_get());
        assert_eq!(g.count(), 0);
    }

    #[test]
    fn test_double_teardown_is_an_error() {
        let g = RefGuard::new();
        g.activate();
        assert!(g.begin_teardown().is_ok());
        assert_eq!(
            g.begin_teardown(),
            Err(tephra_core::Error::InvalidState)
        );
    }

    #[test]
    #[should_panic(expected = "negative")]
    fn test_put_below_zero_aborts_in_debug() {
        let g = RefGuard::new();
        g.activate();
        g.begin_teardown().unwrap();
        // Count is already zero; one more put goes negative.
        g.put();
    }

    #[test]
    #[should_panic(expected = "zero while referenceable")]
    fn test_drain_while_referenceable_aborts_in_debug() {
        let g = RefGuard::new();
        g.activate();
        // Dropping the self-reference without begin_teardown drains the
        // count while the channel is still get-able.
        g.put();
    }

    #[test]
    fn test_referenceable_transitions_once() {
        let g = RefGuard::new();
        assert!(!g.is_referenceable());
        g.activate();
        assert!(g.is_referenceable());
        g.begin_teardown().unwrap();
        assert!(!g.is_referenceable());
    }

    #[test]
    fn test_wait_for_count_unblocks_on_put() {
        use std::sync::Arc;

        let g = Arc::new(RefGuard::new());
        g.activate();
        assert!(g.try_get());

        let waiter = {
            let g = Arc::clone(&g);
            std::thread::spawn(move || {
                g.wait_for_count(1, 0, "references");
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());

        g.put();
        waiter.join().unwrap();
        assert_eq!(g.count(), 1);
    }
}
