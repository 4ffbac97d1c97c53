//! # Channel Watchdog
//!
//! Detects channels whose head job has stopped making progress.
//!
//! The watchdog is armed when a job is submitted to an empty queue and
//! disarmed when the queue drains. While armed it accumulates elapsed time
//! against a snapshot of the channel's progress marker; any observed
//! progress resets the accumulator. A watchdog expires at most once per
//! arming and stays disarmed afterwards, so recovery runs exactly once per
//! hang.
//!
//! Cleanup passes stop the watchdog before walking the job queue and resume
//! it afterwards if jobs remain, so time spent in cleanup never counts
//! against the running job.

use spin::Mutex;

use tephra_core::ProgressMarker;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Device-wide watchdog policy, fixed at manager construction.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// Master enable. When false, [`Watchdog::launch`] is a no-op.
    pub enabled: bool,
    /// Milliseconds of no progress before a channel is declared hung.
    pub timeout_ms: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
        }
    }
}

// =============================================================================
// WATCHDOG
// =============================================================================

/// Result of one watchdog poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Not armed; nothing to check.
    Disarmed,
    /// Armed and the channel made progress since the last poll.
    Progressed,
    /// Armed, no progress yet, but still within the timeout.
    Counting,
    /// The timeout elapsed with no progress. Reported exactly once; the
    /// watchdog disarms itself.
    Expired,
}

#[derive(Debug)]
struct WdtState {
    running: bool,
    /// Latched once the timeout fires, until the next launch.
    expired: bool,
    snapshot: ProgressMarker,
    elapsed_ms: u32,
}

/// Per-channel progress watchdog, driven by the host's periodic tick.
pub struct Watchdog {
    state: Mutex<WdtState>,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Create a disarmed watchdog with the device policy.
    pub const fn new(config: WatchdogConfig) -> Self {
        Self {
            state: Mutex::new(WdtState {
                running: false,
                expired: false,
                snapshot: ProgressMarker(0),
                elapsed_ms: 0,
            }),
            config,
        }
    }

    /// Arm the watchdog against the channel's current progress marker.
    /// No-op when disabled by policy or already armed.
    pub fn launch(&self, progress: ProgressMarker) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        state.running = true;
        state.expired = false;
        state.snapshot = progress;
        state.elapsed_ms = 0;
    }

    /// Disarm. Returns whether the watchdog was running, so a cleanup pass
    /// knows to [`resume`](Self::resume) it afterwards.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let was_running = state.running;
        state.running = false;
        was_running
    }

    /// Re-arm after a cleanup pass that had stopped a running watchdog.
    /// Keeps the pre-stop snapshot and accumulated time.
    pub fn resume(&self) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock();
        if !state.expired {
            state.running = true;
        }
    }

    /// Advance the watchdog by `delta_ms` against the channel's current
    /// progress marker.
    pub fn check(&self, progress: ProgressMarker, delta_ms: u32) -> WatchdogOutcome {
        let mut state = self.state.lock();
        if !state.running {
            return WatchdogOutcome::Disarmed;
        }

        if progress != state.snapshot {
            state.snapshot = progress;
            state.elapsed_ms = 0;
            return WatchdogOutcome::Progressed;
        }

        state.elapsed_ms = state.elapsed_ms.saturating_add(delta_ms);
        if state.elapsed_ms < self.config.timeout_ms {
            return WatchdogOutcome::Counting;
        }

        // Latch the expiry and disarm so recovery is triggered exactly once.
        state.running = false;
        state.expired = true;
        WatchdogOutcome::Expired
    }

    /// Whether the watchdog is currently armed.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether the last arming ended in an expiry that has not been
    /// cleared by a new launch.
    pub fn has_expired(&self) -> bool {
        self.state.lock().expired
    }
}

static_assertions::assert_impl_all!(Watchdog: Send, Sync);
