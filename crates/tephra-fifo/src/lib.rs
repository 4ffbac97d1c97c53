//! # Tephra FIFO
//!
//! GPU command-submission channel manager: allocates, binds, tracks, and
//! tears down channels; tracks in-flight jobs per channel; detects hung
//! channels via a watchdog; and performs deferred post-completion cleanup
//! through one background worker per device.
//!
//! ## Flow
//!
//! ```text
//! open ──► bind ──► submit ──► (hardware) ──► completion_signal
//!   │        │        │                            │
//!   ▼        ▼        ▼                            ▼
//! Pool   AddressSpace Job Queue + Watchdog     Worker enqueue
//!                                                  │
//!                              process_pending ◄───┘
//!                              (drain expired jobs, rearm/stop watchdog)
//! ```
//!
//! Closing a channel waits for its reference count to drain, unbinds it
//! from the engine, force-releases any remaining job resources, and
//! returns the slot to the pool.
//!
//! ## Key invariants
//!
//! - A channel's ref-count never goes negative; `referenceable` transitions
//!   from true to false exactly once per open/close cycle.
//! - `pool.free_count() + pool.used_count() == capacity` at all times.
//! - Jobs complete and are cleaned up strictly in submission order.
//! - At most one pending cleanup entry per channel exists in the worker,
//!   so no two cleanup passes for one channel run concurrently.
//!
//! ## Entry points
//!
//! [`FifoManager`] is the per-device facade; see [`manager`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod channel;
pub mod cmdbuf;
pub mod events;
pub mod group;
pub mod guard;
pub mod job;
pub mod manager;
pub mod pool;
pub mod ring;
pub mod watchdog;
pub mod worker;

#[cfg(test)]
mod sim;

// Re-exports for convenience
pub use channel::{Channel, ChannelRef, ErrorNotice, OpenFlags};
pub use events::{ChannelEvent, CompletionObserver, EventHub};
pub use manager::{
    BindArgs, FifoConfig, FifoManager, RecoverySnapshot, SubmitArgs, SubmitFlags,
};
pub use watchdog::{Watchdog, WatchdogConfig};
