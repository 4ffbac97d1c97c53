//! # Tephra Error Handling
//!
//! Unified error types for the channel manager.
//!
//! Errors fall into three classes with different handling policies:
//! - Resource exhaustion and caller mistakes are returned synchronously.
//! - Hangs detected in the background are pushed to the channel's error
//!   notifier and only surface on the owner's next interaction.
//! - Invariant violations indicate a logic bug: they abort in debug builds
//!   and are logged and contained in release builds (see
//!   [`invariant_violation!`](crate::invariant_violation)).

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Tephra Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Tephra unified error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Resource Exhaustion
    // =========================================================================
    /// The channel pool has no free slots.
    PoolExhausted,
    /// The submission ring has no room for the requested entries.
    RingFull,
    /// The private command buffer cannot satisfy the requested slice.
    CmdBufExhausted,
    /// A backend allocation failed.
    AllocationFailed,

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Handle does not resolve to a live channel.
    InvalidHandle,
    /// Operation not valid in the channel's current state.
    InvalidState,
    /// Channel has no address space or submission ring bound.
    NotBound,
    /// Channel is already bound.
    AlreadyBound,
    /// Invalid parameter provided.
    InvalidParameter,
    /// The requested feature is unavailable on a deterministic channel.
    NotDeterministic,

    // =========================================================================
    // Hardware / Background Failures
    // =========================================================================
    /// Channel suffered a fatal error or hang; no further submits allowed.
    Unserviceable,
    /// A bounded preempt did not complete in time.
    PreemptTimeout,
    /// Forced engine reset failed.
    ResetFailed,
    /// Address-space map/unmap failed.
    MapFailed,
    /// Per-channel sync primitive could not be created.
    SyncCreateFailed,
    /// Power reference could not be taken.
    PowerFailure,
    /// The device is shutting down.
    PoweredOff,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolExhausted => write!(f, "out of channel slots"),
            Self::RingFull => write!(f, "submission ring full"),
            Self::CmdBufExhausted => write!(f, "private command buffer exhausted"),
            Self::AllocationFailed => write!(f, "backend allocation failed"),

            Self::InvalidHandle => write!(f, "invalid channel handle"),
            Self::InvalidState => write!(f, "invalid channel state"),
            Self::NotBound => write!(f, "channel not bound"),
            Self::AlreadyBound => write!(f, "channel already bound"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotDeterministic => write!(f, "feature unavailable in deterministic mode"),

            Self::Unserviceable => write!(f, "channel unserviceable"),
            Self::PreemptTimeout => write!(f, "preempt timed out"),
            Self::ResetFailed => write!(f, "engine reset failed"),
            Self::MapFailed => write!(f, "address space mapping failed"),
            Self::SyncCreateFailed => write!(f, "sync primitive creation failed"),
            Self::PowerFailure => write!(f, "power reference unavailable"),
            Self::PoweredOff => write!(f, "device shutting down"),
        }
    }
}

// =============================================================================
// INVARIANT VIOLATIONS
// =============================================================================

/// Report a broken internal invariant.
///
/// Invariant violations are logic bugs, not runtime conditions: a negative
/// ref-count, a double teardown, a deterministic channel reaching the
/// nondeterministic cleanup path. Debug builds abort loudly so tests catch
/// the bug; release builds log at error level and continue, since halting a
/// whole device over one channel's bookkeeping is worse than limping on.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)*) => {{
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        } else {
            $crate::log::error!($($arg)*);
        }
    }};
}
