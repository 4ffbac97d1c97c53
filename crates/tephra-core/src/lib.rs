//! # Tephra Core
//!
//! Foundational types, backend traits, and error handling for the Tephra
//! GPU channel manager.
//!
//! The channel manager itself (`tephra-fifo`) is a pure in-process
//! concurrency and lifecycle engine. Everything that touches hardware is
//! reached through the backend traits defined here:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      tephra-fifo                         │
//! │   pool · jobs · watchdog · worker · channel lifecycle    │
//! └──────────────┬───────────────────────────┬───────────────┘
//!                │ traits                    │ types/errors
//! ┌──────────────▼───────────────────────────▼───────────────┐
//! │                      tephra-core                         │
//! │  EngineBackend · AddressSpaceBackend · SyncBackend ·     │
//! │  PowerBackend · ChannelId · Error                        │
//! └──────────────────────────────────────────────────────────┘
//! ```

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

pub mod error;
pub mod traits;
pub mod types;

// Used by the `invariant_violation!` macro expansion in dependent crates.
#[doc(hidden)]
pub use log;

// Re-exports for convenience
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
