//! # Private Command Buffer
//!
//! Per-channel allocator for the small wait/increment command slices that
//! frame every job. Slices are handed out from a circular buffer and freed
//! strictly in allocation order, which the FIFO job queue guarantees; that
//! makes free a simple consumer-index advance.

use tephra_core::{Error, Result};

// =============================================================================
// COMMAND SLICE
// =============================================================================

/// A slice of the channel's private command buffer.
///
/// `reserved` may exceed `len` when the allocation skipped the tail of the
/// buffer to stay contiguous; freeing returns the whole reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdSlice {
    /// Word offset of the slice within the buffer.
    pub offset: u32,
    /// Usable length in words.
    pub len: u32,
    /// Words consumed from the buffer, including any wrap padding.
    pub(crate) reserved: u32,
}

// =============================================================================
// COMMAND BUFFER ALLOCATOR
// =============================================================================

/// Circular allocator over a fixed command buffer of `size` words.
#[derive(Debug)]
pub struct CmdBufAllocator {
    size: u32,
    put: u32,
    get: u32,
}

impl CmdBufAllocator {
    /// Create an allocator over `size` words. The size must be a nonzero
    /// power of two.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            size,
            put: 0,
            get: 0,
        })
    }

    fn used(&self) -> u32 {
        self.put.wrapping_sub(self.get)
    }

    /// Words available without overwriting live slices.
    pub fn free_words(&self) -> u32 {
        self.size - self.used()
    }

    /// Allocate a contiguous slice of `len` words.
    pub fn alloc(&mut self, len: u32) -> Result<CmdSlice> {
        if len == 0 || len > self.size {
            return Err(Error::InvalidParameter);
        }

        // Skip the tail if the slice would straddle the wrap point.
        let offset = self.put % self.size;
        let pad = if offset + len > self.size {
            self.size - offset
        } else {
            0
        };

        let reserved = len + pad;
        if self.free_words() < reserved {
            return Err(Error::CmdBufExhausted);
        }

        self.put = self.put.wrapping_add(reserved);
        Ok(CmdSlice {
            offset: (offset + pad) % self.size,
            len,
            reserved,
        })
    }

    /// Undo the most recent allocation (submit-path rollback). Must be the
    /// slice returned by the latest [`alloc`](Self::alloc).
    pub fn rollback(&mut self, slice: CmdSlice) {
        debug_assert!(slice.reserved <= self.used());
        self.put = self.put.wrapping_sub(slice.reserved);
    }

    /// Free a slice. Slices must be freed in allocation order.
    pub fn free(&mut self, slice: CmdSlice) {
        debug_assert!(slice.reserved <= self.used());
        self.get = self.get.wrapping_add(slice.reserved);
    }

    /// True when no slices are outstanding.
    pub fn is_idle(&self) -> bool {
        self.put == self.get
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_must_be_power_of_two() {
        assert!(CmdBufAllocator::new(0).is_err());
        assert!(CmdBufAllocator::new(100).is_err());
        assert!(CmdBufAllocator::new(128).is_ok());
    }

    #[test]
    fn test_alloc_free_fifo() {
        let mut q = CmdBufAllocator::new(64).unwrap();
        let a = q.alloc(8).unwrap();
        let b = q.alloc(16).unwrap();
        assert_eq!(q.free_words(), 40);
        q.free(a);
        q.free(b);
        assert!(q.is_idle());
    }

    #[test]
    fn test_exhaustion() {
        let mut q = CmdBufAllocator::new(32).unwrap();
        let _a = q.alloc(24).unwrap();
        assert_eq!(q.alloc(16), Err(Error::CmdBufExhausted));
    }

    #[test]
    fn test_wrap_skips_tail_for_contiguity() {
        let mut q = CmdBufAllocator::new(32).unwrap();
        let a = q.alloc(24).unwrap();
        q.free(a);
        // put is at 24; a 16-word slice cannot straddle the wrap point.
        let b = q.alloc(16).unwrap();
        assert_eq!(b.offset, 0);
        assert_eq!(b.len, 16);
        // 8 words of tail padding were reserved along with the slice.
        assert_eq!(q.free_words(), 32 - 24);
        q.free(b);
        assert!(q.is_idle());
    }

    #[test]
    fn test_rollback_restores_space() {
        let mut q = CmdBufAllocator::new(32).unwrap();
        let a = q.alloc(8).unwrap();
        let free_before = q.free_words();
        let b = q.alloc(8).unwrap();
        q.rollback(b);
        assert_eq!(q.free_words(), free_before);
        q.free(a);
        assert!(q.is_idle());
    }

    #[test]
    fn test_long_churn_stays_consistent() {
        let mut q = CmdBufAllocator::new(16).unwrap();
        for i in 0..1000u32 {
            let s = q.alloc(1 + (i % 5)).unwrap();
            q.free(s);
        }
        assert!(q.is_idle());
    }
}
