//! # Submission Ring
//!
//! Producer/consumer descriptor for one channel's submission ring.
//!
//! The manager does not encode ring entries (that is the engine backend's
//! job); it only tracks occupancy so submits can fail fast when the ring is
//! full, and so the consumer index is available as the watchdog's progress
//! marker.

use tephra_core::{Error, ProgressMarker, Result};

// =============================================================================
// SUBMISSION RING
// =============================================================================

/// Ring occupancy descriptor: `put` is the host-side producer index, `get`
/// the hardware-side consumer index. Both wrap modulo `entry_num`.
#[derive(Debug)]
pub struct SubmitRing {
    entry_num: u32,
    put: u32,
    get: u32,
}

impl SubmitRing {
    /// Create a ring with `entry_num` entries. The entry count must be a
    /// nonzero power of two.
    pub fn new(entry_num: u32) -> Result<Self> {
        if entry_num == 0 || !entry_num.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            entry_num,
            put: 0,
            get: 0,
        })
    }

    /// Total entry capacity.
    pub fn entry_num(&self) -> u32 {
        self.entry_num
    }

    /// Number of entries a submit can still claim. One entry is kept free
    /// so the hardware can distinguish full from empty.
    pub fn free_count(&self) -> u32 {
        (self.entry_num - self.put.wrapping_sub(self.get) - 1) % self.entry_num
    }

    /// Claim `entries` ring slots for a job.
    pub fn reserve(&mut self, entries: u32) -> Result<()> {
        if entries == 0 {
            return Err(Error::InvalidParameter);
        }
        if self.free_count() < entries {
            return Err(Error::RingFull);
        }
        self.put = self.put.wrapping_add(entries);
        Ok(())
    }

    /// Return `entries` slots once their job's fence has expired.
    pub fn release(&mut self, entries: u32) {
        self.get = self.get.wrapping_add(entries);
    }

    /// Consumer position, used as the channel's progress marker.
    pub fn progress(&self) -> ProgressMarker {
        ProgressMarker(self.get)
    }

    /// True when no entries are in flight.
    pub fn is_idle(&self) -> bool {
        self.put == self.get
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_num_must_be_power_of_two() {
        assert!(SubmitRing::new(0).is_err());
        assert!(SubmitRing::new(48).is_err());
        assert!(SubmitRing::new(64).is_ok());
    }

    #[test]
    fn test_free_count_keeps_one_slot() {
        let ring = SubmitRing::new(8).unwrap();
        assert_eq!(ring.free_count(), 7);
    }

    #[test]
    fn test_reserve_release_roundtrip() {
        let mut ring = SubmitRing::new(8).unwrap();
        ring.reserve(3).unwrap();
        assert_eq!(ring.free_count(), 4);
        assert!(!ring.is_idle());
        ring.release(3);
        assert_eq!(ring.free_count(), 7);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_reserve_fails_when_full() {
        let mut ring = SubmitRing::new(8).unwrap();
        ring.reserve(7).unwrap();
        assert_eq!(ring.reserve(1), Err(Error::RingFull));
    }

    #[test]
    fn test_wraparound_accounting() {
        let mut ring = SubmitRing::new(4).unwrap();
        for _ in 0..100 {
            ring.reserve(3).unwrap();
            ring.release(3);
        }
        assert_eq!(ring.free_count(), 3);
        assert!(ring.is_idle());
    }

    #[test]
    fn test_progress_tracks_consumer() {
        let mut ring = SubmitRing::new(8).unwrap();
        ring.reserve(2).unwrap();
        assert_eq!(ring.progress(), ProgressMarker(0));
        ring.release(2);
        assert_eq!(ring.progress(), ProgressMarker(2));
    }
}
