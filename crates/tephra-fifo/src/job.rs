//! # Job Queue
//!
//! Ordered list of one channel's in-flight submissions.
//!
//! The queue is strictly FIFO: the engine serializes execution per channel,
//! so completion order matches submission order and jobs are only ever
//! removed from the head, after their fence has been verified expired.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use tephra_core::{BufferHandle, CompletionFence, JobOrdinal};

use crate::cmdbuf::CmdSlice;

// =============================================================================
// JOB
// =============================================================================

/// One submitted unit of work, tracked until its post-completion fence
/// expires.
pub struct Job {
    /// Position in the channel's submission history.
    pub ordinal: JobOrdinal,
    /// Post-completion fence; opaque, monotonically resolving.
    pub fence: Arc<dyn CompletionFence>,
    /// Optional wait-command slice executed before the job's methods.
    pub wait_cmd: Option<CmdSlice>,
    /// Increment-command slice that signals the fence.
    pub incr_cmd: CmdSlice,
    /// Submission-ring entries claimed by this job.
    pub ring_entries: u32,
    /// Buffers whose usage-refcount is dropped when the job completes.
    /// Always empty on deterministic channels.
    pub tracked_buffers: Vec<BufferHandle>,
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// FIFO of in-flight jobs. Owned exclusively by one channel; callers hold
/// the channel's queue lock around every operation.
pub struct JobQueue {
    jobs: VecDeque<Job>,
    next_ordinal: u64,
}

impl JobQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
            next_ordinal: 0,
        }
    }

    /// Ordinal the next pushed job will receive.
    pub fn next_ordinal(&self) -> JobOrdinal {
        JobOrdinal(self.next_ordinal)
    }

    /// Append a job at the tail.
    pub fn push(&mut self, job: Job) {
        debug_assert_eq!(job.ordinal.0, self.next_ordinal);
        self.next_ordinal += 1;
        self.jobs.push_back(job);
    }

    /// Current head job, without removing it.
    pub fn peek_head(&self) -> Option<&Job> {
        self.jobs.front()
    }

    /// Remove and return the head job. The caller must already have
    /// verified that its fence expired.
    pub fn pop_head(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// True when no jobs are in flight.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of in-flight jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Reset the ordinal counter for the slot's next occupant. Only valid
    /// once the queue is empty.
    pub fn reset(&mut self) {
        debug_assert!(self.jobs.is_empty());
        self.next_ordinal = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ManualFence;

    fn job(q: &JobQueue, fence: Arc<ManualFence>) -> Job {
        Job {
            ordinal: q.next_ordinal(),
            fence,
            wait_cmd: None,
            incr_cmd: CmdSlice {
                offset: 0,
                len: 4,
                reserved: 4,
            },
            ring_entries: 1,
            tracked_buffers: Vec::new(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut q = JobQueue::new();
        for _ in 0..3 {
            let j = job(&q, ManualFence::new());
            q.push(j);
        }
        assert_eq!(q.len(), 3);
        for want in 0..3 {
            let j = q.pop_head().unwrap();
            assert_eq!(j.ordinal, JobOrdinal(want));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut q = JobQueue::new();
        let j = job(&q, ManualFence::new());
        q.push(j);
        assert_eq!(q.peek_head().unwrap().ordinal, JobOrdinal(0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_ordinals_are_monotone() {
        let mut q = JobQueue::new();
        let j = job(&q, ManualFence::new());
        q.push(j);
        q.pop_head();
        let j = job(&q, ManualFence::new());
        assert_eq!(j.ordinal, JobOrdinal(1));
        q.push(j);
    }
}
