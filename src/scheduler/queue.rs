use std::collections::VecDeque;

use crate::scheduler::job::Job;

/// An entry handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    Job { job: Job, weight: u64 },
    /// Tells exactly one worker that no more jobs will arrive
    EndOfStream,
}

/// Bounded FIFO of admitted jobs.
///
/// Capacity limits job entries only. End-of-stream markers are appended past
/// capacity so the producer never blocks while shutting the stream.
#[derive(Debug)]
pub struct JobQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    jobs: usize,
}

impl JobQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            jobs: 0,
        }
    }

    /// Append a job. Hands the job back if the queue is at capacity.
    pub fn push(&mut self, job: Job, weight: u64) -> Result<(), Job> {
        if self.is_full() {
            return Err(job);
        }
        self.entries.push_back(QueueEntry::Job { job, weight });
        self.jobs += 1;
        Ok(())
    }

    /// Append `count` end-of-stream markers.
    pub fn close(&mut self, count: usize) {
        for _ in 0..count {
            self.entries.push_back(QueueEntry::EndOfStream);
        }
    }

    /// Take the oldest entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front()?;
        if matches!(entry, QueueEntry::Job { .. }) {
            self.jobs -= 1;
        }
        Some(entry)
    }

    /// Number of queued jobs, not counting end-of-stream markers.
    pub fn len(&self) -> usize {
        self.jobs
    }

    /// Returns true if no jobs are queued
    pub fn is_empty(&self) -> bool {
        self.jobs == 0
    }

    /// Returns true if no more jobs fit
    pub fn is_full(&self) -> bool {
        self.jobs >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Summed weight of the queued jobs.
    pub fn pending_weight(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| match entry {
                QueueEntry::Job { weight, .. } => *weight,
                QueueEntry::EndOfStream => 0,
            })
            .sum()
    }
}
