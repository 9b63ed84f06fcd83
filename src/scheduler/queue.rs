//! Per-platform work queues with delayed re-entry
//!
//! The queue keeps one FIFO of ready jobs per platform plus a single
//! min-heap of delayed jobs (backoffs and admission deferrals) keyed by
//! their ready-at instant. A waiting subtask is a queue entry, never a
//! parked worker: workers promote due jobs and pick the next ready one
//! under the per-platform concurrency cap, round-robin across platforms
//! so one busy platform cannot starve the others.

use crate::model::{Platform, ProductQuery};
use crate::task::{SubtaskId, TaskId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// One unit of work: a single (product, platform) fetch
#[derive(Debug, Clone)]
pub struct Job {
    pub task: TaskId,
    pub subtask: SubtaskId,
    pub platform: Platform,
    pub query: Arc<ProductQuery>,
}

/// A job waiting out a backoff or an admission deferral
#[derive(Debug, Clone)]
struct DelayedJob {
    ready_at: Instant,
    seq: u64,
    job: Job,
}

// Reverse comparison so the earliest ready-at pops first from the
// BinaryHeap; insertion order breaks ties
impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

/// Ready and delayed jobs plus in-flight counts, shared by all workers
/// behind one mutex
pub struct QueueState {
    ready: HashMap<Platform, VecDeque<Job>>,
    delayed: BinaryHeap<DelayedJob>,
    in_flight: HashMap<Platform, usize>,
    seq: u64,
    rr_cursor: usize,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            ready: HashMap::new(),
            delayed: BinaryHeap::new(),
            in_flight: HashMap::new(),
            seq: 0,
            rr_cursor: 0,
        }
    }

    /// Appends a job to the back of its platform's ready queue
    pub fn push_ready(&mut self, job: Job) {
        self.ready.entry(job.platform).or_default().push_back(job);
    }

    /// Parks a job until `ready_at`
    pub fn push_delayed(&mut self, job: Job, ready_at: Instant) {
        self.seq += 1;
        self.delayed.push(DelayedJob {
            ready_at,
            seq: self.seq,
            job,
        });
    }

    /// Moves every delayed job whose ready-at has passed into its ready
    /// queue, returning how many were promoted
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.delayed.peek() {
            if entry.ready_at > now {
                break;
            }
            if let Some(entry) = self.delayed.pop() {
                self.push_ready(entry.job);
                promoted += 1;
            }
        }
        promoted
    }

    /// Picks the next ready job, round-robin across platforms
    ///
    /// Platforms at their in-flight cap are skipped. The picked job counts
    /// as in flight until [`QueueState::finish`] is called for its
    /// platform.
    pub fn next_ready(&mut self, per_platform_cap: usize) -> Option<Job> {
        let platforms = Platform::ALL;
        for offset in 0..platforms.len() {
            let index = (self.rr_cursor + offset) % platforms.len();
            let platform = platforms[index];

            if self.in_flight.get(&platform).copied().unwrap_or(0) >= per_platform_cap {
                continue;
            }

            let job = match self.ready.get_mut(&platform) {
                Some(queue) => queue.pop_front(),
                None => None,
            };

            if let Some(job) = job {
                *self.in_flight.entry(platform).or_insert(0) += 1;
                self.rr_cursor = (index + 1) % platforms.len();
                return Some(job);
            }
        }
        None
    }

    /// Releases one in-flight slot for a platform
    pub fn finish(&mut self, platform: Platform) {
        if let Some(count) = self.in_flight.get_mut(&platform) {
            *count = count.saturating_sub(1);
        }
    }

    /// Ready-at of the soonest delayed job, if any
    pub fn earliest_ready_at(&self) -> Option<Instant> {
        self.delayed.peek().map(|entry| entry.ready_at)
    }

    /// True when no jobs are queued, delayed, or in flight
    pub fn is_idle(&self) -> bool {
        self.ready.values().all(VecDeque::is_empty)
            && self.delayed.is_empty()
            && self.in_flight.values().all(|count| *count == 0)
    }
}
