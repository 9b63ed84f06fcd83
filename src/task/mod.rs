//! Task and subtask state tracking
//!
//! A task owns the lifecycle of one scrape request; each of its subtasks
//! is one (product, platform) pair. All state transitions go through the
//! [`TaskTracker`] under a single lock, so a concurrent status query never
//! observes an impossible combination. Task aggregate status is derived
//! from subtask states on every read, never stored.

mod tracker;

pub use tracker::{
    FailureReason, PlatformCounts, SubtaskId, SubtaskState, TaskId, TaskState, TaskStatus,
    TaskTracker,
};
