use crate::evasion::ErrorClass;
use crate::model::Platform;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Opaque identifier of one submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque identifier of one (product, platform) subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubtaskId(pub u64);

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subtask-{}", self.0)
    }
}

/// State of one subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubtaskState {
    /// Waiting in a platform queue, no attempt started yet
    Pending,

    /// An attempt is currently executing
    InFlight,

    /// A failed attempt is waiting out its backoff before the next one
    Retrying,

    /// Terminal: at least one attempt completed (possibly with zero records)
    Succeeded,

    /// Terminal: attempts exhausted, unrecoverable error, or cancelled
    Failed,
}

impl SubtaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Why a subtask ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The owning task was cancelled
    Cancelled,

    /// Retry budget spent on retryable errors
    Exhausted,

    /// Adapter/schema drift; not retried indefinitely
    Parse,

    /// The platform kept blocking past the blocked-attempt budget
    PersistentBlock,

    /// The result store refused the records past the append-retry bound
    Store,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
            Self::Parse => "parse_error",
            Self::PersistentBlock => "persistent_block",
            Self::Store => "store_error",
        }
    }
}

/// Aggregate task state, derived from subtask states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// At least one subtask is pending, in flight, or retrying
    Running,

    /// All subtasks terminal, at least one succeeded
    Completed,

    /// All subtasks terminal, none succeeded
    Failed,
}

/// Subtask counts for one platform within a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregate view over one task's subtasks
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub per_platform: HashMap<Platform, PlatformCounts>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Total price records emitted by succeeded subtasks
    pub records: usize,
}

struct SubtaskRecord {
    task: TaskId,
    platform: Platform,
    state: SubtaskState,
    attempts: u32,
    last_error: Option<ErrorClass>,
    failure: Option<FailureReason>,
    records: usize,
}

struct TaskRecord {
    subtasks: Vec<SubtaskId>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cancelled: bool,
}

#[derive(Default)]
struct TrackerInner {
    next_task: u64,
    next_subtask: u64,
    tasks: HashMap<TaskId, TaskRecord>,
    subtasks: HashMap<SubtaskId, SubtaskRecord>,
}

/// Records per-task and per-subtask state transitions for status queries
pub struct TaskTracker {
    inner: Mutex<TrackerInner>,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Creates a task with one pending subtask per given platform slot
    ///
    /// The caller supplies one platform entry per (product, platform) pair;
    /// the returned subtask ids are in the same order.
    pub fn create_task(&self, platforms: &[Platform]) -> (TaskId, Vec<SubtaskId>) {
        let mut inner = self.inner.lock().unwrap();

        inner.next_task += 1;
        let task_id = TaskId(inner.next_task);

        let mut subtask_ids = Vec::with_capacity(platforms.len());
        for &platform in platforms {
            inner.next_subtask += 1;
            let id = SubtaskId(inner.next_subtask);
            inner.subtasks.insert(
                id,
                SubtaskRecord {
                    task: task_id,
                    platform,
                    state: SubtaskState::Pending,
                    attempts: 0,
                    last_error: None,
                    failure: None,
                    records: 0,
                },
            );
            subtask_ids.push(id);
        }

        inner.tasks.insert(
            task_id,
            TaskRecord {
                subtasks: subtask_ids.clone(),
                created_at: Utc::now(),
                completed_at: None,
                cancelled: false,
            },
        );

        (task_id, subtask_ids)
    }

    /// Whether the subtask may start an attempt right now
    pub fn is_runnable(&self, id: SubtaskId) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.subtasks.get(&id) {
            Some(record) => {
                matches!(record.state, SubtaskState::Pending | SubtaskState::Retrying)
                    && !inner.tasks[&record.task].cancelled
            }
            None => false,
        }
    }

    /// Transitions a subtask into `InFlight` and counts the attempt
    ///
    /// Returns the new attempt number, or None when the subtask is stale
    /// (already terminal, mid-flight, or its task was cancelled).
    pub fn begin_attempt(&self, id: SubtaskId) -> Option<u32> {
        let mut inner = self.inner.lock().unwrap();
        let task = {
            let record = inner.subtasks.get(&id)?;
            if !matches!(record.state, SubtaskState::Pending | SubtaskState::Retrying) {
                return None;
            }
            record.task
        };

        if inner.tasks[&task].cancelled {
            return None;
        }

        let record = inner.subtasks.get_mut(&id)?;
        record.state = SubtaskState::InFlight;
        record.attempts += 1;
        Some(record.attempts)
    }

    /// Marks an in-flight subtask as waiting for its next attempt
    ///
    /// Returns true when the subtask should be re-queued. When the owning
    /// task was cancelled mid-flight the subtask fails as cancelled
    /// instead and false comes back.
    pub fn record_retrying(&self, id: SubtaskId, class: ErrorClass) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.subtasks.get(&id) else {
            return false;
        };
        debug_assert_eq!(record.state, SubtaskState::InFlight);
        let task = record.task;
        let cancelled = inner.tasks[&task].cancelled;

        let Some(record) = inner.subtasks.get_mut(&id) else {
            return false;
        };
        record.last_error = Some(class);
        if cancelled {
            record.state = SubtaskState::Failed;
            record.failure = Some(FailureReason::Cancelled);
            Self::settle_if_done(&mut inner, task);
            false
        } else {
            record.state = SubtaskState::Retrying;
            true
        }
    }

    /// Terminal success with the number of records emitted
    pub fn record_success(&self, id: SubtaskId, records: usize) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.subtasks.get_mut(&id) else {
            return;
        };
        debug_assert_eq!(record.state, SubtaskState::InFlight);
        record.state = SubtaskState::Succeeded;
        record.records = records;
        let task = record.task;
        Self::settle_if_done(&mut inner, task);
    }

    /// Terminal failure with an optional last error class and a reason
    pub fn record_failure(
        &self,
        id: SubtaskId,
        class: Option<ErrorClass>,
        reason: FailureReason,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.subtasks.get_mut(&id) else {
            return;
        };
        record.state = SubtaskState::Failed;
        if class.is_some() {
            record.last_error = class;
        }
        record.failure = Some(reason);
        let task = record.task;
        Self::settle_if_done(&mut inner, task);
    }

    /// Cancels a task: pending and retrying subtasks fail as cancelled,
    /// in-flight ones run to completion
    ///
    /// Returns false when the task id is unknown.
    pub fn cancel(&self, task: TaskId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(task_record) = inner.tasks.get_mut(&task) else {
            return false;
        };
        task_record.cancelled = true;
        let subtask_ids = task_record.subtasks.clone();

        for id in subtask_ids {
            if let Some(record) = inner.subtasks.get_mut(&id) {
                if matches!(record.state, SubtaskState::Pending | SubtaskState::Retrying) {
                    record.state = SubtaskState::Failed;
                    record.failure = Some(FailureReason::Cancelled);
                }
            }
        }

        Self::settle_if_done(&mut inner, task);
        tracing::info!("Cancelled {}", task);
        true
    }

    /// Aggregate status for a task, derived from its subtasks
    pub fn status(&self, task: TaskId) -> Option<TaskStatus> {
        let inner = self.inner.lock().unwrap();
        let task_record = inner.tasks.get(&task)?;

        let mut per_platform: HashMap<Platform, PlatformCounts> = HashMap::new();
        let mut any_active = false;
        let mut any_succeeded = false;
        let mut records = 0;

        for id in &task_record.subtasks {
            let record = &inner.subtasks[id];
            let counts = per_platform.entry(record.platform).or_default();
            match record.state {
                SubtaskState::Pending | SubtaskState::Retrying => {
                    counts.queued += 1;
                    any_active = true;
                }
                SubtaskState::InFlight => {
                    counts.in_flight += 1;
                    any_active = true;
                }
                SubtaskState::Succeeded => {
                    counts.succeeded += 1;
                    any_succeeded = true;
                    records += record.records;
                }
                SubtaskState::Failed => {
                    counts.failed += 1;
                }
            }
        }

        let state = if any_active {
            TaskState::Running
        } else if any_succeeded {
            TaskState::Completed
        } else {
            TaskState::Failed
        };

        Some(TaskStatus {
            state,
            per_platform,
            created_at: task_record.created_at,
            completed_at: task_record.completed_at,
            records,
        })
    }

    /// Current state of one subtask, with attempt count and last error
    pub fn subtask_state(&self, id: SubtaskId) -> Option<(SubtaskState, u32, Option<ErrorClass>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .subtasks
            .get(&id)
            .map(|record| (record.state, record.attempts, record.last_error))
    }

    fn settle_if_done(inner: &mut TrackerInner, task: TaskId) {
        let done = match inner.tasks.get(&task) {
            Some(record) => {
                record.completed_at.is_none()
                    && record
                        .subtasks
                        .iter()
                        .all(|id| inner.subtasks[id].state.is_terminal())
            }
            None => false,
        };
        if done {
            if let Some(record) = inner.tasks.get_mut(&task) {
                record.completed_at = Some(Utc::now());
            }
        }
    }
}
