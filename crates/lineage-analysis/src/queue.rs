//! Background analysis queue.
//!
//! Callers submit tasks without blocking; worker threads drain a channel of
//! task ids, run the analyzer with a timeout, store successful results in
//! the cache, and fire completion callbacks. Task state only moves forward:
//! `Pending -> Running -> Completed | Failed`, or `Pending -> Failed` when
//! cancelled.
//!
//! The queue does not de-duplicate. Callers check [`AnalysisCache::get`]
//! and [`AnalysisTaskQueue::in_flight`] before submitting; two submissions
//! for the same key both run to completion.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lineage_core::{LineageError, QueueConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::Analyzer;
use crate::cache::AnalysisCache;
use crate::types::{AnalysisMode, AnalysisRequest, AnalysisResult, CacheKey};

/// Identifier assigned by [`AnalysisTaskQueue::submit`].
pub type TaskId = u64;

/// Called once when a task reaches a terminal state.
pub type CompletionCallback = Box<dyn FnOnce(&TaskSnapshot) + Send>;

/// Receives progress messages from the analyzer while a task runs.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Error recorded on tasks cancelled before they ran.
pub const CANCELLED: &str = "cancelled";

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Being analyzed.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error, or cancelled.
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn can_advance_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work to submit.
///
/// # Examples
///
/// ```
/// use lineage_analysis::queue::AnalysisTask;
/// use lineage_analysis::types::{AnalysisMode, AnalysisRequest, CacheKey};
///
/// let task = AnalysisTask::new(
///     CacheKey::new("region-1", AnalysisMode::Brief),
///     AnalysisRequest::new("old", "new", "doc.md"),
/// )
/// .on_complete(|snapshot| println!("{} finished: {}", snapshot.id, snapshot.status))
/// .on_status(|msg| println!("progress: {msg}"));
/// ```
pub struct AnalysisTask {
    key: CacheKey,
    request: AnalysisRequest,
    on_complete: Option<CompletionCallback>,
    on_status: Option<StatusCallback>,
}

impl AnalysisTask {
    /// Build a task without callbacks.
    pub fn new(key: CacheKey, request: AnalysisRequest) -> Self {
        Self {
            key,
            request,
            on_complete: None,
            on_status: None,
        }
    }

    /// Set the completion callback.
    pub fn on_complete(mut self, callback: impl FnOnce(&TaskSnapshot) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Set the progress callback.
    pub fn on_status(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Arc::new(callback));
        self
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Task id.
    pub id: TaskId,
    /// Subject and mode.
    pub key: CacheKey,
    /// Current state.
    pub status: TaskStatus,
    /// Result, once completed.
    pub result: Option<AnalysisResult>,
    /// Error message (truncated), once failed.
    pub error: Option<String>,
    /// Cache version the result was stored under, if a cache is attached.
    pub cache_version: Option<i64>,
    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

struct TaskRecord {
    key: CacheKey,
    request: Arc<AnalysisRequest>,
    status: TaskStatus,
    result: Option<AnalysisResult>,
    error: Option<String>,
    cache_version: Option<i64>,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    on_complete: Option<CompletionCallback>,
    on_status: Option<StatusCallback>,
}

impl TaskRecord {
    fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    fn snapshot(&self, id: TaskId) -> TaskSnapshot {
        TaskSnapshot {
            id,
            key: self.key.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            cache_version: self.cache_version,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
        }
    }
}

struct Shared {
    analyzer: Arc<dyn Analyzer>,
    cache: Option<Arc<AnalysisCache>>,
    config: QueueConfig,
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    running: AtomicBool,
    receiver: Receiver<TaskId>,
}

/// Background worker pool for analysis tasks.
///
/// Construction has no side effects; call [`start`](Self::start) to spawn
/// workers and [`stop`](Self::stop) (or drop the queue) to halt them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use lineage_core::QueueConfig;
/// use lineage_analysis::analyzer::HeuristicAnalyzer;
/// use lineage_analysis::queue::{AnalysisTask, AnalysisTaskQueue, TaskStatus};
/// use lineage_analysis::types::{AnalysisMode, AnalysisRequest, CacheKey};
///
/// let queue = AnalysisTaskQueue::new(Arc::new(HeuristicAnalyzer), None, QueueConfig::default());
/// let (tx, rx) = crossbeam_channel::bounded(1);
/// let id = queue.submit(
///     AnalysisTask::new(
///         CacheKey::new("s", AnalysisMode::Pattern),
///         AnalysisRequest::new("a", "b", ""),
///     )
///     .on_complete(move |snap| { let _ = tx.send(snap.status); }),
/// );
/// assert_eq!(queue.status(id), Some(TaskStatus::Pending));
///
/// queue.start().unwrap();
/// assert_eq!(rx.recv().unwrap(), TaskStatus::Completed);
/// queue.stop();
/// ```
pub struct AnalysisTaskQueue {
    shared: Arc<Shared>,
    sender: Sender<TaskId>,
    next_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisTaskQueue {
    /// Create a stopped queue.
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        cache: Option<Arc<AnalysisCache>>,
        config: QueueConfig,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                analyzer,
                cache,
                config,
                tasks: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                receiver,
            }),
            sender,
            next_id: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the configured number of workers. Calling it again while
    /// running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Queue`] if no workers are configured or a
    /// worker thread cannot be spawned.
    pub fn start(&self) -> Result<(), LineageError> {
        if self.shared.config.workers == 0 {
            return Err(LineageError::Queue("queue.workers must be at least 1".into()));
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut workers = lock(&self.workers);
        for i in 0..self.shared.config.workers {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("analysis-worker-{i}"))
                .spawn(move || shared.work())
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    LineageError::Queue(format!("failed to spawn worker: {e}"))
                })?;
            workers.push(handle);
        }

        info!(workers = self.shared.config.workers, "analysis queue started");
        Ok(())
    }

    /// Stop draining. A worker busy with a task gets `join_timeout_ms` to
    /// finish before it is abandoned. Undrained tasks stay pending.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handles = std::mem::take(&mut *lock(&self.workers));
        let deadline = Instant::now() + Duration::from_millis(self.shared.config.join_timeout_ms);
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("analysis worker panicked");
                }
            } else {
                warn!(
                    worker = handle.thread().name().unwrap_or("unnamed"),
                    "worker still busy after join timeout, abandoning it"
                );
            }
        }

        info!(pending = self.queue_size(), "analysis queue stopped");
    }

    /// Whether workers are draining.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Enqueue a task and return its id. Never blocks.
    pub fn submit(&self, task: AnalysisTask) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let AnalysisTask {
            key,
            request,
            on_complete,
            on_status,
        } = task;

        debug!(task = id, key = %key, "task submitted");
        self.shared.tasks_mut().insert(
            id,
            TaskRecord {
                key,
                request: Arc::new(request),
                status: TaskStatus::Pending,
                result: None,
                error: None,
                cache_version: None,
                submitted_at: Utc::now(),
                finished_at: None,
                on_complete,
                on_status,
            },
        );

        if self.sender.send(id).is_err() {
            // the receiver lives in `shared`, which we hold
            self.shared
                .finish(id, Err(LineageError::Queue("queue closed".into())));
        }
        id
    }

    /// Cancel a pending task. It becomes failed with error [`CANCELLED`]
    /// and its callback fires. Returns `false` for running, finished, or
    /// unknown tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let (callback, snapshot) = {
            let mut tasks = self.shared.tasks_mut();
            let Some(record) = tasks.get_mut(&id) else {
                return false;
            };
            if record.status != TaskStatus::Pending || !record.advance(TaskStatus::Failed) {
                return false;
            }
            record.error = Some(CANCELLED.to_string());
            (record.on_complete.take(), record.snapshot(id))
        };

        debug!(task = id, "task cancelled");
        fire(callback, &snapshot);
        true
    }

    /// Current state of a task.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.shared.tasks_mut().get(&id).map(|r| r.status)
    }

    /// Full view of a task.
    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.tasks_mut().get(&id).map(|r| r.snapshot(id))
    }

    /// Ids waiting in the channel, not yet taken by a worker.
    pub fn queue_size(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Pending and running tasks, in submission order.
    pub fn active_tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.shared.tasks_mut();
        let mut active: Vec<TaskSnapshot> = tasks
            .iter()
            .filter(|(_, r)| !r.status.is_terminal())
            .map(|(id, r)| r.snapshot(*id))
            .collect();
        active.sort_by_key(|s| s.id);
        active
    }

    /// Whether a pending or running task exists for `key`.
    pub fn in_flight(&self, key: &CacheKey) -> bool {
        self.shared
            .tasks_mut()
            .values()
            .any(|r| &r.key == key && !r.status.is_terminal())
    }

    /// Status of the most recent task per mode for `subject`.
    pub fn status_for_subject(&self, subject: &str) -> BTreeMap<AnalysisMode, TaskStatus> {
        let tasks = self.shared.tasks_mut();
        let mut latest: BTreeMap<AnalysisMode, (TaskId, TaskStatus)> = BTreeMap::new();
        for (id, record) in tasks.iter().filter(|(_, r)| r.key.subject == subject) {
            let entry = latest.entry(record.key.mode).or_insert((*id, record.status));
            if *id > entry.0 {
                *entry = (*id, record.status);
            }
        }
        latest.into_iter().map(|(mode, (_, s))| (mode, s)).collect()
    }

    /// Drop finished tasks from the table. Returns how many were removed.
    pub fn forget_finished(&self) -> usize {
        let mut tasks = self.shared.tasks_mut();
        let before = tasks.len();
        tasks.retain(|_, r| !r.status.is_terminal());
        before - tasks.len()
    }
}

impl Drop for AnalysisTaskQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn tasks_mut(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        lock(&self.tasks)
    }

    fn work(&self) {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        while self.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(poll) {
                Ok(id) => self.process(id),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("analysis worker exiting");
    }

    fn process(&self, id: TaskId) {
        let (request, mode, on_status) = {
            let mut tasks = self.tasks_mut();
            let Some(record) = tasks.get_mut(&id) else {
                return;
            };
            if !record.advance(TaskStatus::Running) {
                debug!(task = id, status = %record.status, "skipping task that is no longer pending");
                return;
            }
            (
                Arc::clone(&record.request),
                record.key.mode,
                record.on_status.clone(),
            )
        };

        debug!(task = id, %mode, "task running");
        let outcome = self.run_analyzer(id, request, mode, on_status);
        self.finish(id, outcome);
    }

    /// Run the analyzer on a helper thread so a hung call can be abandoned.
    fn run_analyzer(
        &self,
        id: TaskId,
        request: Arc<AnalysisRequest>,
        mode: AnalysisMode,
        on_status: Option<StatusCallback>,
    ) -> Result<AnalysisResult, LineageError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let analyzer = Arc::clone(&self.analyzer);
        thread::Builder::new()
            .name(format!("analysis-call-{id}"))
            .spawn(move || {
                let status = |msg: &str| {
                    if let Some(callback) = &on_status {
                        callback(msg);
                    }
                };
                let result = analyzer.analyze(&request, mode, &status);
                // the worker may have timed out and gone
                let _ = tx.send(result);
            })
            .map_err(|e| LineageError::Queue(format!("failed to spawn analyzer thread: {e}")))?;

        let timeout_ms = self.config.analyze_timeout_ms;
        match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(LineageError::Timeout(timeout_ms)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LineageError::Analyzer("analyzer panicked".into()))
            }
        }
    }

    fn finish(&self, id: TaskId, outcome: Result<AnalysisResult, LineageError>) {
        let key = match self.tasks_mut().get(&id) {
            Some(record) => record.key.clone(),
            None => return,
        };

        let (result, error, cache_version) = match outcome {
            Ok(result) => {
                let version = self.cache.as_ref().and_then(|cache| {
                    cache
                        .put(&key, &result)
                        .map_err(|e| warn!(task = id, key = %key, error = %e, "failed to cache result"))
                        .ok()
                });
                (Some(result), None, version)
            }
            Err(e) => {
                let message = truncate(&e.to_string(), self.config.max_error_chars);
                warn!(task = id, key = %key, error = %message, "analysis failed");
                (None, Some(message), None)
            }
        };

        let (callback, snapshot) = {
            let mut tasks = self.tasks_mut();
            let Some(record) = tasks.get_mut(&id) else {
                return;
            };
            let next = if result.is_some() {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            if !record.advance(next) {
                return;
            }
            record.result = result;
            record.error = error;
            record.cache_version = cache_version;
            (record.on_complete.take(), record.snapshot(id))
        };

        debug!(task = id, status = %snapshot.status, "task finished");
        fire(callback, &snapshot);
    }
}

fn fire(callback: Option<CompletionCallback>, snapshot: &TaskSnapshot) {
    let Some(callback) = callback else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
        warn!(task = snapshot.id, "completion callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}
