//! In-flight task tracking
//!
//! Every submitted request that reaches the transport is represented by an
//! [`InFlightTask`] held in the client's [`TaskRegistry`] until its terminal
//! outcome. Writes mutate the map in place under a lock. [`snapshot`]
//! publishes an immutable list that stays cached until the next write.
//!
//! [`snapshot`]: TaskRegistry::snapshot

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::request::RequestId;

/// Callback type for progress reporting
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upload progress of one task, shared with the transport.
///
/// Counters are updated synchronously so readers always see a consistent
/// `(sent, total)` pair. With a completion runtime, the caller's callback is
/// fed from one queue per task and sees reports in the order they were made.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<ProgressState>,
}

type Update = (u64, Option<u64>);

struct ProgressState {
    counters: Mutex<Update>,
    delivery: Mutex<Delivery>,
}

enum Delivery {
    Silent,
    Inline(ProgressCallback),
    Queued {
        sender: mpsc::UnboundedSender<Update>,
        worker: JoinHandle<()>,
    },
}

impl Progress {
    pub(crate) fn new(callback: Option<ProgressCallback>, dispatch: Option<Handle>) -> Self {
        let delivery = match (callback, dispatch) {
            (None, _) => Delivery::Silent,
            (Some(callback), None) => Delivery::Inline(callback),
            (Some(callback), Some(handle)) => {
                let (sender, mut updates) = mpsc::unbounded_channel::<Update>();
                let worker = handle.spawn(async move {
                    while let Some((sent, total)) = updates.recv().await {
                        callback(sent, total);
                    }
                });
                Delivery::Queued { sender, worker }
            }
        };

        Self {
            inner: Arc::new(ProgressState {
                counters: Mutex::new((0, None)),
                delivery: Mutex::new(delivery),
            }),
        }
    }

    /// Progress sink that only records counters
    pub fn detached() -> Self {
        Self::new(None, None)
    }

    /// Record that `sent` of `total` bytes have been transferred
    pub fn report(&self, sent: u64, total: Option<u64>) {
        *lock(&self.inner.counters) = (sent, total);

        let inline = match &*lock(&self.inner.delivery) {
            Delivery::Silent => None,
            Delivery::Inline(callback) => Some(callback.clone()),
            Delivery::Queued { sender, .. } => {
                // Closed only once the worker has gone away
                let _ = sender.send((sent, total));
                None
            }
        };
        if let Some(callback) = inline {
            callback(sent, total);
        }
    }

    /// Current `(bytes_sent, total_bytes)`
    pub fn snapshot(&self) -> (u64, Option<u64>) {
        *lock(&self.inner.counters)
    }

    pub(crate) fn reset(&self) {
        *lock(&self.inner.counters) = (0, None);
    }

    /// Stop queueing callbacks and wait until every queued report has been
    /// delivered. Later reports only update the counters.
    pub(crate) async fn flush(&self) {
        let queued = std::mem::replace(&mut *lock(&self.inner.delivery), Delivery::Silent);
        if let Delivery::Queued { sender, worker } = queued {
            drop(sender);
            if let Err(e) = worker.await {
                tracing::trace!("Progress delivery stopped early: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (sent, total) = self.snapshot();
        f.debug_struct("Progress")
            .field("sent", &sent)
            .field("total", &total)
            .finish()
    }
}

/// Registry record of one logical call that reached the transport
pub struct InFlightTask {
    id: RequestId,
    upload_file: Mutex<Option<PathBuf>>,
    progress: Progress,
    attempts: AtomicU32,
    cancelled: AtomicBool,
    finished: AtomicBool,
    cancel_notify: Notify,
}

impl InFlightTask {
    pub(crate) fn new(id: RequestId, upload_file: Option<PathBuf>, progress: Progress) -> Self {
        Self {
            id,
            upload_file: Mutex::new(upload_file),
            progress,
            attempts: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// Identifier of the originating request
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Temporary upload file owned by this task, if any
    pub fn upload_file(&self) -> Option<PathBuf> {
        lock(&self.upload_file).clone()
    }

    /// Progress of the current attempt
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Number of transport attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Request cancellation. The outcome is delivered as `Error::Cancelled`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.cancel_notify.notify_waiters();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the terminal outcome has been produced
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        self.progress.reset();
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.cancel_notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Mark finished and delete the upload file. Runs its effects once;
    /// deletion errors are ignored.
    pub(crate) fn finish(&self) {
        if let Some(path) = lock(&self.upload_file).take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::trace!("Failed to remove upload file {}: {}", path.display(), e);
            }
        }
        self.finished.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for InFlightTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTask")
            .field("id", &self.id)
            .field("upload_file", &self.upload_file())
            .field("attempts", &self.attempts())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Caller-facing handle to an in-flight task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    task: Arc<InFlightTask>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<InFlightTask>) -> Self {
        Self { task }
    }

    /// Identifier of the request this task runs
    pub fn id(&self) -> RequestId {
        self.task.id()
    }

    /// Cancel the task; a no-op once it has finished
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Whether the terminal outcome has been produced
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// `(bytes_sent, total_bytes)` of the current attempt
    pub fn progress(&self) -> (u64, Option<u64>) {
        self.task.progress().snapshot()
    }

    /// Number of transport attempts started so far
    pub fn attempts(&self) -> u32 {
        self.task.attempts()
    }

    /// Temporary upload file, until the task finishes
    pub fn upload_file(&self) -> Option<PathBuf> {
        self.task.upload_file()
    }
}

type TaskMap = HashMap<RequestId, Arc<InFlightTask>>;

/// Concurrent map of request identifiers to in-flight tasks
pub struct TaskRegistry {
    tasks: Mutex<TaskMap>,
    published: ArcSwapOption<Vec<Arc<InFlightTask>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            published: ArcSwapOption::empty(),
        }
    }

    /// Insert a task, replacing any task registered under the same id.
    /// Returns the replaced task.
    pub fn insert_or_update(&self, task: Arc<InFlightTask>) -> Option<Arc<InFlightTask>> {
        let mut tasks = lock(&self.tasks);
        let previous = tasks.insert(task.id(), task);
        self.published.store(None);
        previous
    }

    /// Look up the task registered under `id`
    pub fn find(&self, id: RequestId) -> Option<Arc<InFlightTask>> {
        lock(&self.tasks).get(&id).cloned()
    }

    /// Finish `task` and remove it if it is still the registered entry for
    /// its id. The upload file is deleted either way.
    pub fn remove(&self, task: &Arc<InFlightTask>) -> bool {
        let removed = {
            let mut tasks = lock(&self.tasks);
            match tasks.get(&task.id()) {
                Some(registered) if Arc::ptr_eq(registered, task) => {
                    tasks.remove(&task.id());
                    self.published.store(None);
                    true
                }
                _ => false,
            }
        };
        task.finish();
        removed
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// All registered tasks at this instant
    pub fn snapshot(&self) -> Arc<Vec<Arc<InFlightTask>>> {
        if let Some(published) = self.published.load_full() {
            return published;
        }
        let tasks = lock(&self.tasks);
        let published = Arc::new(tasks.values().cloned().collect::<Vec<_>>());
        self.published.store(Some(published.clone()));
        published
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("len", &self.len())
            .finish()
    }
}
