//! General tasks: the registry of task records, the worker adapter over it and
//! the manager that owns both.
//!
//! - `TaskRegistry` is the single source of truth for task status and the
//!   `TaskSupplier` the worker pulls from. Its queue only carries ids.
//! - `TaskSource` adapts any `TaskSupplier` to the generic `WorkerLoop`.
//! - `TaskManager` spawns the worker and adds stop / shutdown on top.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cancel::{CancelToken, CancellationChannel};
use super::worker_loop::{Outcome, WorkSource, WorkerExit, WorkerHandle, WorkerLoop, WorkerState};
use crate::config::WorkerConfig;
use crate::domain::{TaskArguments, TaskId, TaskRecord, TaskState, TaskType, User};
use crate::error::{EngineError, TaskError};
use crate::observability::TaskCounts;
use crate::ports::{Clock, IdGenerator, SystemClock, TaskSupplier, UlidGenerator};
use crate::queue::{QueueItem, WorkQueue};
use crate::typed::{Executable, FactoryRegistry, Progress, Task, TaskContext};

/// Task records by id, plus the queue of ids waiting to run.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    queue: WorkQueue<TaskId>,
    executed: AtomicUsize,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_ports(clock, ids)
    }

    pub fn with_ports(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            queue: WorkQueue::new(),
            executed: AtomicUsize::new(0),
            clock,
            ids,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create, persist and enqueue a task under a generated id.
    pub fn start_task(
        &self,
        task_type: TaskType,
        owner: User,
        arguments: TaskArguments,
    ) -> Result<TaskId, EngineError> {
        self.start_task_with_id(self.ids.generate_task_id(), task_type, owner, arguments)
    }

    /// Create, persist and enqueue a task under a caller-chosen id.
    pub fn start_task_with_id(
        &self,
        id: TaskId,
        task_type: TaskType,
        owner: User,
        arguments: TaskArguments,
    ) -> Result<TaskId, EngineError> {
        let now = self.clock.now();
        {
            let mut tasks = self.write();
            if tasks.contains_key(&id) {
                return Err(EngineError::DuplicateTask(id));
            }
            let mut record = TaskRecord::new(id.clone(), task_type.clone(), owner, arguments, now);
            record.mark_queued(now);
            tasks.insert(id.clone(), record);
        }
        self.queue.enqueue(id.clone());
        info!(task_id = %id, task_type = %task_type, "task queued");
        Ok(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.read().get(id).cloned()
    }

    /// Snapshots, oldest first, optionally restricted to one owner and to task
    /// types matching `type_pattern`.
    pub fn list(&self, owner: Option<&User>, type_pattern: Option<&Regex>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .read()
            .values()
            .filter(|r| owner.is_none_or(|o| &r.owner == o))
            .filter(|r| type_pattern.is_none_or(|p| p.is_match(r.task_type.as_str())))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Remove one record. Running records stay.
    pub fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, EngineError> {
        let removed = {
            let mut tasks = self.write();
            match tasks.get(id) {
                Some(record) if record.state == TaskState::Running => {
                    return Err(EngineError::TaskRunning(id.clone()));
                }
                Some(_) => tasks.remove(id),
                None => None,
            }
        };
        if removed.as_ref().is_some_and(|r| r.state == TaskState::Queued) {
            self.queue.remove(|queued| queued == id);
        }
        Ok(removed)
    }

    /// Remove every record that is not running and return them.
    pub fn clear_finished(&self) -> Vec<TaskRecord> {
        let removed: Vec<TaskRecord> = {
            let mut tasks = self.write();
            let ids: Vec<TaskId> = tasks
                .values()
                .filter(|r| r.state != TaskState::Running)
                .map(|r| r.id.clone())
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };
        for record in removed.iter().filter(|r| r.state == TaskState::Queued) {
            self.queue.remove(|queued| queued == &record.id);
        }
        info!(removed = removed.len(), "cleared finished tasks");
        removed
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts: TaskCounts = self.read().values().map(|r| r.state).collect();
        counts.pending = self.queue.len();
        counts
    }

    /// Tasks that reached DONE or ERROR.
    pub fn executed_tasks(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> Vec<TaskId> {
        self.read()
            .values()
            .filter(|r| r.state == TaskState::Running)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn enqueue_poison(&self) {
        self.queue.enqueue_poison();
    }

    /// Queue entries waiting, poison included.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// QUEUED -> RUNNING for a freshly dequeued id.
    fn claim(&self, id: &TaskId) -> Option<TaskRecord> {
        let now = self.clock.now();
        let mut tasks = self.write();
        match tasks.get_mut(id) {
            Some(record) if record.state == TaskState::Queued => {
                record.mark_running(now);
                Some(record.clone())
            }
            Some(record) => {
                warn!(task_id = %id, state = ?record.state, "dequeued task is not queued, skipping");
                None
            }
            None => {
                warn!(task_id = %id, "dequeued task no longer exists, skipping");
                None
            }
        }
    }

    fn update<F>(&self, id: &TaskId, what: &str, apply: F) -> bool
    where
        F: FnOnce(&mut TaskRecord) -> bool,
    {
        let mut tasks = self.write();
        match tasks.get_mut(id) {
            Some(record) => {
                let applied = apply(record);
                if !applied {
                    debug!(task_id = %id, state = ?record.state, "{what} ignored");
                }
                applied
            }
            None => {
                warn!(task_id = %id, "{what} for unknown task");
                false
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSupplier for TaskRegistry {
    async fn next_task(&self, timeout: Duration) -> Option<QueueItem<TaskRecord>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.queue.dequeue_with_timeout(remaining).await {
                Some(QueueItem::Item(id)) => {
                    if let Some(record) = self.claim(&id) {
                        return Some(QueueItem::Item(record));
                    }
                }
                Some(QueueItem::Poison) => return Some(QueueItem::Poison),
                None => return None,
            }
        }
    }

    fn progress(&self, id: &TaskId, rate: f64) {
        let now = self.clock.now();
        self.update(id, "progress", |record| record.set_progress(rate, now));
    }

    fn result(&self, id: &TaskId, value: Value) {
        let now = self.clock.now();
        if self.update(id, "result", |record| record.mark_done(value, now)) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn error(&self, id: &TaskId, cause: &TaskError) {
        let now = self.clock.now();
        if self.update(id, "error", |record| record.mark_error(cause.to_string(), now)) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cancel(&self, id: &TaskId, requeue: bool) {
        let now = self.clock.now();
        let mut was_queued = false;
        let cancelled = self.update(id, "cancel", |record| {
            was_queued = record.state == TaskState::Queued;
            record.mark_cancelled(now) && (!requeue || record.mark_queued(now))
        });
        if !cancelled {
            return;
        }
        if was_queued {
            self.queue.remove(|queued| queued == id);
        }
        if requeue {
            self.queue.enqueue(id.clone());
            info!(task_id = %id, "task cancelled and requeued");
        } else {
            info!(task_id = %id, "task cancelled");
        }
    }
}

/// `WorkSource` for general tasks: resolves the record's type through the
/// factory registry and reports back to the supplier.
pub struct TaskSource {
    supplier: Arc<dyn TaskSupplier>,
    factories: Arc<FactoryRegistry>,
}

impl TaskSource {
    pub fn new(supplier: Arc<dyn TaskSupplier>, factories: Arc<FactoryRegistry>) -> Self {
        Self { supplier, factories }
    }
}

#[async_trait]
impl WorkSource for TaskSource {
    type Item = TaskRecord;

    async fn pull(&self, timeout: Duration) -> Option<QueueItem<TaskRecord>> {
        self.supplier.next_task(timeout).await
    }

    fn item_id(&self, record: &TaskRecord) -> String {
        record.id.to_string()
    }

    async fn prepare(
        &self,
        record: &TaskRecord,
        cancel: CancelToken,
    ) -> Result<Option<Box<dyn Executable>>, TaskError> {
        self.supplier.progress(&record.id, 0.0);
        let factory = self.factories.resolve(&record.task_type)?;

        let supplier = Arc::clone(&self.supplier);
        let id = record.id.clone();
        let ctx = TaskContext {
            task_id: record.id.clone(),
            owner: record.owner.clone(),
            progress: Progress::new(move |rate| supplier.progress(&id, rate)),
            cancel,
        };
        factory.create(&record.arguments, ctx).map(Some)
    }

    async fn complete(&self, record: TaskRecord, outcome: Outcome) {
        match outcome {
            Outcome::Done(value) => self.supplier.result(&record.id, value),
            Outcome::Cancelled { requeue } => self.supplier.cancel(&record.id, requeue),
            Outcome::Failed(err) => self.supplier.error(&record.id, &err),
        }
    }
}

/// What `drain_and_shutdown` saw.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub worker: WorkerExit,
    pub executed_tasks: usize,
    /// Tasks left RUNNING by an aborted worker; their outcome is unknown.
    pub still_running: Vec<TaskId>,
    /// Queue entries never reached.
    pub pending: usize,
}

/// Owns a registry and the single worker that drains it.
pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    channel: Arc<CancellationChannel>,
    state: watch::Receiver<WorkerState>,
    worker: Mutex<WorkerHandle>,
}

impl TaskManager {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(factories: FactoryRegistry, config: &WorkerConfig) -> Self {
        Self::with_registry(Arc::new(TaskRegistry::new()), factories, config)
    }

    pub fn with_registry(registry: Arc<TaskRegistry>, factories: FactoryRegistry, config: &WorkerConfig) -> Self {
        let channel = Arc::new(CancellationChannel::new());
        let supplier: Arc<dyn TaskSupplier> = registry.clone();
        let source = Arc::new(TaskSource::new(supplier, Arc::new(factories)));
        let handle = WorkerLoop::new("tasks", source, Arc::clone(&channel))
            .with_poll_timeout(config.poll_timeout())
            .spawn();
        Self {
            registry,
            channel,
            state: handle.subscribe(),
            worker: Mutex::new(handle),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn start_task(
        &self,
        task_type: impl Into<String>,
        owner: User,
        arguments: TaskArguments,
    ) -> Result<TaskId, EngineError> {
        self.registry.start_task(TaskType::new(task_type), owner, arguments)
    }

    pub fn start_task_with_id(
        &self,
        id: TaskId,
        task_type: impl Into<String>,
        owner: User,
        arguments: TaskArguments,
    ) -> Result<TaskId, EngineError> {
        self.registry
            .start_task_with_id(id, TaskType::new(task_type), owner, arguments)
    }

    /// Start a typed task; its fields become the record's arguments.
    pub fn submit<T: Task>(&self, owner: User, task: &T) -> Result<TaskId, EngineError> {
        let arguments = match serde_json::to_value(task) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            Ok(other) => return Err(EngineError::InvalidArguments(format!("got {other}"))),
            Err(err) => return Err(EngineError::InvalidArguments(err.to_string())),
        };
        self.start_task(T::TYPE, owner, arguments)
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.registry.get(id)
    }

    pub fn list(&self, owner: Option<&User>, type_pattern: Option<&Regex>) -> Vec<TaskRecord> {
        self.registry.list(owner, type_pattern)
    }

    /// QUEUED: dequeue and cancel, then re-append at the tail if `requeue`.
    /// RUNNING: signal the unit, which ends CANCELLED or back in QUEUED once it
    /// observes the request. Otherwise false.
    ///
    /// A RUNNING task whose unit is not cancellable, or whose record turned
    /// RUNNING an instant before the worker pointed the cancellation channel
    /// at it, is not signalled and yields false.
    pub fn cancel(&self, id: &TaskId, requeue: bool) -> bool {
        match self.registry.get(id).map(|r| r.state) {
            Some(TaskState::Queued) => {
                self.registry.cancel(id, requeue);
                true
            }
            Some(TaskState::Running) => self.channel.request_cancellation(Some(id.as_str()), requeue),
            state => {
                info!(task_id = %id, ?state, "unknown task or not active, nothing to cancel");
                false
            }
        }
    }

    /// `cancel` without requeue.
    pub fn stop(&self, id: &TaskId) -> bool {
        self.cancel(id, false)
    }

    /// Stop every queued or running task of `owner`.
    pub fn stop_all(&self, owner: &User) -> HashMap<TaskId, bool> {
        self.registry
            .list(Some(owner), None)
            .into_iter()
            .filter(|r| matches!(r.state, TaskState::Queued | TaskState::Running))
            .map(|r| {
                let stopped = self.stop(&r.id);
                (r.id, stopped)
            })
            .collect()
    }

    pub fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, EngineError> {
        self.registry.remove(id)
    }

    pub fn clear_finished(&self) -> Vec<TaskRecord> {
        self.registry.clear_finished()
    }

    pub fn counts(&self) -> TaskCounts {
        self.registry.counts()
    }

    pub fn executed_tasks(&self) -> usize {
        self.registry.executed_tasks()
    }

    pub fn worker_state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// For the embedding process's signal handler: stop after the current
    /// unit and ask that unit to cancel.
    pub fn terminate(&self) {
        info!("terminating task worker");
        self.registry.enqueue_poison();
        self.channel.request_cancellation(None, false);
    }

    /// Let the worker finish everything queued so far, waiting at most
    /// `timeout`, then halt it.
    pub async fn drain_and_shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.registry.enqueue_poison();
        let worker = self.worker.lock().await.shutdown(timeout).await;
        let report = ShutdownReport {
            worker,
            executed_tasks: self.registry.executed_tasks(),
            still_running: self.registry.running(),
            pending: self.registry.pending(),
        };
        info!(?report, "task manager shut down");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use crate::typed::Handler;
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Sleep {
        millis: u64,
    }

    impl Task for Sleep {
        const TYPE: &'static str = "sleep";
    }

    struct SleepHandler;

    #[async_trait]
    impl Handler<Sleep> for SleepHandler {
        async fn handle(&self, task: Sleep, ctx: TaskContext) -> Result<Value, TaskError> {
            ctx.progress.report(0.5);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(task.millis)) => Ok(json!(task.millis)),
                request = ctx.cancel.cancelled() => Err(TaskError::Cancelled { requeue: request.requeue }),
            }
        }

        fn is_cancellable(&self) -> bool {
            true
        }
    }

    fn factories() -> FactoryRegistry {
        let mut factories = FactoryRegistry::new();
        factories.register::<Sleep, _>(SleepHandler).unwrap();
        factories
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            poll_timeout_secs: 1,
            shutdown_timeout_secs: 5,
        }
    }

    fn sleep_args(millis: u64) -> TaskArguments {
        TaskArguments::from([("millis".to_string(), json!(millis))])
    }

    async fn wait_for_state(manager: &TaskManager, id: &TaskId, state: TaskState) {
        for _ in 0..200 {
            if manager.get(id).is_some_and(|r| r.state == state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {state:?}: {:?}", manager.get(id));
    }

    /// Running, and the channel points at it.
    async fn wait_for_unit(manager: &TaskManager, id: &TaskId) {
        wait_for_state(manager, id, TaskState::Running).await;
        for _ in 0..200 {
            if manager.channel.current().as_deref() == Some(id.as_str()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached the cancellation channel");
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let registry = TaskRegistry::new();
        let id = TaskId::new("ghost");
        registry.progress(&id, 0.5);
        registry.result(&id, json!(1));
        registry.error(&id, &TaskError::Failed("x".into()));
        registry.cancel(&id, true);
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = TaskRegistry::new();
        let id = TaskId::new("t1");
        registry
            .start_task_with_id(id.clone(), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();
        let err = registry
            .start_task_with_id(id.clone(), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(dup) if dup == id));
        assert_eq!(registry.get(&id).unwrap().state, TaskState::Queued);
    }

    #[test]
    fn timestamps_come_from_the_clock() {
        let start = Utc.with_ymd_and_hms(2020, 5, 25, 10, 11, 12).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let registry = TaskRegistry::with_ports(clock, ids);

        let id = registry
            .start_task(TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.created_at, start);
        assert!(id.as_str().starts_with("task-"));
    }

    #[test]
    fn claim_moves_only_queued_records_to_running() {
        let registry = TaskRegistry::new();
        let stale = registry
            .start_task_with_id(TaskId::new("a"), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();
        let fresh = registry
            .start_task_with_id(TaskId::new("b"), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();
        registry.write().get_mut(&stale).unwrap().mark_cancelled(Utc::now());

        assert!(registry.claim(&stale).is_none());
        let claimed = registry.claim(&fresh).unwrap();
        assert_eq!(claimed.state, TaskState::Running);
        assert_eq!(registry.get(&fresh).unwrap().state, TaskState::Running);
        assert!(registry.claim(&fresh).is_none());
        assert!(registry.claim(&TaskId::new("ghost")).is_none());
    }

    #[tokio::test]
    async fn requeue_of_a_queued_task_moves_it_to_the_tail() {
        let registry = TaskRegistry::new();
        let first = registry
            .start_task_with_id(TaskId::new("a"), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();
        registry
            .start_task_with_id(TaskId::new("b"), TaskType::new("sleep"), User::local(), sleep_args(1))
            .unwrap();

        registry.cancel(&first, true);

        assert_eq!(registry.pending(), 2);
        assert_eq!(registry.get(&first).unwrap().state, TaskState::Queued);
        let next = registry.next_task(Duration::from_millis(10)).await;
        assert!(matches!(next, Some(QueueItem::Item(r)) if r.id.as_str() == "b"));
    }

    #[test]
    fn list_filters_by_owner_and_type_pattern() {
        let registry = TaskRegistry::new();
        registry
            .start_task(TaskType::new("index.scan"), User::new("alice"), TaskArguments::new())
            .unwrap();
        registry
            .start_task(TaskType::new("batch_search"), User::new("bob"), TaskArguments::new())
            .unwrap();

        let pattern = Regex::new("^index\\.").unwrap();
        assert_eq!(registry.list(None, Some(&pattern)).len(), 1);
        assert_eq!(registry.list(Some(&User::new("bob")), None).len(), 1);
        assert_eq!(registry.list(None, None).len(), 2);
    }

    #[tokio::test]
    async fn runs_tasks_and_drains_on_shutdown() {
        let manager = TaskManager::start(factories(), &config());
        let ids: Vec<TaskId> = (0..3)
            .map(|_| manager.submit(User::local(), &Sleep { millis: 5 }).unwrap())
            .collect();

        let report = manager.drain_and_shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.worker, WorkerExit::Finished(3));
        assert_eq!(report.executed_tasks, 3);
        for id in &ids {
            let record = manager.get(id).unwrap();
            assert_eq!(record.state, TaskState::Done);
            assert_eq!(record.result, Some(json!(5)));
            assert_eq!(record.progress, 1.0);
        }
        assert_eq!(manager.worker_state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn unknown_type_and_bad_arguments_fail_only_that_task() {
        let manager = TaskManager::start(factories(), &config());
        let unknown = manager.start_task("nope", User::local(), TaskArguments::new()).unwrap();
        let bad = manager.start_task("sleep", User::local(), TaskArguments::new()).unwrap();
        let good = manager.submit(User::local(), &Sleep { millis: 1 }).unwrap();

        manager.drain_and_shutdown(Duration::from_secs(5)).await;

        assert_eq!(manager.get(&unknown).unwrap().state, TaskState::Error);
        assert!(manager.get(&unknown).unwrap().error.unwrap().contains("nope"));
        assert_eq!(manager.get(&bad).unwrap().state, TaskState::Error);
        assert_eq!(manager.get(&good).unwrap().state, TaskState::Done);
    }

    #[tokio::test]
    async fn stop_cancels_running_and_queued_tasks() {
        let manager = TaskManager::start(factories(), &config());
        let running = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        let queued = manager.submit(User::local(), &Sleep { millis: 1 }).unwrap();
        wait_for_unit(&manager, &running).await;

        assert!(manager.stop(&queued));
        assert!(manager.stop(&running));
        wait_for_state(&manager, &running, TaskState::Cancelled).await;

        assert_eq!(manager.get(&queued).unwrap().state, TaskState::Cancelled);
        assert!(!manager.stop(&TaskId::new("unknown")));
        assert!(matches!(manager.remove(&running), Ok(Some(_))));
        manager.drain_and_shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn cancel_with_requeue_puts_a_running_task_back_in_the_queue() {
        let manager = TaskManager::start(factories(), &config());
        let running = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        let next = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        wait_for_unit(&manager, &running).await;

        assert!(manager.cancel(&running, true));
        wait_for_state(&manager, &next, TaskState::Running).await;

        // requeued behind `next`
        assert_eq!(manager.get(&running).unwrap().state, TaskState::Queued);
        assert_eq!(manager.registry().pending(), 1);
        assert!(manager.stop(&running));
        manager.terminate();
        manager.drain_and_shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn running_task_cannot_be_removed() {
        let manager = TaskManager::start(factories(), &config());
        let running = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        wait_for_unit(&manager, &running).await;

        assert!(matches!(manager.remove(&running), Err(EngineError::TaskRunning(_))));
        assert!(manager.clear_finished().is_empty());

        let stopped = manager.stop_all(&User::local());
        assert_eq!(stopped.get(&running), Some(&true));
        manager.drain_and_shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn shutdown_timeout_leaves_the_running_task_reported() {
        let manager = TaskManager::start(factories(), &config());
        let running = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        wait_for_state(&manager, &running, TaskState::Running).await;

        let report = manager.drain_and_shutdown(Duration::from_millis(50)).await;

        assert_eq!(report.worker, WorkerExit::TimedOut);
        assert_eq!(report.still_running, vec![running]);
    }

    #[tokio::test]
    async fn terminate_cancels_the_current_task_and_stops() {
        let manager = TaskManager::start(factories(), &config());
        let running = manager.submit(User::local(), &Sleep { millis: 60_000 }).unwrap();
        wait_for_unit(&manager, &running).await;

        manager.terminate();
        let report = manager.drain_and_shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.worker, WorkerExit::Finished(1));
        assert_eq!(manager.get(&running).unwrap().state, TaskState::Cancelled);
    }
}
