//! WorkerLoop - the single sequential consumer of one queue.
//!
//! # Flow
//! 1. `WorkSource::pull` with the poll timeout (timeout: poll again)
//! 2. POISON: stop and return the number of executed units
//! 3. `WorkSource::prepare` builds the executable (or skips the item); the
//!    cancellation channel holds requests for the item meanwhile
//! 4. register it in the cancellation channel if it is cancellable
//! 5. run it; a panic inside the unit becomes `TaskError::Panicked`
//! 6. `WorkSource::complete` records the outcome; back to 1
//!
//! General tasks and batch searches are two `WorkSource` adapters over the
//! same loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cancel::{CancelSource, CancelToken, CancellationChannel};
use crate::error::TaskError;
use crate::queue::QueueItem;
use crate::typed::Executable;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// How a unit ended.
#[derive(Debug)]
pub enum Outcome {
    Done(Value),
    Cancelled { requeue: bool },
    Failed(TaskError),
}

impl From<Result<Value, TaskError>> for Outcome {
    fn from(result: Result<Value, TaskError>) -> Self {
        match result {
            Ok(value) => Outcome::Done(value),
            Err(TaskError::Cancelled { requeue }) => Outcome::Cancelled { requeue },
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// Where a worker gets its items and where it reports them.
#[async_trait]
pub trait WorkSource: Send + Sync + 'static {
    type Item: Send + Sync + 'static;

    /// Next item, POISON, or `None` when nothing arrived within `timeout`.
    async fn pull(&self, timeout: Duration) -> Option<QueueItem<Self::Item>>;

    /// Id used for cancellation targeting and logs.
    fn item_id(&self, item: &Self::Item) -> String;

    /// Build the unit for `item`. `Ok(None)` skips the item without an outcome.
    async fn prepare(
        &self,
        item: &Self::Item,
        cancel: CancelToken,
    ) -> Result<Option<Box<dyn Executable>>, TaskError>;

    async fn complete(&self, item: Self::Item, outcome: Outcome);
}

/// Observable worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Waiting,
    Dispatching,
    Executing,
    Reporting,
    Stopped,
}

pub struct WorkerLoop<S: WorkSource> {
    name: String,
    source: Arc<S>,
    channel: Arc<CancellationChannel>,
    poll_timeout: Duration,
}

impl<S: WorkSource> WorkerLoop<S> {
    pub fn new(name: impl Into<String>, source: Arc<S>, channel: Arc<CancellationChannel>) -> Self {
        Self {
            name: name.into(),
            source,
            channel,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Waiting);
        let join = tokio::spawn(self.run(state_tx, stop_rx));
        WorkerHandle {
            stop_tx,
            state_rx,
            join: Some(join),
        }
    }

    /// Run until POISON or a stop signal. Returns the number of units executed.
    pub async fn run(self, state: watch::Sender<WorkerState>, mut stop: watch::Receiver<bool>) -> usize {
        let mut executed = 0;
        info!(worker = %self.name, "worker started");

        loop {
            if *stop.borrow() {
                info!(worker = %self.name, "stop requested");
                break;
            }
            state.send_replace(WorkerState::Waiting);

            // pull may wait for a long time, so race it against the stop signal
            let pulled = tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                pulled = self.source.pull(self.poll_timeout) => pulled,
            };

            let item = match pulled {
                None => continue,
                Some(QueueItem::Poison) => {
                    info!(worker = %self.name, executed, "poison received");
                    break;
                }
                Some(QueueItem::Item(item)) => item,
            };

            state.send_replace(WorkerState::Dispatching);
            let id = self.source.item_id(&item);
            let outcome = match self.dispatch(&id, &item, &state).await {
                Some(outcome) => outcome,
                None => {
                    debug!(worker = %self.name, id = %id, "item skipped");
                    continue;
                }
            };

            state.send_replace(WorkerState::Reporting);
            match &outcome {
                Outcome::Done(_) => info!(worker = %self.name, id = %id, "unit done"),
                Outcome::Cancelled { requeue } => {
                    info!(worker = %self.name, id = %id, requeue, "unit cancelled")
                }
                Outcome::Failed(err) => error!(worker = %self.name, id = %id, error = %err, "unit failed"),
            }
            self.source.complete(item, outcome).await;
            executed += 1;
        }

        state.send_replace(WorkerState::Stopped);
        info!(worker = %self.name, executed, "worker stopped");
        executed
    }

    async fn dispatch(&self, id: &str, item: &S::Item, state: &watch::Sender<WorkerState>) -> Option<Outcome> {
        let cancel = CancelSource::new();
        self.channel.begin(id);
        let unit = match self.source.prepare(item, cancel.token()).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                self.channel.clear();
                return None;
            }
            Err(err) => {
                self.channel.clear();
                return Some(Outcome::Failed(err));
            }
        };

        if unit.is_cancellable() {
            self.channel.register(id, &cancel);
        } else {
            self.channel.clear();
        }
        state.send_replace(WorkerState::Executing);
        let result = AssertUnwindSafe(unit.call()).catch_unwind().await;
        self.channel.clear();

        Some(match result {
            Ok(result) => Outcome::from(result),
            Err(panic) => Outcome::Failed(TaskError::Panicked(panic_message(panic.as_ref()))),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Returned normally after executing this many units.
    Finished(usize),
    /// Still running at the deadline and aborted.
    TimedOut,
    /// The worker task itself died.
    Crashed,
    /// Already joined earlier.
    NotRunning,
}

/// Handle on a spawned worker.
/// - `stop()` makes it exit after the current unit
/// - `state()` reads its current state
/// - `shutdown(timeout)` waits for it, aborting it past the timeout
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<WorkerState>,
    join: Option<JoinHandle<usize>>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// Wait up to `timeout` for the worker to return; abort it otherwise.
    pub async fn shutdown(&mut self, timeout: Duration) -> WorkerExit {
        let Some(mut join) = self.join.take() else {
            return WorkerExit::NotRunning;
        };
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(executed)) => WorkerExit::Finished(executed),
            Ok(Err(err)) => {
                error!(error = %err, "worker task failed");
                WorkerExit::Crashed
            }
            Err(_) => {
                warn!(?timeout, "worker still busy at shutdown deadline, aborting");
                join.abort();
                WorkerExit::TimedOut
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(join) = &self.join {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkQueue;
    use std::sync::Mutex;

    /// Source over a queue of closures' names, recording outcomes.
    #[derive(Default)]
    struct ScriptSource {
        queue: WorkQueue<&'static str>,
        outcomes: Mutex<Vec<(String, String)>>,
        gate: tokio::sync::Notify,
    }

    struct Unit {
        name: &'static str,
        cancel: CancelToken,
    }

    #[async_trait]
    impl Executable for Unit {
        async fn call(self: Box<Self>) -> Result<Value, TaskError> {
            match self.name {
                "fail" => Err(TaskError::Failed("boom".into())),
                "panic" => panic!("unit panicked"),
                "wait" => {
                    let request = self.cancel.cancelled().await;
                    Err(TaskError::Cancelled {
                        requeue: request.requeue,
                    })
                }
                name => Ok(Value::from(name)),
            }
        }

        fn is_cancellable(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl WorkSource for ScriptSource {
        type Item = &'static str;

        async fn pull(&self, timeout: Duration) -> Option<QueueItem<Self::Item>> {
            self.queue.dequeue_with_timeout(timeout).await
        }

        fn item_id(&self, item: &Self::Item) -> String {
            item.to_string()
        }

        async fn prepare(
            &self,
            item: &Self::Item,
            cancel: CancelToken,
        ) -> Result<Option<Box<dyn Executable>>, TaskError> {
            match *item {
                "skip" => Ok(None),
                "unknown" => Err(TaskError::Failed("no factory".into())),
                "gated" => {
                    self.gate.notified().await;
                    Ok(Some(Box::new(Unit { name: "wait", cancel })))
                }
                name => Ok(Some(Box::new(Unit { name, cancel }))),
            }
        }

        async fn complete(&self, item: Self::Item, outcome: Outcome) {
            let outcome = match outcome {
                Outcome::Done(v) => format!("done:{v}"),
                Outcome::Cancelled { requeue } => format!("cancelled:{requeue}"),
                Outcome::Failed(err) => format!("failed:{err}"),
            };
            self.outcomes.lock().unwrap().push((item.to_string(), outcome));
        }
    }

    fn outcomes(source: &ScriptSource) -> Vec<(String, String)> {
        source.outcomes.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let source = Arc::new(ScriptSource::default());
        for item in ["a", "fail", "panic", "unknown", "skip", "b"] {
            source.queue.enqueue(item);
        }
        source.queue.enqueue_poison();

        let mut handle = WorkerLoop::new("test", Arc::clone(&source), Arc::new(CancellationChannel::new()))
            .with_poll_timeout(Duration::from_millis(50))
            .spawn();

        assert_eq!(handle.shutdown(Duration::from_secs(5)).await, WorkerExit::Finished(5));
        assert_eq!(
            outcomes(&source),
            vec![
                ("a".into(), "done:\"a\"".into()),
                ("fail".into(), "failed:boom".into()),
                ("panic".into(), "failed:task panicked: unit panicked".into()),
                ("unknown".into(), "failed:no factory".into()),
                ("b".into(), "done:\"b\"".into()),
            ]
        );
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn running_unit_is_cancelled_through_the_channel() {
        let source = Arc::new(ScriptSource::default());
        let channel = Arc::new(CancellationChannel::new());
        source.queue.enqueue("wait");
        source.queue.enqueue_poison();

        let mut handle = WorkerLoop::new("test", Arc::clone(&source), Arc::clone(&channel))
            .with_poll_timeout(Duration::from_millis(50))
            .spawn();

        let mut states = handle.subscribe();
        states.wait_for(|s| *s == WorkerState::Executing).await.unwrap();
        assert_eq!(channel.current().as_deref(), Some("wait"));
        assert!(channel.request_cancellation(Some("wait"), true));

        assert_eq!(handle.shutdown(Duration::from_secs(5)).await, WorkerExit::Finished(1));
        assert_eq!(outcomes(&source), vec![("wait".into(), "cancelled:true".into())]);
        assert_eq!(channel.current(), None);
    }

    #[tokio::test]
    async fn request_during_prepare_reaches_the_unit() {
        let source = Arc::new(ScriptSource::default());
        let channel = Arc::new(CancellationChannel::new());
        source.queue.enqueue("gated");
        source.queue.enqueue_poison();

        let mut handle = WorkerLoop::new("test", Arc::clone(&source), Arc::clone(&channel))
            .with_poll_timeout(Duration::from_millis(50))
            .spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.current().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(channel.request_cancellation(Some("gated"), false));
        source.gate.notify_one();

        assert_eq!(handle.shutdown(Duration::from_secs(5)).await, WorkerExit::Finished(1));
        assert_eq!(outcomes(&source), vec![("gated".into(), "cancelled:false".into())]);
    }

    #[tokio::test]
    async fn stop_signal_ends_an_idle_worker() {
        let source = Arc::new(ScriptSource::default());
        let mut handle = WorkerLoop::new("test", source, Arc::new(CancellationChannel::new()))
            .with_poll_timeout(Duration::from_secs(60))
            .spawn();

        handle.stop();
        assert_eq!(handle.shutdown(Duration::from_secs(5)).await, WorkerExit::Finished(0));
    }

    #[tokio::test]
    async fn busy_worker_is_aborted_at_the_deadline() {
        let source = Arc::new(ScriptSource::default());
        source.queue.enqueue("wait");

        let mut handle = WorkerLoop::new("test", source, Arc::new(CancellationChannel::new()))
            .with_poll_timeout(Duration::from_millis(50))
            .spawn();

        assert_eq!(handle.shutdown(Duration::from_millis(100)).await, WorkerExit::TimedOut);
        assert_eq!(handle.shutdown(Duration::from_millis(100)).await, WorkerExit::NotRunning);
    }
}
