use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docket_core::app::{TaskManager, WorkerExit, WorkerState};
use docket_core::config::WorkerConfig;
use docket_core::domain::{TaskArguments, TaskId, TaskState, User};
use docket_core::error::TaskError;
use docket_core::ports::TaskSupplier;
use docket_core::typed::{Executable, FactoryRegistry, Handler, Task, TaskContext};
use regex::Regex;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Add {
    a: i64,
    b: i64,
}

impl Task for Add {
    const TYPE: &'static str = "add";
}

struct AddHandler;

#[async_trait]
impl Handler<Add> for AddHandler {
    async fn handle(&self, task: Add, ctx: TaskContext) -> Result<Value, TaskError> {
        ctx.progress.report(1.0);
        Ok(json!(task.a + task.b))
    }
}

struct Explode;

#[async_trait]
impl Executable for Explode {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        panic!("exploded")
    }
}

struct Wait {
    ctx: TaskContext,
}

#[async_trait]
impl Executable for Wait {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        let request = self.ctx.cancel.cancelled().await;
        Err(TaskError::Cancelled { requeue: request.requeue })
    }

    fn is_cancellable(&self) -> bool {
        true
    }
}

/// Waits for cancellation on its first run, returns on the next one.
struct WaitOnce {
    ctx: TaskContext,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Executable for WaitOnce {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            let request = self.ctx.cancel.cancelled().await;
            return Err(TaskError::Cancelled { requeue: request.requeue });
        }
        Ok(json!("second run"))
    }

    fn is_cancellable(&self) -> bool {
        true
    }
}

fn factories() -> FactoryRegistry {
    let mut factories = FactoryRegistry::new();
    factories.register::<Add, _>(AddHandler).unwrap();
    factories
        .register_fn("explode", |_, _| Ok(Box::new(Explode) as Box<dyn Executable>))
        .unwrap();
    factories
        .register_fn("wait", |_, ctx| Ok(Box::new(Wait { ctx }) as Box<dyn Executable>))
        .unwrap();
    factories
}

fn start(factories: FactoryRegistry) -> TaskManager {
    let config = WorkerConfig {
        poll_timeout_secs: 1,
        ..WorkerConfig::default()
    };
    TaskManager::start(factories, &config)
}

fn manager() -> TaskManager {
    start(factories())
}

async fn wait_for(manager: &TaskManager, id: &TaskId, state: TaskState) {
    tokio::time::timeout(WAIT, async {
        while manager.get(id).map(|r| r.state) != Some(state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never reached {state:?}"));
}

/// Wait until `id` runs and the worker is inside the unit.
async fn wait_executing(manager: &TaskManager, id: &TaskId) {
    wait_for(manager, id, TaskState::Running).await;
    tokio::time::timeout(WAIT, async {
        while manager.worker_state() != WorkerState::Executing {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never started executing"));
}

#[rstest]
#[case(1)]
#[case(10)]
#[tokio::test]
async fn every_task_ends_terminal_after_drain(#[case] n: i64) {
    let manager = manager();
    let ids: Vec<TaskId> = (0..n)
        .map(|i| manager.submit(User::local(), &Add { a: i, b: 1 }).unwrap())
        .collect();

    let report = manager.drain_and_shutdown(WAIT).await;

    assert_eq!(report.worker, WorkerExit::Finished(n as usize));
    assert_eq!(report.executed_tasks, n as usize);
    assert!(report.still_running.is_empty());
    for (i, id) in ids.iter().enumerate() {
        let record = manager.get(id).unwrap();
        assert_eq!(record.state, TaskState::Done);
        assert_eq!(record.result, Some(json!(i as i64 + 1)));
        assert_eq!(record.progress, 1.0);
    }
}

#[tokio::test]
async fn failures_are_recorded_and_the_worker_keeps_going() {
    let manager = manager();
    let panicked = manager.start_task("explode", User::local(), TaskArguments::new()).unwrap();
    let unknown = manager.start_task("nope", User::local(), TaskArguments::new()).unwrap();
    let invalid = manager
        .start_task("add", User::local(), TaskArguments::from([("a".to_string(), json!("x"))]))
        .unwrap();
    let fine = manager.submit(User::local(), &Add { a: 2, b: 2 }).unwrap();

    manager.drain_and_shutdown(WAIT).await;

    let error_of = |id: &TaskId| {
        let record = manager.get(id).unwrap();
        assert_eq!(record.state, TaskState::Error);
        record.error.unwrap()
    };
    assert!(error_of(&panicked).contains("exploded"));
    assert!(error_of(&unknown).contains("no factory registered for task type nope"));
    assert!(error_of(&invalid).starts_with("invalid arguments for add"));
    assert_eq!(manager.get(&fine).unwrap().state, TaskState::Done);
    assert_eq!(manager.counts().error, 3);
}

#[tokio::test]
async fn reports_for_unknown_ids_are_ignored() {
    let manager = manager();
    let registry = manager.registry();
    let ghost = TaskId::new("ghost");

    registry.progress(&ghost, 0.5);
    registry.result(&ghost, json!(1));
    registry.error(&ghost, &TaskError::Failed("boom".into()));
    registry.cancel(&ghost, true);

    assert!(manager.get(&ghost).is_none());
    assert_eq!(manager.executed_tasks(), 0);
    manager.drain_and_shutdown(WAIT).await;
}

#[tokio::test]
async fn running_task_is_stopped_through_the_channel() {
    let manager = manager();
    let id = manager.start_task("wait", User::local(), TaskArguments::new()).unwrap();
    wait_executing(&manager, &id).await;

    assert!(manager.stop(&id));
    wait_for(&manager, &id, TaskState::Cancelled).await;

    assert!(!manager.stop(&id));
    manager.drain_and_shutdown(WAIT).await;
}

#[tokio::test]
async fn running_task_cancelled_with_requeue_runs_again() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut factories = factories();
    let counter = Arc::clone(&runs);
    factories
        .register_fn("wait_once", move |_, ctx| {
            Ok(Box::new(WaitOnce {
                ctx,
                runs: Arc::clone(&counter),
            }) as Box<dyn Executable>)
        })
        .unwrap();
    let manager = start(factories);
    let id = manager.start_task("wait_once", User::local(), TaskArguments::new()).unwrap();
    wait_executing(&manager, &id).await;

    assert!(manager.cancel(&id, true));
    wait_for(&manager, &id, TaskState::Done).await;

    let record = manager.get(&id).unwrap();
    assert_eq!(record.result, Some(json!("second run")));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(manager.executed_tasks(), 1);
    manager.drain_and_shutdown(WAIT).await;
}

#[tokio::test]
async fn cancel_with_requeue_keeps_a_queued_task_queued() {
    let manager = manager();
    let blocker = manager.start_task("wait", User::local(), TaskArguments::new()).unwrap();
    wait_executing(&manager, &blocker).await;
    let queued = manager.submit(User::local(), &Add { a: 1, b: 2 }).unwrap();

    assert!(manager.cancel(&queued, true));
    assert_eq!(manager.get(&queued).unwrap().state, TaskState::Queued);
    assert!(!manager.cancel(&TaskId::new("ghost"), true));

    assert!(manager.stop(&blocker));
    wait_for(&manager, &queued, TaskState::Done).await;
    manager.drain_and_shutdown(WAIT).await;
}

#[tokio::test]
async fn stop_all_cancels_only_the_owners_active_tasks() {
    let manager = manager();
    let alice = User::new("alice");
    let running = manager.start_task("wait", alice.clone(), TaskArguments::new()).unwrap();
    wait_executing(&manager, &running).await;
    let queued = manager.start_task("wait", alice.clone(), TaskArguments::new()).unwrap();
    let bobs = manager.start_task("wait", User::new("bob"), TaskArguments::new()).unwrap();

    let stopped = manager.stop_all(&alice);

    assert_eq!(stopped.len(), 2);
    assert_eq!(stopped.get(&running), Some(&true));
    assert_eq!(stopped.get(&queued), Some(&true));
    assert_eq!(manager.get(&queued).unwrap().state, TaskState::Cancelled);
    wait_for(&manager, &running, TaskState::Cancelled).await;

    // bob's task now runs; terminate asks it to stop
    wait_executing(&manager, &bobs).await;
    manager.terminate();
    let report = manager.drain_and_shutdown(WAIT).await;
    assert!(matches!(report.worker, WorkerExit::Finished(_)));
    assert_eq!(manager.get(&bobs).unwrap().state, TaskState::Cancelled);
}

#[tokio::test]
async fn list_filters_by_owner_and_type_pattern() {
    let manager = manager();
    manager.submit(User::new("alice"), &Add { a: 1, b: 1 }).unwrap();
    manager
        .start_task("explode", User::new("alice"), TaskArguments::new())
        .unwrap();
    manager.submit(User::new("bob"), &Add { a: 1, b: 1 }).unwrap();
    manager.drain_and_shutdown(WAIT).await;

    let pattern = Regex::new("^ad").unwrap();
    assert_eq!(manager.list(None, None).len(), 3);
    assert_eq!(manager.list(Some(&User::new("alice")), None).len(), 2);
    assert_eq!(manager.list(Some(&User::new("alice")), Some(&pattern)).len(), 1);

    let cleared = manager.clear_finished();
    assert_eq!(cleared.len(), 3);
    assert!(manager.list(None, None).is_empty());
}
