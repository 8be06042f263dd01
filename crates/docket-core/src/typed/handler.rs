//! Handlers, executables and the factories the worker resolves them through.
//!
//! # Two layers
//! - **Typed**: `Handler<T>` receives the deserialized `T: Task`
//! - **Dyn**: `TaskFactory` is object-safe; `TypedHandler<T, H>` erases a
//!   handler into one so the registry can store every type in one map

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::task::Task;
use crate::app::cancel::CancelToken;
use crate::domain::{TaskArguments, TaskId, TaskType, User};
use crate::error::TaskError;

/// One runnable unit of work, built per dispatch and consumed by running it.
#[async_trait]
pub trait Executable: Send {
    async fn call(self: Box<Self>) -> Result<Value, TaskError>;

    /// Units that poll their `CancelToken` say so, and only those are
    /// registered in the cancellation channel.
    fn is_cancellable(&self) -> bool {
        false
    }
}

/// Progress callback bound to one task id.
#[derive(Clone)]
pub struct Progress {
    report: Arc<dyn Fn(f64) + Send + Sync>,
}

impl Progress {
    pub fn new(report: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, rate: f64) {
        (self.report)(rate)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Progress")
    }
}

/// What a unit gets besides its arguments.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub owner: User,
    pub progress: Progress,
    pub cancel: CancelToken,
}

/// Handler runs one typed task.
///
/// ```ignore
/// struct ReindexHandler;
///
/// #[async_trait]
/// impl Handler<Reindex> for ReindexHandler {
///     async fn handle(&self, task: Reindex, ctx: TaskContext) -> Result<Value, TaskError> {
///         ctx.progress.report(0.5);
///         Ok(json!(task.project))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync + 'static {
    async fn handle(&self, task: T, ctx: TaskContext) -> Result<Value, TaskError>;

    fn is_cancellable(&self) -> bool {
        false
    }
}

/// Object-safe constructor of executables for one task type.
pub trait TaskFactory: Send + Sync {
    fn create(&self, arguments: &TaskArguments, ctx: TaskContext) -> Result<Box<dyn Executable>, TaskError>;

    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: Arc<H>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<T: Task, H: Handler<T>> TaskFactory for TypedHandler<T, H> {
    fn create(&self, arguments: &TaskArguments, ctx: TaskContext) -> Result<Box<dyn Executable>, TaskError> {
        let object = arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        let task: T = serde_json::from_value(Value::Object(object)).map_err(|e| TaskError::InvalidArguments {
            task_type: TaskType::new(T::TYPE),
            reason: e.to_string(),
        })?;
        Ok(Box::new(HandlerCall {
            handler: Arc::clone(&self.handler),
            task,
            ctx,
        }))
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

struct HandlerCall<T: Task, H: Handler<T>> {
    handler: Arc<H>,
    task: T,
    ctx: TaskContext,
}

#[async_trait]
impl<T: Task, H: Handler<T>> Executable for HandlerCall<T, H> {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        let HandlerCall { handler, task, ctx } = *self;
        handler.handle(task, ctx).await
    }

    fn is_cancellable(&self) -> bool {
        self.handler.is_cancellable()
    }
}

type BuildFn = dyn Fn(&TaskArguments, TaskContext) -> Result<Box<dyn Executable>, TaskError> + Send + Sync;

/// Factory from a closure, for task types whose executables need shared
/// collaborators (index, repository) rather than a typed argument struct.
pub struct FnFactory {
    task_type: String,
    build: Box<BuildFn>,
}

impl FnFactory {
    pub fn new<F>(task_type: impl Into<String>, build: F) -> Self
    where
        F: Fn(&TaskArguments, TaskContext) -> Result<Box<dyn Executable>, TaskError> + Send + Sync + 'static,
    {
        Self {
            task_type: task_type.into(),
            build: Box::new(build),
        }
    }
}

impl TaskFactory for FnFactory {
    fn create(&self, arguments: &TaskArguments, ctx: TaskContext) -> Result<Box<dyn Executable>, TaskError> {
        (self.build)(arguments, ctx)
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }
}
