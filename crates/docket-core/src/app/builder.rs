//! AppBuilder - wires factories, collaborators and config into a running App.
//!
//! Startup validation is fail-fast: every task type named in
//! `expect_tasks()` must be registered before `build()` spawns anything.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::batch_loop::{BatchSearchLoop, BatchShutdownReport};
use super::batch_runner::register_batch_search;
use super::task_manager::{ShutdownReport, TaskManager};
use crate::config::EngineConfig;
use crate::domain::TaskArguments;
use crate::error::{EngineError, TaskError};
use crate::ports::{BatchSearchRepository, Indexer};
use crate::typed::{Executable, FactoryRegistry, Handler, Task, TaskContext};

/// # Example
/// ```ignore
/// let app = AppBuilder::new()
///     .with_config(EngineConfig::load(None)?)
///     .register::<Reindex, _>(ReindexHandler)?
///     .with_batch_search(index, repository)?
///     .expect_tasks(&["reindex", "batch_search"])
///     .build()?;
/// ```
pub struct AppBuilder {
    config: EngineConfig,
    factories: FactoryRegistry,
    expected_tasks: Option<Vec<String>>,
    batch_search: Option<(Arc<dyn Indexer>, Arc<dyn BatchSearchRepository>)>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            factories: FactoryRegistry::new(),
            expected_tasks: None,
            batch_search: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<T: Task, H: Handler<T>>(mut self, handler: H) -> Result<Self, EngineError> {
        self.factories.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<F>(mut self, task_type: &str, build: F) -> Result<Self, EngineError>
    where
        F: Fn(&TaskArguments, TaskContext) -> Result<Box<dyn Executable>, TaskError> + Send + Sync + 'static,
    {
        self.factories.register_fn(task_type, build)?;
        Ok(self)
    }

    /// Enable the batch dispatch loop and the `batch_search` task type.
    pub fn with_batch_search(
        mut self,
        indexer: Arc<dyn Indexer>,
        repository: Arc<dyn BatchSearchRepository>,
    ) -> Result<Self, EngineError> {
        register_batch_search(
            &mut self.factories,
            Arc::clone(&indexer),
            Arc::clone(&repository),
            self.config.batch.clone(),
        )?;
        self.batch_search = Some((indexer, repository));
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Validate, then spawn the workers on the current tokio runtime.
    pub fn build(self) -> Result<App, EngineError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.factories.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::MissingTaskTypes(missing));
            }
        }
        info!(task_types = ?self.factories.registered_types(), "starting engine");

        let batches = self.batch_search.map(|(indexer, repository)| {
            BatchSearchLoop::start(repository, indexer, self.config.batch.clone(), &self.config.worker)
        });
        let tasks = TaskManager::start(self.factories, &self.config.worker);
        Ok(App {
            tasks,
            batches,
            config: self.config,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The running engine: the general task manager and, when enabled, the batch loop.
pub struct App {
    pub tasks: TaskManager,
    pub batches: Option<BatchSearchLoop>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppShutdownReport {
    pub tasks: ShutdownReport,
    pub batches: Option<BatchShutdownReport>,
}

impl App {
    /// Stop both workers after their current unit.
    pub fn terminate(&self) {
        self.tasks.terminate();
        if let Some(batches) = &self.batches {
            batches.terminate();
        }
    }

    /// Drain both queues using the configured shutdown timeout.
    pub async fn shutdown(&self) -> AppShutdownReport {
        self.shutdown_within(self.config.worker.shutdown_timeout()).await
    }

    /// Drain both loops concurrently, each for at most `timeout`.
    pub async fn shutdown_within(&self, timeout: Duration) -> AppShutdownReport {
        let batches = async {
            match &self.batches {
                Some(batches) => Some(batches.drain_and_shutdown(timeout).await),
                None => None,
            }
        };
        let (tasks, batches) = tokio::join!(self.tasks.drain_and_shutdown(timeout), batches);
        AppShutdownReport { tasks, batches }
    }
}
