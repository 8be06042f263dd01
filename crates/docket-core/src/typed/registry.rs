//! FactoryRegistry - task type name to factory, filled at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Executable, FnFactory, Handler, TaskContext, TaskFactory, TypedHandler};
use super::task::Task;
use crate::domain::{TaskArguments, TaskType};
use crate::error::{EngineError, TaskError};

/// Explicit registry of every task type the worker can run.
///
/// # Example
/// ```ignore
/// let mut registry = FactoryRegistry::new();
/// registry.register::<Reindex, _>(ReindexHandler)?;
/// let factory = registry.resolve(&TaskType::new("reindex"))?;
/// ```
#[derive(Default, Clone)]
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn TaskFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T>>(&mut self, handler: H) -> Result<(), EngineError> {
        self.register_factory(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn register_fn<F>(&mut self, task_type: &str, build: F) -> Result<(), EngineError>
    where
        F: Fn(&TaskArguments, TaskContext) -> Result<Box<dyn Executable>, TaskError> + Send + Sync + 'static,
    {
        self.register_factory(Arc::new(FnFactory::new(task_type, build)))
    }

    pub fn register_factory(&mut self, factory: Arc<dyn TaskFactory>) -> Result<(), EngineError> {
        let task_type = factory.task_type().to_string();
        if self.factories.contains_key(&task_type) {
            return Err(EngineError::AlreadyRegistered(TaskType::new(task_type)));
        }
        self.factories.insert(task_type, factory);
        Ok(())
    }

    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn TaskFactory>, TaskError> {
        self.factories
            .get(task_type.as_str())
            .cloned()
            .ok_or_else(|| TaskError::UnknownTaskType(task_type.clone()))
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
