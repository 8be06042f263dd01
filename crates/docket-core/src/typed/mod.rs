//! Typed - task types, handlers and the factory registry.
//!
//! # Two layers
//! - **Typed**: `Task` + `Handler<T>`; the type name lives on the argument struct
//! - **Dyn**: `TaskFactory` + `Executable`; what the worker resolves and runs

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{Executable, FnFactory, Handler, Progress, TaskContext, TaskFactory, TypedHandler};
pub use self::registry::FactoryRegistry;
pub use self::task::Task;
