//! docket-core
//!
//! A queue-driven task execution engine and its batch-search workload.
//!
//! # Modules
//! - **domain**: task records, batch searches, documents, ids
//! - **queue**: the FIFO work queue with a POISON sentinel
//! - **ports**: collaborator traits (TaskSupplier, Indexer, BatchSearchRepository, Clock, IdGenerator)
//! - **typed**: the `Task` / `Handler` API and the factory registry
//! - **search**: query model, free-text parser, batch settings
//! - **app**: worker loop, task manager, batch loop, batch runner, builder
//! - **impls**: in-memory index and repository
//! - **config**: layered `EngineConfig`
//! - **error**: error enums
//! - **observability**: status counts

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod search;
pub mod typed;

pub use app::{App, AppBuilder, BatchSearchLoop, BatchSearchRunner, TaskManager, TaskRegistry};
pub use config::EngineConfig;
pub use error::{EngineError, SearchError, SearchFailure, TaskError};
