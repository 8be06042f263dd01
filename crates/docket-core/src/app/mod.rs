//! App - engine wiring over the ports.
//!
//! # Components
//! - **WorkerLoop**: the single sequential consumer, generic over a `WorkSource`
//! - **TaskManager**: general tasks (registry, worker, stop, shutdown)
//! - **BatchSearchLoop**: batch searches keyed by id, state kept in the repository
//! - **BatchSearchRunner**: runs the queries of one batch
//! - **AppBuilder**: startup validation and wiring

pub mod batch_loop;
pub mod batch_runner;
pub mod builder;
pub mod cancel;
pub mod task_manager;
pub mod worker_loop;

pub use self::batch_loop::{BatchSearchLoop, BatchShutdownReport, BatchSource};
pub use self::batch_runner::{BATCH_ID_ARGUMENT, BATCH_SEARCH_TASK, BatchSearchRunner, register_batch_search};
pub use self::builder::{App, AppBuilder, AppShutdownReport};
pub use self::cancel::{CancelRequest, CancelSource, CancelToken, CancellationChannel};
pub use self::task_manager::{ShutdownReport, TaskManager, TaskRegistry, TaskSource};
pub use self::worker_loop::{Outcome, WorkSource, WorkerExit, WorkerHandle, WorkerLoop, WorkerState};
