//! Ports - the seams to everything outside the engine.
//!
//! The index and the batch repository are external collaborators; the engine
//! only depends on these traits. `impls` has in-memory versions of both.

pub mod batch_repository;
pub mod clock;
pub mod id_generator;
pub mod index;
pub mod task_supplier;

pub use self::batch_repository::BatchSearchRepository;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::index::{Indexer, Scroll, ScrollSettings};
pub use self::task_supplier::TaskSupplier;
