//! Impls - in-memory implementations of the ports.
//!
//! # Included
//! - **MemoryIndex**: `Indexer` evaluating queries over documents in memory
//! - **InMemoryBatchRepository**: `BatchSearchRepository` backed by vectors
//!
//! Production backends (search cluster, SQL store) live outside this crate.

pub mod memory_index;
pub mod memory_repository;

pub use self::memory_index::MemoryIndex;
pub use self::memory_repository::InMemoryBatchRepository;
