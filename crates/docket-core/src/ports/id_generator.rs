//! IdGenerator port - engine-assigned ids.
//!
//! # Implementations
//! - **UlidGenerator**: ULID based, timestamp taken from a `Clock`

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{BatchId, TaskId};
use crate::ports::Clock;

/// IdGenerator mints ids for records the caller did not name.
///
/// # ULID properties
/// - sortable by creation time
/// - no coordination needed between producers
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_batch_id(&self) -> BatchId;
}

/// ULID generator whose timestamp part comes from the clock, so a `FixedClock`
/// gives ids with a deterministic prefix.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next())
    }

    fn generate_batch_id(&self) -> BatchId {
        BatchId::from_ulid(self.next())
    }
}
