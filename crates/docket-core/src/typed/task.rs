//! Task trait - ties a task type name to its argument struct.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task maps a task type name to a typed argument struct.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Reindex {
///     project: String,
/// }
///
/// impl Task for Reindex {
///     const TYPE: &'static str = "reindex";
/// }
/// ```
///
/// The struct is what the record's `arguments` map deserializes into at
/// dispatch time, and what `TaskManager::submit` serializes it from.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
