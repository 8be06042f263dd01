//! Search model: structured queries, the free-text syntax, query building for a
//! batch and runner settings.

pub mod analysis;
pub mod builder;
pub mod query;
pub mod query_string;
pub mod settings;

pub use builder::build_query;
pub use query::{BoolQuery, Query};
pub use query_string::TextQuery;
pub use settings::{BatchSettings, DEFAULT_SCROLL_SIZE, MAX_BATCH_RESULT_SIZE};
