//! Batch runner settings: scroll sizing, keep-alive, throttle, deadline, cap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub const DEFAULT_SCROLL_SIZE: usize = 1000;
pub const MAX_BATCH_RESULT_SIZE: usize = 60_000;
pub const DEFAULT_SCROLL_KEEP_ALIVE: &str = "60s";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Pause between two queries, 0 = none.
    pub throttle_ms: u64,
    /// Whole-batch deadline.
    pub max_time_ms: Option<u64>,
    pub scroll_size: Option<usize>,
    /// Takes precedence over `scroll_size`.
    pub batch_scroll_size: Option<usize>,
    pub scroll_keep_alive: String,
    /// Batch-wide result cap.
    pub max_results: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            throttle_ms: 0,
            max_time_ms: None,
            scroll_size: None,
            batch_scroll_size: None,
            scroll_keep_alive: DEFAULT_SCROLL_KEEP_ALIVE.to_string(),
            max_results: MAX_BATCH_RESULT_SIZE,
        }
    }
}

impl BatchSettings {
    /// Millisecond precision; saturates at `u64::MAX` ms.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle_ms = millis(throttle);
        self
    }

    /// Millisecond precision; saturates at `u64::MAX` ms.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time_ms = Some(millis(max_time));
        self
    }

    pub fn with_scroll_size(mut self, size: usize) -> Self {
        self.scroll_size = Some(size);
        self
    }

    pub fn with_batch_scroll_size(mut self, size: usize) -> Self {
        self.batch_scroll_size = Some(size);
        self
    }

    pub fn with_scroll_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.scroll_keep_alive = keep_alive.into();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn max_time(&self) -> Option<Duration> {
        self.max_time_ms.map(Duration::from_millis)
    }

    /// Effective page size. Zero is rejected whichever setting it came from.
    pub fn page_size(&self) -> Result<usize, SearchError> {
        let size = self
            .batch_scroll_size
            .or(self.scroll_size)
            .unwrap_or(DEFAULT_SCROLL_SIZE);
        if size == 0 {
            return Err(SearchError::ScrollConfiguration(
                "[size] cannot be [0] in a scroll context".to_string(),
            ));
        }
        Ok(size)
    }

    pub fn keep_alive(&self) -> Result<Duration, SearchError> {
        parse_time_value(&self.scroll_keep_alive).ok_or_else(|| {
            SearchError::ScrollConfiguration(format!(
                "failed to parse setting [scroll] with value [{}] as a time value: unit is missing or unrecognized",
                self.scroll_keep_alive
            ))
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse `"60s"`, `"1m"`, `"500ms"`, `"2h"`, `"1d"`, `"10micros"`, `"5nanos"`.
pub fn parse_time_value(value: &str) -> Option<Duration> {
    let value = value.trim().to_ascii_lowercase();
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit.trim() {
        "nanos" => Duration::from_nanos(amount),
        "micros" => Duration::from_micros(amount),
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60)?),
        "h" => Duration::from_secs(amount.checked_mul(3600)?),
        "d" => Duration::from_secs(amount.checked_mul(86_400)?),
        _ => return None,
    };
    Some(duration)
}
