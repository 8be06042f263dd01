use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub created: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    /// Entries waiting in the queue (may include stale ids of removed tasks).
    pub pending: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Created => self.created += 1,
            TaskState::Queued => self.queued += 1,
            TaskState::Running => self.running += 1,
            TaskState::Done => self.done += 1,
            TaskState::Error => self.error += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.queued + self.running + self.done + self.error + self.cancelled
    }

    pub fn terminal(&self) -> usize {
        self.done + self.error + self.cancelled
    }
}

impl FromIterator<TaskState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = TaskCounts::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_group_states() {
        let counts: TaskCounts = [TaskState::Done, TaskState::Error, TaskState::Queued, TaskState::Done]
            .into_iter()
            .collect();
        assert_eq!(counts.done, 2);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.terminal(), 3);
    }
}
