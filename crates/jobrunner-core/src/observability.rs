use serde::{Deserialize, Serialize};

use crate::domain::JobStatus;

/// Per-status record counts, for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub retrying: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: JobStatus, n: u64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Running => &mut self.running,
            JobStatus::Retrying => &mut self.retrying,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Cancelled => &mut self.cancelled,
            JobStatus::Failed => &mut self.failed,
        };
        *slot += n;
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Retrying => self.retrying,
            JobStatus::Completed => self.completed,
            JobStatus::Cancelled => self.cancelled,
            JobStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        JobStatus::ALL.into_iter().map(|s| self.get(s)).sum()
    }

    /// Records that have not reached a terminal status yet.
    pub fn active(&self) -> u64 {
        self.pending + self.running + self.retrying
    }
}
