//! Read-side query shapes used by status reporters.

use serde::{Deserialize, Serialize};

use super::{JobRecord, JobStatus};

/// Optional filters for `JobStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<i32>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            priority: None,
        }
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        self.status.is_none_or(|s| s == record.status)
            && self.priority.is_none_or(|p| p == record.priority)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub per_page: u32,
}

impl Page {
    pub const DEFAULT_PER_PAGE: u32 = 10;

    /// Page numbers below 1 are clamped to 1, `per_page` to at least 1.
    pub fn new(number: u32, per_page: u32) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PER_PAGE)
    }
}

/// One page of records plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<JobRecord>,
    pub total: u64,
    pub page: Page,
}

impl JobPage {
    pub fn last_page(&self) -> u32 {
        let pages = self.total.div_ceil(u64::from(self.page.per_page));
        u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
    }
}
