pub mod dataset;
pub mod department;
pub mod scheduler;

pub use dataset::{CrawlReport, TermDataset, course_key};
pub use department::{DepartmentCrawl, DepartmentOutput};
pub use scheduler::CrawlScheduler;

use crate::compass::RetryPolicy;
use std::fmt;

/// Knobs of a term crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Departments crawled at once.
    pub concurrency: usize,
    /// Faculty lookups in flight per department.
    pub faculty_concurrency: usize,
    /// Attempts per department before it is abandoned.
    pub department_retries: u32,
    /// Backoff between department attempts.
    pub retry: RetryPolicy,
    pub fetch_course_descriptions: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            concurrency: 7,
            faculty_concurrency: 4,
            department_retries: 10,
            retry: RetryPolicy::default(),
            fetch_course_descriptions: false,
        }
    }
}

/// Where a department is in its crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartmentState {
    Pending,
    Fetching,
    Hydrating,
    Merged,
    Failed { attempt: u32 },
    Abandoned,
}

impl fmt::Display for DepartmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepartmentState::Pending => write!(f, "pending"),
            DepartmentState::Fetching => write!(f, "fetching"),
            DepartmentState::Hydrating => write!(f, "hydrating"),
            DepartmentState::Merged => write!(f, "merged"),
            DepartmentState::Failed { attempt } => write!(f, "failed (attempt {attempt})"),
            DepartmentState::Abandoned => write!(f, "abandoned"),
        }
    }
}
