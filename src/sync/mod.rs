pub mod syncer;

use std::future::Future;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use syncer::SyncEngine;

/// Options controlling a pull.
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Per-issue worklog fetches allowed in flight at once.
    pub fetch_concurrency: usize,
    /// Page size for issue discovery.
    pub page_size: u32,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 1,
            page_size: crate::jira::config::DEFAULT_PAGE_SIZE,
        }
    }
}

/// One issue, or one worklog on an issue, that could not be pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueFailure {
    pub issue_key: String,
    pub worklog_id: Option<String>,
    pub error: String,
}

/// Report returned after a pull completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub issues_total: usize,
    /// Local entries created by this pull.
    pub created: u64,
    /// Worklogs already represented locally.
    pub duplicates: u64,
    /// Worklogs ignored: outside the window or zero duration.
    pub skipped: u64,
    pub failures: Vec<IssueFailure>,
    pub error: Option<String>,
}

impl SyncReport {
    /// Build a report whose status is derived from the counts.
    pub fn from_counts(
        issues_total: usize,
        created: u64,
        duplicates: u64,
        skipped: u64,
        failures: Vec<IssueFailure>,
    ) -> Self {
        let issues_failed = failures
            .iter()
            .filter(|f| f.worklog_id.is_none())
            .count();
        let status = if failures.is_empty() {
            SyncStatus::Success
        } else if issues_failed < issues_total || created > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        let error = if failures.is_empty() {
            None
        } else {
            Some(format!("{} failures", failures.len()))
        };
        Self {
            status,
            issues_total,
            created,
            duplicates,
            skipped,
            failures,
            error,
        }
    }

    /// Mark the report as stopped by `error`, keeping the counts gathered
    /// so far.
    pub fn aborted(mut self, error: &Error) -> Self {
        self.status = SyncStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    /// Mark the report as interrupted, keeping the counts gathered so far.
    pub fn cancelled(mut self) -> Self {
        self.status = SyncStatus::Cancelled;
        self.error = Some(Error::Cancelled.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}

impl SyncStatus {
    /// Value stored in `sync_jobs.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "completed",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

/// Callbacks for reporting progress during a pull.
pub trait SyncProgress: Send + Sync {
    fn on_issues_discovered(&self, _count: usize) {}
    fn on_issue_fetched(&self, _issue_key: &str, _worklogs: usize) {}
    fn on_entry_created(&self, _issue_key: &str, _worklog_id: &str) {}
    fn on_issue_failed(&self, _issue_key: &str, _error: &Error) {}
}

/// A no-op progress reporter.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => out,
    }
}
