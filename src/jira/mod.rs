//! Jira worklog integration: configuration, wire format, HTTP client and
//! issue discovery.

pub mod client;
pub mod config;
pub mod discovery;
pub mod rate_limiter;
pub mod wire;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::model::{RemoteWorklog, RemoteWorklogDraft};

pub use client::JiraClient;
pub use config::{JiraAuth, JiraConfig};
pub use discovery::{discover_issues_in_window, Discovery, IssueDiscovery};

/// The tracker operations the sync engine relies on.
#[async_trait]
pub trait WorklogRemote: Send + Sync {
    /// All worklogs on one issue. Records that fail to decode are returned
    /// separately so one bad record doesn't sink the issue.
    async fn fetch_worklogs(&self, issue_key: &str) -> Result<FetchedWorklogs>;

    /// One page of an issue search. `page_token` is the previous page's
    /// continuation token, `None` for the first page.
    async fn search_issues_page(&self, query: &IssueQuery, page_token: Option<&str>)
        -> Result<IssuePage>;

    /// Create a worklog and return its remote id.
    async fn create_worklog(&self, draft: &RemoteWorklogDraft) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct FetchedWorklogs {
    pub worklogs: Vec<RemoteWorklog>,
    pub malformed: Vec<MalformedWorklog>,
}

/// A worklog record the client could not decode.
#[derive(Debug)]
pub struct MalformedWorklog {
    pub worklog_id: Option<String>,
    pub error: Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueQuery {
    pub jql: String,
    pub page_size: u32,
}

impl IssueQuery {
    /// Issues assigned to the credential holder with work logged between
    /// `start` and `end`, both inclusive.
    pub fn worklogs_between(start: NaiveDate, end: NaiveDate, page_size: u32) -> Self {
        Self {
            jql: format!(
                "worklogDate >= '{}' AND worklogDate <= '{}' AND assignee = currentUser() ORDER BY updated DESC",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d"),
            ),
            page_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuePage {
    pub issue_keys: Vec<String>,
    /// Absent or empty means this was the last page.
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_query_jql() {
        let q = IssueQuery::worklogs_between(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            25,
        );
        assert_eq!(
            q.jql,
            "worklogDate >= '2024-01-01' AND worklogDate <= '2024-01-31' AND assignee = currentUser() ORDER BY updated DESC"
        );
        assert_eq!(q.page_size, 25);
    }
}
