//! In-memory tracker used by engine and discovery tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::date_util::parse_remote_instant;
use crate::error::{Error, Result};
use crate::jira::{FetchedWorklogs, IssuePage, IssueQuery, MalformedWorklog, WorklogRemote};
use crate::model::{Comment, Document, RemoteWorklog, RemoteWorklogDraft};

pub fn worklog(id: &str, issue: &str, seconds: i64, started: &str, text: &str) -> RemoteWorklog {
    RemoteWorklog {
        id: id.into(),
        issue_key: issue.into(),
        duration_seconds: seconds,
        started: parse_remote_instant(started).unwrap(),
        comment: Comment::Document(Document::from_text(text)),
        author: None,
    }
}

#[derive(Default)]
pub struct FakeRemote {
    worklogs: Mutex<HashMap<String, Vec<RemoteWorklog>>>,
    malformed: Mutex<HashMap<String, Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    pages: Vec<IssuePage>,
    search_fails_at: Option<usize>,
    cancel_after_pages: Option<(usize, CancellationToken)>,
    cancel_on_fetch: Option<(String, CancellationToken)>,
    next_id: AtomicU64,
    pub search_tokens: Mutex<Vec<Option<String>>>,
    pub fetched: Mutex<Vec<String>>,
    pub created: Mutex<Vec<RemoteWorklogDraft>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(20_000),
            ..Default::default()
        }
    }

    pub fn with_worklogs(self, issue: &str, worklogs: Vec<RemoteWorklog>) -> Self {
        self.worklogs
            .lock()
            .unwrap()
            .entry(issue.to_string())
            .or_default()
            .extend(worklogs);
        self
    }

    pub fn with_malformed(self, issue: &str, worklog_id: &str) -> Self {
        self.malformed
            .lock()
            .unwrap()
            .entry(issue.to_string())
            .or_default()
            .push(worklog_id.to_string());
        self
    }

    /// Fetching this issue fails with a transport error.
    pub fn with_failing_issue(self, issue: &str) -> Self {
        self.failing.lock().unwrap().insert(issue.to_string());
        self
    }

    /// Search results served page by page, chained with tokens `tok-1`, `tok-2`...
    pub fn with_pages(mut self, pages: Vec<Vec<&str>>) -> Self {
        let count = pages.len();
        self.pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, keys)| IssuePage {
                issue_keys: keys.into_iter().map(String::from).collect(),
                next_page_token: (i + 1 < count).then(|| format!("tok-{}", i + 1)),
            })
            .collect();
        self
    }

    /// Search results exactly as given, tokens included.
    pub fn with_raw_pages(mut self, pages: Vec<IssuePage>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_search_failure_at(mut self, page: usize) -> Self {
        self.search_fails_at = Some(page);
        self
    }

    /// Cancel `token` once `pages` search pages have been served.
    pub fn cancelling_after_pages(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after_pages = Some((pages, token));
        self
    }

    /// Cancel `token` as soon as `issue` has been fetched.
    pub fn cancelling_on_fetch(mut self, issue: &str, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some((issue.to_string(), token));
        self
    }

    pub fn add_worklog(&self, worklog: RemoteWorklog) {
        self.worklogs
            .lock()
            .unwrap()
            .entry(worklog.issue_key.clone())
            .or_default()
            .push(worklog);
    }

    pub fn search_calls(&self) -> usize {
        self.search_tokens.lock().unwrap().len()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

fn page_index(token: Option<&str>) -> Option<usize> {
    match token {
        None => Some(0),
        Some(t) => t.strip_prefix("tok-")?.parse().ok(),
    }
}

#[async_trait]
impl WorklogRemote for FakeRemote {
    async fn fetch_worklogs(&self, issue_key: &str) -> Result<FetchedWorklogs> {
        self.fetched.lock().unwrap().push(issue_key.to_string());
        if let Some((issue, token)) = &self.cancel_on_fetch {
            if issue == issue_key {
                token.cancel();
            }
        }
        if self.failing.lock().unwrap().contains(issue_key) {
            return Err(Error::RemoteTransport("connection reset by peer".into()));
        }
        let worklogs = self
            .worklogs
            .lock()
            .unwrap()
            .get(issue_key)
            .cloned()
            .unwrap_or_default();
        let malformed = self
            .malformed
            .lock()
            .unwrap()
            .get(issue_key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|id| MalformedWorklog {
                worklog_id: Some(id),
                error: Error::TimestampParse {
                    value: "not a time".into(),
                },
            })
            .collect();
        Ok(FetchedWorklogs {
            worklogs,
            malformed,
        })
    }

    async fn search_issues_page(
        &self,
        _query: &IssueQuery,
        page_token: Option<&str>,
    ) -> Result<IssuePage> {
        self.search_tokens
            .lock()
            .unwrap()
            .push(page_token.map(String::from));
        let index = page_index(page_token)
            .ok_or_else(|| Error::RemoteApi {
                status: 400,
                body: format!("bad token {page_token:?}"),
            })?;
        if self.search_fails_at == Some(index) {
            return Err(Error::RemoteApi {
                status: 500,
                body: "search exploded".into(),
            });
        }
        let page = self.pages.get(index).cloned().unwrap_or_default();
        if let Some((after, token)) = &self.cancel_after_pages {
            if index + 1 >= *after {
                token.cancel();
            }
        }
        Ok(page)
    }

    async fn create_worklog(&self, draft: &RemoteWorklogDraft) -> Result<String> {
        if self.failing.lock().unwrap().contains(&draft.issue_key) {
            return Err(Error::RemoteApi {
                status: 403,
                body: "not allowed".into(),
            });
        }
        self.created.lock().unwrap().push(draft.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }
}
