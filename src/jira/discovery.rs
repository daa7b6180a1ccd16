//! Continuation-token issue search.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::jira::{IssueQuery, WorklogRemote};
use crate::model::SyncWindow;
use crate::sync::cancellable;

/// Pages through an issue search one request at a time.
///
/// The pager is finite and cannot be rewound: it ends when the server stops
/// returning a continuation token, and after an error it yields nothing more.
pub struct IssueDiscovery<'a> {
    remote: &'a dyn WorklogRemote,
    query: IssueQuery,
    next_token: Option<String>,
    finished: bool,
    pages_fetched: usize,
}

impl<'a> IssueDiscovery<'a> {
    pub fn new(remote: &'a dyn WorklogRemote, query: IssueQuery) -> Self {
        Self {
            remote,
            query,
            next_token: None,
            finished: false,
            pages_fetched: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page of issue keys, or `None` once exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        if self.finished {
            return Ok(None);
        }
        let page = match self
            .remote
            .search_issues_page(&self.query, self.next_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        self.pages_fetched += 1;
        self.next_token = page.next_page_token.filter(|t| !t.is_empty());
        if self.next_token.is_none() {
            self.finished = true;
        }
        log::debug!(
            "Search page {} returned {} issues",
            self.pages_fetched,
            page.issue_keys.len()
        );
        Ok(Some(page.issue_keys))
    }
}

/// Outcome of a discovery run: every key seen, in first-seen order, plus the
/// error that stopped the run early, if any.
#[derive(Debug, Default)]
pub struct Discovery {
    pub issue_keys: Vec<String>,
    pub interrupted: Option<Error>,
}

/// Find issues carrying worklogs inside `window`, walking every page.
/// Cancellation is checked before each page request.
pub async fn discover_issues_in_window(
    remote: &dyn WorklogRemote,
    window: &SyncWindow,
    page_size: u32,
    cancel: &CancellationToken,
) -> Discovery {
    let query = IssueQuery::worklogs_between(window.start, window.end, page_size);
    let mut pager = IssueDiscovery::new(remote, query);
    let mut seen = HashSet::new();
    let mut discovery = Discovery::default();

    loop {
        if cancel.is_cancelled() {
            discovery.interrupted = Some(Error::Cancelled);
            break;
        }
        match cancellable(cancel, pager.next_page()).await {
            Ok(Some(keys)) => {
                for key in keys {
                    if seen.insert(key.clone()) {
                        discovery.issue_keys.push(key);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                discovery.interrupted = Some(e);
                break;
            }
        }
    }

    log::debug!(
        "Discovered {} issues across {} pages",
        discovery.issue_keys.len(),
        pager.pages_fetched()
    );
    discovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::IssuePage;
    use crate::test_support::FakeRemote;
    use chrono::NaiveDate;

    fn window() -> SyncWindow {
        SyncWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_walks_every_page_passing_tokens() {
        let remote = FakeRemote::new().with_pages(vec![
            vec!["ABC-1", "ABC-2"],
            vec!["ABC-3"],
            vec!["ABC-4", "ABC-5"],
        ]);
        let found = discover_issues_in_window(&remote, &window(), 2, &CancellationToken::new()).await;

        assert!(found.interrupted.is_none());
        assert_eq!(found.issue_keys, vec!["ABC-1", "ABC-2", "ABC-3", "ABC-4", "ABC-5"]);
        assert_eq!(
            *remote.search_tokens.lock().unwrap(),
            vec![None, Some("tok-1".to_string()), Some("tok-2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_token_ends_the_search() {
        let remote = FakeRemote::new().with_raw_pages(vec![
            IssuePage {
                issue_keys: vec!["ABC-1".into()],
                next_page_token: Some(String::new()),
            },
            IssuePage {
                issue_keys: vec!["NEVER-1".into()],
                next_page_token: None,
            },
        ]);
        let found = discover_issues_in_window(&remote, &window(), 50, &CancellationToken::new()).await;
        assert_eq!(found.issue_keys, vec!["ABC-1"]);
        assert_eq!(remote.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_results_is_not_an_error() {
        let remote = FakeRemote::new();
        let found = discover_issues_in_window(&remote, &window(), 50, &CancellationToken::new()).await;
        assert!(found.issue_keys.is_empty());
        assert!(found.interrupted.is_none());
    }

    #[tokio::test]
    async fn test_keys_repeated_across_pages_are_kept_once() {
        let remote = FakeRemote::new().with_pages(vec![vec!["ABC-1", "ABC-2"], vec!["ABC-2", "ABC-3"]]);
        let found = discover_issues_in_window(&remote, &window(), 2, &CancellationToken::new()).await;
        assert_eq!(found.issue_keys, vec!["ABC-1", "ABC-2", "ABC-3"]);
    }

    #[tokio::test]
    async fn test_error_keeps_keys_gathered_so_far() {
        let remote = FakeRemote::new()
            .with_pages(vec![vec!["ABC-1"], vec!["ABC-2"], vec!["ABC-3"]])
            .with_search_failure_at(1);
        let found = discover_issues_in_window(&remote, &window(), 1, &CancellationToken::new()).await;
        assert_eq!(found.issue_keys, vec!["ABC-1"]);
        assert!(matches!(found.interrupted, Some(Error::RemoteApi { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_cancellation_between_pages() {
        let cancel = CancellationToken::new();
        let remote = FakeRemote::new()
            .with_pages(vec![vec!["ABC-1"], vec!["ABC-2"], vec!["ABC-3"]])
            .cancelling_after_pages(2, cancel.clone());
        let found = discover_issues_in_window(&remote, &window(), 1, &cancel).await;

        assert_eq!(found.issue_keys, vec!["ABC-1", "ABC-2"]);
        assert!(matches!(found.interrupted, Some(Error::Cancelled)));
        assert_eq!(remote.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_pager_is_not_restartable() {
        let remote = FakeRemote::new().with_pages(vec![vec!["ABC-1"]]);
        let query = IssueQuery::worklogs_between(window().start, window().end, 10);
        let mut pager = IssueDiscovery::new(&remote, query);

        assert_eq!(pager.next_page().await.unwrap(), Some(vec!["ABC-1".to_string()]));
        assert!(pager.is_finished());
        assert_eq!(pager.next_page().await.unwrap(), None);
        assert_eq!(remote.search_calls(), 1);
    }
}
