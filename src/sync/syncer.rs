use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::jira::{discover_issues_in_window, FetchedWorklogs, WorklogRemote};
use crate::mapper;
use crate::model::{SyncWindow, TimeEntry};
use crate::storage::TimeEntryStore;
use crate::sync::{cancellable, IssueFailure, PullOptions, SyncProgress, SyncReport};

/// Reconciles local time entries with tracker worklogs.
///
/// The remote is optional: without credentials every operation fails with
/// `Error::Config` before touching the network or the store.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn TimeEntryStore>,
    remote: Option<Arc<dyn WorklogRemote>>,
    options: PullOptions,
}

/// Running counts for one pull.
#[derive(Default)]
struct Tally {
    created: u64,
    duplicates: u64,
    skipped: u64,
    failures: Vec<IssueFailure>,
}

impl Tally {
    fn into_report(self, issues_total: usize) -> SyncReport {
        SyncReport::from_counts(
            issues_total,
            self.created,
            self.duplicates,
            self.skipped,
            self.failures,
        )
    }
}

impl SyncEngine {
    pub fn new(store: Arc<dyn TimeEntryStore>, remote: Option<Arc<dyn WorklogRemote>>) -> Self {
        Self {
            store,
            remote,
            options: PullOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PullOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    fn remote(&self) -> Result<&dyn WorklogRemote> {
        self.remote
            .as_deref()
            .ok_or_else(|| Error::Config("Jira integration is not configured".into()))
    }

    /// Import every worklog started inside `window` that isn't already
    /// represented locally.
    ///
    /// Uses `window.issue_keys` when given, otherwise discovers the issues.
    /// A failed fetch for one issue is recorded in the report and the pull
    /// moves on. A storage failure stops the pull and comes back as a
    /// `Failed` report holding the counts so far. A failed discovery is
    /// returned as the error.
    pub async fn pull_by_window(
        &self,
        owner_id: &str,
        window: &SyncWindow,
        progress: &dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let remote = self.remote()?;

        let issue_keys = if window.issue_keys.is_empty() {
            let discovery =
                discover_issues_in_window(remote, window, self.options.page_size, cancel).await;
            match discovery.interrupted {
                None => discovery.issue_keys,
                Some(Error::Cancelled) => {
                    log::info!(
                        "Pull for {owner_id} cancelled during discovery ({} issues found)",
                        discovery.issue_keys.len()
                    );
                    return Ok(Tally::default()
                        .into_report(discovery.issue_keys.len())
                        .cancelled());
                }
                Some(e) => return Err(e),
            }
        } else {
            let mut seen = HashSet::new();
            window
                .issue_keys
                .iter()
                .filter(|k| seen.insert(k.as_str()))
                .cloned()
                .collect()
        };

        progress.on_issues_discovered(issue_keys.len());
        log::info!(
            "Pulling worklogs for {owner_id} from {} issues between {} and {}",
            issue_keys.len(),
            window.start,
            window.end
        );
        self.pull_issues(owner_id, remote, &issue_keys, window, progress, cancel)
            .await
    }

    /// Import every worklog on one issue, with no date filter. A failed
    /// fetch is returned as the error; a storage failure gives a `Failed`
    /// report.
    pub async fn pull_for_issue(
        &self,
        owner_id: &str,
        issue_key: &str,
        progress: &dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let remote = self.remote()?;
        let mut known = self.known_worklog_ids(owner_id).await?;

        let fetched = cancellable(cancel, remote.fetch_worklogs(issue_key)).await?;
        let mut tally = Tally::default();
        let applied = self
            .apply_fetched(owner_id, issue_key, fetched, None, &mut known, &mut tally, progress)
            .await;

        let report = tally.into_report(1);
        log::info!(
            "Pulled {issue_key} for {owner_id}: {} created, {} already present",
            report.created,
            report.duplicates
        );
        match applied {
            Ok(()) => Ok(report),
            Err(e) => {
                log::error!("Pull of {issue_key} for {owner_id} stopped: {e}");
                Ok(report.aborted(&e))
            }
        }
    }

    /// Create a tracker worklog from a local entry and record its id.
    ///
    /// `issue_key`, when given, replaces the entry's own key. Nothing is
    /// written locally unless the tracker accepted the worklog.
    pub async fn push_entry(
        &self,
        mut entry: TimeEntry,
        issue_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TimeEntry> {
        let remote = self.remote()?;

        if let Some(worklog_id) = &entry.external_worklog_id {
            return Err(Error::InvalidEntry(format!(
                "entry {} was already pushed as worklog {worklog_id}",
                entry.id
            )));
        }
        if let Some(key) = issue_key {
            entry.external_issue_key = Some(key.to_string());
        }

        let draft = mapper::local_to_remote(&entry)?;
        if draft.duration_seconds <= 0 {
            return Err(Error::InvalidEntry(format!(
                "entry {} rounds to {} seconds",
                entry.id, draft.duration_seconds
            )));
        }

        let worklog_id = cancellable(cancel, remote.create_worklog(&draft)).await?;
        log::info!(
            "Pushed entry {} to {} as worklog {worklog_id}",
            entry.id,
            draft.issue_key
        );

        entry.external_worklog_id = Some(worklog_id);
        entry.synced_at = Some(Utc::now());
        self.store.update(&entry).await?;
        Ok(entry)
    }

    /// Worklog ids already imported for this owner, read once per pull.
    async fn known_worklog_ids(&self, owner_id: &str) -> Result<HashSet<String>> {
        let entries = self.store.list_by_owner(owner_id).await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| e.external_worklog_id)
            .collect())
    }

    async fn pull_issues(
        &self,
        owner_id: &str,
        remote: &dyn WorklogRemote,
        issue_keys: &[String],
        window: &SyncWindow,
        progress: &dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut known = self.known_worklog_ids(owner_id).await?;
        let mut tally = Tally::default();
        let mut cancelled = false;
        let mut aborted = None;

        let concurrency = self.options.fetch_concurrency.max(1);
        let mut fetches = stream::iter(issue_keys.iter().cloned())
            .map(move |key| async move {
                let result = cancellable(cancel, remote.fetch_worklogs(&key)).await;
                (key, result)
            })
            .buffered(concurrency);

        // Fetches may overlap; creations happen here, one at a time.
        while let Some((key, result)) = fetches.next().await {
            match result {
                Ok(fetched) => {
                    let applied = self
                        .apply_fetched(
                            owner_id,
                            &key,
                            fetched,
                            Some(window),
                            &mut known,
                            &mut tally,
                            progress,
                        )
                        .await;
                    if let Err(e) = applied {
                        log::error!("Pull for {owner_id} stopped while storing {key}: {e}");
                        aborted = Some(e);
                        break;
                    }
                }
                Err(Error::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    log::warn!("Failed to fetch worklogs for {key}: {e}");
                    progress.on_issue_failed(&key, &e);
                    tally.failures.push(IssueFailure {
                        issue_key: key,
                        worklog_id: None,
                        error: e.to_string(),
                    });
                }
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        let report = tally.into_report(issue_keys.len());
        log::info!(
            "Pull for {owner_id}: {} created, {} duplicates, {} skipped, {} failures",
            report.created,
            report.duplicates,
            report.skipped,
            report.failures.len()
        );
        Ok(match aborted {
            Some(e) => report.aborted(&e),
            None if cancelled => report.cancelled(),
            None => report,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_fetched(
        &self,
        owner_id: &str,
        issue_key: &str,
        fetched: FetchedWorklogs,
        window: Option<&SyncWindow>,
        known: &mut HashSet<String>,
        tally: &mut Tally,
        progress: &dyn SyncProgress,
    ) -> Result<()> {
        progress.on_issue_fetched(issue_key, fetched.worklogs.len());

        for bad in fetched.malformed {
            tally.failures.push(IssueFailure {
                issue_key: issue_key.to_string(),
                worklog_id: bad.worklog_id,
                error: bad.error.to_string(),
            });
        }

        for worklog in fetched.worklogs {
            if let Some(window) = window {
                if !window.contains(&worklog.started) {
                    tally.skipped += 1;
                    continue;
                }
            }
            if worklog.duration_seconds <= 0 {
                log::debug!(
                    "Skipping worklog {} on {issue_key}: no time logged",
                    worklog.id
                );
                tally.skipped += 1;
                continue;
            }
            if known.contains(&worklog.id) {
                log::debug!("Skipping worklog {} (already synced)", worklog.id);
                tally.duplicates += 1;
                continue;
            }

            let entry = mapper::remote_to_local(owner_id, &worklog, Utc::now());
            self.store.create(&entry).await?;
            log::debug!("Created entry {} for worklog {}", entry.id, worklog.id);
            progress.on_entry_created(issue_key, &worklog.id);
            known.insert(worklog.id);
            tally.created += 1;
        }
        Ok(())
    }
}
