pub mod date_util;
pub mod error;
pub mod jira;
pub mod mapper;
pub mod model;
pub mod storage;
pub mod sync;
pub mod url;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
pub use jira::{JiraAuth, JiraClient, JiraConfig, WorklogRemote};
pub use model::{NewTimeEntry, RemoteWorklog, SyncWindow, TimeEntry};
pub use storage::{Database, TimeEntryStore};
pub use sync::{NoopProgress, PullOptions, SyncEngine, SyncProgress, SyncReport, SyncStatus};
pub use crate::url::{issue_browse_url, resolve_issue_key};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{EntryStats, SyncJob};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use jira::config::{CONFIG_BASE_URL, CONFIG_COOLDOWN_MS};
use storage::repository;

/// `app_config` key holding the default owner for CLI commands.
pub const CONFIG_OWNER_ID: &str = "owner_id";

/// Config keys that must never be written to disk.
const SECRET_CONFIG_KEYS: &[&str] = &["jira.api_token", "jira.token"];

/// Main entry point: local time entries plus optional Jira worklog sync.
pub struct TimeBill {
    db: Database,
    engine: SyncEngine,
    jira_base_url: Option<String>,
}

/// Summary shown by `timebill status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub owner_id: String,
    pub entries: EntryStats,
    pub jira_configured: bool,
    pub jira_base_url: Option<String>,
    pub last_sync: Option<SyncJob>,
}

impl TimeBill {
    /// Build with an explicit remote, or `None` to run without Jira.
    pub fn new(db: Database, remote: Option<Arc<dyn WorklogRemote>>) -> Self {
        let store: Arc<dyn TimeEntryStore> = Arc::new(db.clone());
        Self {
            engine: SyncEngine::new(store, remote),
            db,
            jira_base_url: None,
        }
    }

    /// Build from the environment and stored config. A missing credential
    /// leaves Jira disabled rather than failing.
    pub async fn connect(db: Database) -> Result<Self> {
        match load_jira_config(&db).await? {
            Some(config) => {
                let base_url = config.base_url.clone();
                let client: Arc<dyn WorklogRemote> = Arc::new(JiraClient::new(config)?);
                let mut tb = Self::new(db, Some(client));
                tb.jira_base_url = Some(base_url);
                Ok(tb)
            }
            None => {
                log::debug!("Jira credentials not found; sync commands are disabled");
                Ok(Self::new(db, None))
            }
        }
    }

    pub fn with_pull_options(mut self, options: PullOptions) -> Self {
        self.engine = self.engine.with_options(options);
        self
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn is_jira_configured(&self) -> bool {
        self.engine.is_configured()
    }

    // ── Sync commands ──────────────────────────────────────────────

    /// Pull worklogs started between `start_date` and `end_date` (inclusive,
    /// `YYYY-MM-DD`). Issue references may be keys or browse URLs; when none
    /// are given the issues are discovered.
    pub async fn pull_by_window(
        &self,
        owner_id: &str,
        start_date: &str,
        end_date: &str,
        issue_refs: &[String],
        progress: &dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let start = date_util::parse_date(start_date)?;
        let end = date_util::parse_date(end_date)?;
        let issue_keys = issue_refs
            .iter()
            .map(|r| resolve_issue_key(r))
            .collect::<Result<Vec<_>>>()?;
        let window = SyncWindow::new(start, end)?.with_issue_keys(issue_keys);
        self.require_jira()?;

        let job_id = self
            .start_job(owner_id, "window", Some(start_date), Some(end_date))
            .await?;
        let result = self
            .engine
            .pull_by_window(owner_id, &window, progress, cancel)
            .await;
        self.finish_job(job_id, &result).await?;
        result
    }

    /// Pull every worklog on one issue.
    pub async fn pull_for_issue(
        &self,
        owner_id: &str,
        issue_ref: &str,
        progress: &dyn SyncProgress,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let issue_key = resolve_issue_key(issue_ref)?;
        self.require_jira()?;

        let job_id = self.start_job(owner_id, "issue", None, None).await?;
        let result = self
            .engine
            .pull_for_issue(owner_id, &issue_key, progress, cancel)
            .await;
        self.finish_job(job_id, &result).await?;
        result
    }

    /// Push one of `owner_id`'s entries to Jira as a new worklog.
    pub async fn push_entry(
        &self,
        owner_id: &str,
        entry_id: &str,
        issue_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TimeEntry> {
        self.require_jira()?;
        let issue_key = issue_ref.map(resolve_issue_key).transpose()?;
        let entry = self.get_entry(owner_id, entry_id).await?;
        self.engine
            .push_entry(entry, issue_key.as_deref(), cancel)
            .await
    }

    fn require_jira(&self) -> Result<()> {
        if self.engine.is_configured() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Jira is not configured. Set {} and {} (or run: timebill config set {CONFIG_BASE_URL} <URL>)",
                jira::config::ENV_BASE_URL,
                jira::config::ENV_API_TOKEN,
            )))
        }
    }

    async fn start_job(
        &self,
        owner_id: &str,
        kind: &'static str,
        range_start: Option<&str>,
        range_end: Option<&str>,
    ) -> Result<i64> {
        let owner_id = owner_id.to_string();
        let range_start = range_start.map(String::from);
        let range_end = range_end.map(String::from);
        let id = self
            .db
            .writer()
            .call(move |conn| {
                repository::insert_sync_job(
                    conn,
                    &owner_id,
                    kind,
                    range_start.as_deref(),
                    range_end.as_deref(),
                )
            })
            .await?;
        Ok(id)
    }

    async fn finish_job(&self, job_id: i64, result: &Result<SyncReport>) -> Result<()> {
        let cancelled;
        let report = match result {
            Err(Error::Cancelled) => {
                cancelled = SyncReport::from_counts(0, 0, 0, 0, Vec::new()).cancelled();
                Ok(&cancelled)
            }
            Ok(report) => Ok(report),
            Err(e) => Err(e),
        };
        match report {
            Ok(report) => {
                let report = report.clone();
                self.db
                    .writer()
                    .call(move |conn| repository::finish_sync_job(conn, job_id, &report))
                    .await?;
            }
            Err(e) => {
                let message = e.to_string();
                self.db
                    .writer()
                    .call(move |conn| repository::fail_sync_job(conn, job_id, &message))
                    .await?;
            }
        }
        Ok(())
    }

    // ── Time entries ───────────────────────────────────────────────

    pub async fn create_entry(&self, owner_id: &str, new: NewTimeEntry) -> Result<TimeEntry> {
        let new = normalize(new)?;
        let entry = TimeEntry::new(owner_id, new);
        self.db.create(&entry).await?;
        Ok(entry)
    }

    /// Newest date first.
    pub async fn list_entries(&self, owner_id: &str) -> Result<Vec<TimeEntry>> {
        self.db.list_by_owner(owner_id).await
    }

    /// Fetch an entry, refusing entries that belong to someone else.
    pub async fn get_entry(&self, owner_id: &str, entry_id: &str) -> Result<TimeEntry> {
        let entry = self
            .db
            .get(entry_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("time entry {entry_id}")))?;
        if entry.owner_id != owner_id {
            return Err(Error::Forbidden(format!(
                "time entry {entry_id} belongs to another user"
            )));
        }
        Ok(entry)
    }

    /// Replace the user-editable fields. Sync fields are kept; moving a
    /// synced entry to another issue is refused.
    pub async fn update_entry(
        &self,
        owner_id: &str,
        entry_id: &str,
        changes: NewTimeEntry,
    ) -> Result<TimeEntry> {
        let changes = normalize(changes)?;
        let mut entry = self.get_entry(owner_id, entry_id).await?;
        if entry.is_synced() && changes.issue_key != entry.external_issue_key {
            return Err(Error::InvalidEntry(format!(
                "entry {entry_id} is synced to {}; its issue cannot change",
                entry.external_issue_key.as_deref().unwrap_or("?")
            )));
        }
        entry.description = changes.description;
        entry.hours = changes.hours;
        entry.date = changes.date;
        entry.billable = changes.billable;
        entry.external_issue_key = changes.issue_key;
        self.db.update(&entry).await?;
        Ok(entry)
    }

    /// Delete a local entry. The tracker worklog, if any, is left alone.
    pub async fn delete_entry(&self, owner_id: &str, entry_id: &str) -> Result<()> {
        self.get_entry(owner_id, entry_id).await?;
        let id = entry_id.to_string();
        self.db
            .writer()
            .call(move |conn| repository::delete_time_entry(conn, &id))
            .await?;
        Ok(())
    }

    // ── Status ─────────────────────────────────────────────────────

    pub async fn status(&self, owner_id: &str) -> Result<Status> {
        let owner = owner_id.to_string();
        let (entries, last_sync) = self
            .db
            .reader()
            .call(move |conn| {
                let stats = repository::entry_stats(conn, &owner)?;
                let last = repository::list_sync_jobs(conn, &owner, 1)?.into_iter().next();
                Ok::<_, rusqlite::Error>((stats, last))
            })
            .await?;
        Ok(Status {
            owner_id: owner_id.to_string(),
            entries,
            jira_configured: self.is_jira_configured(),
            jira_base_url: self.jira_base_url.clone(),
            last_sync,
        })
    }

    pub async fn sync_jobs(&self, owner_id: &str, limit: u32) -> Result<Vec<SyncJob>> {
        let owner = owner_id.to_string();
        let jobs = self
            .db
            .reader()
            .call(move |conn| repository::list_sync_jobs(conn, &owner, limit))
            .await?;
        Ok(jobs)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?;
        Ok(value)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if SECRET_CONFIG_KEYS.contains(&key) {
            return Err(Error::Config(format!(
                "{key} is not stored; set {} in the environment instead",
                jira::config::ENV_API_TOKEN
            )));
        }
        if key == CONFIG_BASE_URL {
            ::url::Url::parse(value).map_err(|e| Error::Config(format!("invalid {key}: {e}")))?;
        }
        if key == CONFIG_COOLDOWN_MS && jira::config::parse_cooldown_ms(value).is_none() {
            return Err(Error::Config(format!(
                "invalid {key}: expected whole milliseconds, got {value:?}"
            )));
        }
        let key = key.to_string();
        let value = value.to_string();
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?;
        Ok(())
    }

    pub async fn config_unset(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        let removed = self
            .db
            .writer()
            .call(move |conn| repository::delete_config(conn, &key))
            .await?;
        Ok(removed)
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        let pairs = self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Ok(pairs)
    }
}

/// Trim the description and resolve the issue reference.
fn normalize(mut new: NewTimeEntry) -> Result<NewTimeEntry> {
    new.description = new.description.trim().to_string();
    new.validate()?;
    new.issue_key = new
        .issue_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(resolve_issue_key)
        .transpose()?;
    Ok(new)
}

/// Jira settings from the environment, falling back to stored config for
/// the base URL, email and request cooldown. `None` when no usable
/// credential exists.
pub async fn load_jira_config(db: &Database) -> Result<Option<JiraConfig>> {
    load_jira_config_with(db, |k| std::env::var(k).ok()).await
}

async fn load_jira_config_with<E>(db: &Database, env: E) -> Result<Option<JiraConfig>>
where
    E: Fn(&str) -> Option<String>,
{
    let stored: HashMap<String, String> = db
        .reader()
        .call(|conn| {
            let mut values = HashMap::new();
            for key in jira::config::STORED_KEYS {
                if let Some(v) = repository::get_config(conn, key)? {
                    values.insert(key.to_string(), v);
                }
            }
            Ok::<_, rusqlite::Error>(values)
        })
        .await?;
    Ok(JiraConfig::from_sources(env, |k| stored.get(k).cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{worklog, FakeRemote};
    use chrono::NaiveDate;

    fn new_entry(hours: f64, issue: Option<&str>) -> NewTimeEntry {
        NewTimeEntry {
            description: "  Sprint planning ".into(),
            hours,
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            billable: true,
            issue_key: issue.map(String::from),
        }
    }

    async fn with_fake(remote: FakeRemote) -> (TimeBill, Arc<FakeRemote>) {
        let remote = Arc::new(remote);
        let db = Database::open_memory().await.unwrap();
        let as_dyn: Arc<dyn WorklogRemote> = remote.clone();
        (TimeBill::new(db, Some(as_dyn)), remote)
    }

    #[tokio::test]
    async fn test_entry_crud_and_ownership() {
        let tb = TimeBill::new(Database::open_memory().await.unwrap(), None);
        let created = tb
            .create_entry("alice", new_entry(2.0, Some("https://acme.atlassian.net/browse/abc-4")))
            .await
            .unwrap();
        assert_eq!(created.description, "Sprint planning");
        assert_eq!(created.external_issue_key.as_deref(), Some("ABC-4"));

        assert_eq!(tb.get_entry("alice", &created.id).await.unwrap(), created);
        assert!(matches!(
            tb.get_entry("bob", &created.id).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            tb.get_entry("alice", "nope").await,
            Err(Error::NotFound(_))
        ));

        let updated = tb
            .update_entry("alice", &created.id, new_entry(3.0, None))
            .await
            .unwrap();
        assert_eq!(updated.hours, 3.0);
        assert_eq!(updated.external_issue_key, None);

        assert!(matches!(
            tb.delete_entry("bob", &created.id).await,
            Err(Error::Forbidden(_))
        ));
        tb.delete_entry("alice", &created.id).await.unwrap();
        assert!(tb.list_entries("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_zero_hours() {
        let tb = TimeBill::new(Database::open_memory().await.unwrap(), None);
        assert!(matches!(
            tb.create_entry("alice", new_entry(0.0, None)).await,
            Err(Error::InvalidEntry(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_without_jira_is_config_error_and_leaves_no_job() {
        let tb = TimeBill::new(Database::open_memory().await.unwrap(), None);
        let cancel = CancellationToken::new();
        assert!(matches!(
            tb.pull_by_window("alice", "2024-01-01", "2024-01-31", &[], &NoopProgress, &cancel)
                .await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            tb.pull_for_issue("alice", "ABC-1", &NoopProgress, &cancel).await,
            Err(Error::Config(_))
        ));
        assert!(tb.sync_jobs("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pull_validates_dates() {
        let (tb, _) = with_fake(FakeRemote::new()).await;
        let cancel = CancellationToken::new();
        assert!(matches!(
            tb.pull_by_window("alice", "2024-02-01", "2024-01-01", &[], &NoopProgress, &cancel)
                .await,
            Err(Error::InvalidEntry(_))
        ));
        assert!(matches!(
            tb.pull_by_window("alice", "01/02/2024", "2024-01-01", &[], &NoopProgress, &cancel)
                .await,
            Err(Error::DateParse(_))
        ));
    }

    #[tokio::test]
    async fn test_pull_records_sync_job() {
        let (tb, _) = with_fake(
            FakeRemote::new()
                .with_pages(vec![vec!["ABC-1"]])
                .with_worklogs(
                    "ABC-1",
                    vec![worklog("1", "ABC-1", 7200, "2024-01-01T09:00:00.000-0500", "Fixed bug")],
                ),
        )
        .await;
        let report = tb
            .pull_by_window(
                "alice",
                "2024-01-01",
                "2024-01-02",
                &[],
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.created, 1);

        let status = tb.status("alice").await.unwrap();
        assert_eq!(status.entries.total_entries, 1);
        assert_eq!(status.entries.synced_entries, 1);
        let job = status.last_sync.unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.created_items, 1);
        assert_eq!(job.sync_range_start.as_deref(), Some("2024-01-01"));
    }

    #[tokio::test]
    async fn test_failed_pull_marks_job_failed() {
        let (tb, _) = with_fake(FakeRemote::new().with_failing_issue("ABC-1")).await;
        let err = tb
            .pull_for_issue(
                "alice",
                "https://acme.atlassian.net/browse/ABC-1",
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteTransport(_)));

        let jobs = tb.sync_jobs("alice", 5).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_kind, "issue");
        assert_eq!(jobs[0].status, "failed");
    }

    #[tokio::test]
    async fn test_storage_failure_mid_pull_records_partial_counts() {
        let (tb, _) = with_fake(FakeRemote::new().with_worklogs(
            "ABC-1",
            vec![
                worklog("1", "ABC-1", 600, "2024-01-10T10:00:00.000+0000", "kept"),
                worklog("2", "ABC-1", 600, "2024-01-11T10:00:00.000+0000", "boom"),
                worklog("3", "ABC-1", 600, "2024-01-12T10:00:00.000+0000", "never"),
            ],
        ))
        .await;
        tb.db()
            .writer()
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_boom BEFORE INSERT ON time_entries
                     WHEN NEW.description = 'boom'
                     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
                )
            })
            .await
            .unwrap();

        let report = tb
            .pull_by_window(
                "alice",
                "2024-01-01",
                "2024-01-31",
                &["ABC-1".to_string()],
                &NoopProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.created, 1);
        assert_eq!(tb.list_entries("alice").await.unwrap().len(), 1);

        let job = &tb.sync_jobs("alice", 1).await.unwrap()[0];
        assert_eq!(job.status, "failed");
        assert_eq!(job.created_items, 1);
        assert!(job.error_message.as_deref().unwrap().contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_push_checks_owner() {
        let (tb, remote) = with_fake(FakeRemote::new()).await;
        let entry = tb
            .create_entry("alice", new_entry(1.0, Some("ABC-1")))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        assert!(matches!(
            tb.push_entry("bob", &entry.id, None, &cancel).await,
            Err(Error::Forbidden(_))
        ));
        assert_eq!(remote.created_count(), 0);

        let pushed = tb
            .push_entry("alice", &entry.id, Some("abc-2"), &cancel)
            .await
            .unwrap();
        assert_eq!(pushed.external_issue_key.as_deref(), Some("ABC-2"));
        assert!(pushed.is_synced());
    }

    #[tokio::test]
    async fn test_synced_entry_cannot_change_issue() {
        let (tb, _) = with_fake(FakeRemote::new()).await;
        let entry = tb
            .create_entry("alice", new_entry(1.0, Some("ABC-1")))
            .await
            .unwrap();
        tb.push_entry("alice", &entry.id, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            tb.update_entry("alice", &entry.id, new_entry(1.0, Some("XYZ-9"))).await,
            Err(Error::InvalidEntry(_))
        ));
        let kept = tb
            .update_entry("alice", &entry.id, new_entry(1.25, Some("ABC-1")))
            .await
            .unwrap();
        assert_eq!(kept.hours, 1.25);
        assert!(kept.is_synced());
    }

    #[tokio::test]
    async fn test_config_commands() {
        let tb = TimeBill::new(Database::open_memory().await.unwrap(), None);
        tb.config_set(CONFIG_BASE_URL, "https://acme.atlassian.net")
            .await
            .unwrap();
        tb.config_set(CONFIG_OWNER_ID, "alice").await.unwrap();
        assert_eq!(
            tb.config_get(CONFIG_OWNER_ID).await.unwrap().as_deref(),
            Some("alice")
        );
        assert_eq!(tb.config_list().await.unwrap().len(), 2);

        assert!(matches!(
            tb.config_set("jira.api_token", "secret").await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            tb.config_set(CONFIG_BASE_URL, "not a url").await,
            Err(Error::Config(_))
        ));
        assert!(tb.config_unset(CONFIG_OWNER_ID).await.unwrap());
        assert_eq!(tb.config_get(CONFIG_OWNER_ID).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stored_cooldown_paces_jira_client() {
        let tb = TimeBill::new(Database::open_memory().await.unwrap(), None);
        assert!(matches!(
            tb.config_set(CONFIG_COOLDOWN_MS, "soon").await,
            Err(Error::Config(_))
        ));
        tb.config_set(CONFIG_BASE_URL, "https://acme.atlassian.net")
            .await
            .unwrap();
        tb.config_set(CONFIG_COOLDOWN_MS, "250").await.unwrap();

        let env = |k: &str| (k == jira::config::ENV_API_TOKEN).then(|| "secret".to_string());
        let config = load_jira_config_with(tb.db(), env).await.unwrap().unwrap();
        assert_eq!(config.base_url, "https://acme.atlassian.net");
        assert_eq!(config.cooldown, std::time::Duration::from_millis(250));

        let no_token = load_jira_config_with(tb.db(), |_: &str| None).await.unwrap();
        assert!(no_token.is_none());
    }
}
