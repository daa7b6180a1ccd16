use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::TimeEntry;
use crate::storage::{repository, Database};

/// Narrow read/write access to local time entries, as the sync engine
/// needs it.
#[async_trait]
pub trait TimeEntryStore: Send + Sync {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TimeEntry>>;

    async fn get(&self, id: &str) -> Result<Option<TimeEntry>>;

    async fn create(&self, entry: &TimeEntry) -> Result<()>;

    /// Fails with `NotFound` when no entry has `entry.id`.
    async fn update(&self, entry: &TimeEntry) -> Result<()>;
}

#[async_trait]
impl TimeEntryStore for Database {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TimeEntry>> {
        let owner_id = owner_id.to_string();
        let entries = self
            .reader()
            .call(move |conn| repository::list_time_entries(conn, &owner_id))
            .await?;
        Ok(entries)
    }

    async fn get(&self, id: &str) -> Result<Option<TimeEntry>> {
        let id = id.to_string();
        let entry = self
            .reader()
            .call(move |conn| repository::get_time_entry(conn, &id))
            .await?;
        Ok(entry)
    }

    async fn create(&self, entry: &TimeEntry) -> Result<()> {
        entry.validate()?;
        let entry = entry.clone();
        self.writer()
            .call(move |conn| repository::insert_time_entry(conn, &entry))
            .await?;
        Ok(())
    }

    async fn update(&self, entry: &TimeEntry) -> Result<()> {
        entry.validate()?;
        let id = entry.id.clone();
        let entry = entry.clone();
        let changed = self
            .writer()
            .call(move |conn| repository::update_time_entry(conn, &entry))
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("time entry {id}")));
        }
        Ok(())
    }
}
