use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::model::TimeEntry;
use crate::sync::SyncReport;

// ── Time Entries ───────────────────────────────────────────────────

const ENTRY_COLUMNS: &str = "id, owner_id, description, hours, entry_date, external_issue_key,
     external_worklog_id, synced_at, billable, invoiced";

pub fn insert_time_entry(conn: &Connection, entry: &TimeEntry) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO time_entries (id, owner_id, description, hours, entry_date, external_issue_key,
             external_worklog_id, synced_at, billable, invoiced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id,
            entry.owner_id,
            entry.description,
            entry.hours,
            entry.date.format("%Y-%m-%d").to_string(),
            entry.external_issue_key,
            entry.external_worklog_id,
            entry.synced_at.map(|t| t.to_rfc3339()),
            entry.billable,
            entry.invoiced,
        ],
    )?;
    Ok(())
}

/// Overwrite every mutable column. Returns the number of rows touched.
pub fn update_time_entry(conn: &Connection, entry: &TimeEntry) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE time_entries SET
            description = ?2, hours = ?3, entry_date = ?4,
            external_issue_key = ?5, external_worklog_id = ?6, synced_at = ?7,
            billable = ?8, invoiced = ?9, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            entry.id,
            entry.description,
            entry.hours,
            entry.date.format("%Y-%m-%d").to_string(),
            entry.external_issue_key,
            entry.external_worklog_id,
            entry.synced_at.map(|t| t.to_rfc3339()),
            entry.billable,
            entry.invoiced,
        ],
    )
}

pub fn get_time_entry(conn: &Connection, id: &str) -> Result<Option<TimeEntry>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
}

/// All of an owner's entries, newest date first.
pub fn list_time_entries(conn: &Connection, owner_id: &str) -> Result<Vec<TimeEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE owner_id = ?1
         ORDER BY entry_date DESC, created_at DESC, id"
    ))?;
    let rows = stmt.query_map(params![owner_id], entry_from_row)?;
    rows.collect()
}

pub fn delete_time_entry(conn: &Connection, id: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM time_entries WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

fn entry_from_row(row: &Row<'_>) -> Result<TimeEntry, rusqlite::Error> {
    let date_raw: String = row.get(4)?;
    let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let synced_at = row
        .get::<_, Option<String>>(7)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(TimeEntry {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        description: row.get(2)?,
        hours: row.get(3)?,
        date,
        external_issue_key: row.get(5)?,
        external_worklog_id: row.get(6)?,
        synced_at,
        billable: row.get(8)?,
        invoiced: row.get(9)?,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryStats {
    pub total_entries: u64,
    pub synced_entries: u64,
    pub total_hours: f64,
    pub last_synced_at: Option<String>,
}

pub fn entry_stats(conn: &Connection, owner_id: &str) -> Result<EntryStats, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*),
                COUNT(external_worklog_id),
                COALESCE(SUM(hours), 0.0),
                MAX(synced_at)
         FROM time_entries WHERE owner_id = ?1",
        params![owner_id],
        |row| {
            Ok(EntryStats {
                total_entries: row.get::<_, i64>(0)? as u64,
                synced_entries: row.get::<_, i64>(1)? as u64,
                total_hours: row.get(2)?,
                last_synced_at: row.get(3)?,
            })
        },
    )
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(count > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync Jobs ──────────────────────────────────────────────────────

pub fn insert_sync_job(
    conn: &Connection,
    owner_id: &str,
    job_kind: &str,
    range_start: Option<&str>,
    range_end: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_jobs (owner_id, job_kind, status, started_at, sync_range_start, sync_range_end)
         VALUES (?1, ?2, 'running', datetime('now'), ?3, ?4)",
        params![owner_id, job_kind, range_start, range_end],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_sync_job(
    conn: &Connection,
    job_id: i64,
    report: &SyncReport,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_jobs SET
            status = ?2, completed_at = datetime('now'),
            issues_total = ?3, created_items = ?4, duplicate_items = ?5,
            skipped_items = ?6, failed_items = ?7, error_message = ?8
         WHERE id = ?1",
        params![
            job_id,
            report.status.as_str(),
            report.issues_total as i64,
            report.created as i64,
            report.duplicates as i64,
            report.skipped as i64,
            report.failures.len() as i64,
            report.error,
        ],
    )?;
    Ok(())
}

/// Close a job that ended with an error before producing a report.
pub fn fail_sync_job(conn: &Connection, job_id: i64, error: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_jobs SET status = 'failed', completed_at = datetime('now'), error_message = ?2
         WHERE id = ?1",
        params![job_id, error],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncJob {
    pub id: i64,
    pub owner_id: String,
    pub job_kind: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub sync_range_start: Option<String>,
    pub sync_range_end: Option<String>,
    pub issues_total: i64,
    pub created_items: i64,
    pub duplicate_items: i64,
    pub skipped_items: i64,
    pub failed_items: i64,
    pub error_message: Option<String>,
}

/// Most recent jobs first.
pub fn list_sync_jobs(
    conn: &Connection,
    owner_id: &str,
    limit: u32,
) -> Result<Vec<SyncJob>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, job_kind, status, started_at, completed_at, sync_range_start,
                sync_range_end, issues_total, created_items, duplicate_items, skipped_items,
                failed_items, error_message
         FROM sync_jobs WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![owner_id, limit], |row| {
        Ok(SyncJob {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            job_kind: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            sync_range_start: row.get(6)?,
            sync_range_end: row.get(7)?,
            issues_total: row.get(8)?,
            created_items: row.get(9)?,
            duplicate_items: row.get(10)?,
            skipped_items: row.get(11)?,
            failed_items: row.get(12)?,
            error_message: row.get(13)?,
        })
    })?;
    rows.collect()
}
