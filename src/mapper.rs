//! Conversion between tracker worklogs and local time entries.
//!
//! Everything here is pure: no I/O and no clock reads except where a
//! timestamp is passed in.

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeDelta, TimeZone, Utc,
};

use crate::error::{Error, Result};
use crate::model::{Comment, Document, RemoteWorklog, RemoteWorklogDraft, TimeEntry};

/// Description used when a worklog comment has no extractable text.
pub const NO_DESCRIPTION: &str = "No description";

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Map a remote worklog to a new local entry owned by `owner_id`.
///
/// Pulled entries are always billable and never invoiced. The date is the
/// calendar day of `started` in the offset it was recorded with.
pub fn remote_to_local(owner_id: &str, worklog: &RemoteWorklog, now: DateTime<Utc>) -> TimeEntry {
    TimeEntry {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        description: flatten_comment(&worklog.comment),
        hours: worklog.duration_seconds as f64 / SECONDS_PER_HOUR,
        date: worklog.started.date_naive(),
        external_issue_key: Some(worklog.issue_key.clone()),
        external_worklog_id: Some(worklog.id.clone()),
        synced_at: Some(now),
        billable: true,
        invoiced: false,
    }
}

/// Map a local entry to worklog creation parameters, starting at local
/// midnight of the entry's date.
pub fn local_to_remote(entry: &TimeEntry) -> Result<RemoteWorklogDraft> {
    let offset = midnight_offset(entry.date, |local| {
        Local.offset_from_local_datetime(local).map(|o| o.fix())
    });
    local_to_remote_at(entry, offset)
}

/// Offset of local midnight on `date`, given the zone's local-time lookup.
///
/// When a DST change skips midnight, the offset in force before the change
/// is used: midnight in that offset is the first instant of the day.
fn midnight_offset<F>(date: NaiveDate, offset_at: F) -> FixedOffset
where
    F: Fn(&NaiveDateTime) -> LocalResult<FixedOffset>,
{
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(offset) = offset_at(&midnight).earliest() {
        return offset;
    }
    match offset_at(&(midnight - TimeDelta::hours(1))).latest() {
        Some(offset) => {
            log::debug!("Local midnight on {date} falls in a DST gap; using {offset}");
            offset
        }
        None => {
            log::warn!("No local offset around midnight on {date}; using UTC");
            Utc.fix()
        }
    }
}

/// Same as [`local_to_remote`] with an explicit offset for midnight.
pub fn local_to_remote_at(entry: &TimeEntry, offset: FixedOffset) -> Result<RemoteWorklogDraft> {
    let issue_key = entry
        .external_issue_key
        .clone()
        .ok_or_else(|| Error::MissingIssueKey(entry.id.clone()))?;

    let midnight = entry.date.and_time(NaiveTime::MIN);
    let started = offset
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(|| Error::InvalidEntry(format!("no midnight for {} at {offset}", entry.date)))?;

    Ok(RemoteWorklogDraft {
        issue_key,
        duration_seconds: hours_to_seconds(entry.hours),
        started,
        comment: entry.description.clone(),
    })
}

/// Hours to whole seconds, rounding half away from zero.
pub fn hours_to_seconds(hours: f64) -> i64 {
    (hours * SECONDS_PER_HOUR).round() as i64
}

/// Flatten a comment to plain text.
///
/// Text runs are joined with a single space in document order; empty runs
/// are dropped. An empty result maps to [`NO_DESCRIPTION`].
pub fn flatten_comment(comment: &Comment) -> String {
    let text = match comment {
        Comment::Plain(s) => s.trim().to_string(),
        Comment::Document(doc) => flatten_document(doc),
    };
    if text.is_empty() {
        NO_DESCRIPTION.to_string()
    } else {
        text
    }
}

fn flatten_document(doc: &Document) -> String {
    doc.blocks
        .iter()
        .flat_map(|block| block.inlines())
        .filter_map(|inline| match inline {
            crate::model::Inline::Text(t) if !t.is_empty() => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}
