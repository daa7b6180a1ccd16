use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A billable time record owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: String,
    pub owner_id: String,
    pub description: String,
    pub hours: f64,
    pub date: NaiveDate,
    pub external_issue_key: Option<String>,
    pub external_worklog_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub billable: bool,
    pub invoiced: bool,
}

impl TimeEntry {
    /// Build a fresh, unsynced entry with a generated id.
    pub fn new(owner_id: &str, new: NewTimeEntry) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            description: new.description,
            hours: new.hours,
            date: new.date,
            external_issue_key: new.issue_key,
            external_worklog_id: None,
            synced_at: None,
            billable: new.billable,
            invoiced: false,
        }
    }

    /// Check the invariants every stored entry must satisfy.
    pub fn validate(&self) -> Result<()> {
        if !self.hours.is_finite() || self.hours < 0.0 {
            return Err(Error::InvalidEntry(format!(
                "hours must be a non-negative number, got {}",
                self.hours
            )));
        }
        if self.external_worklog_id.is_some() && self.external_issue_key.is_none() {
            return Err(Error::InvalidEntry(format!(
                "entry {} has a worklog id but no issue key",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.external_worklog_id.is_some()
    }
}

/// User-supplied fields for creating or editing an entry by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTimeEntry {
    pub description: String,
    pub hours: f64,
    pub date: NaiveDate,
    pub billable: bool,
    pub issue_key: Option<String>,
}

impl NewTimeEntry {
    /// Hand-entered time must be strictly positive and described.
    pub fn validate(&self) -> Result<()> {
        if !self.hours.is_finite() || self.hours <= 0.0 {
            return Err(Error::InvalidEntry(format!(
                "hours must be greater than zero, got {}",
                self.hours
            )));
        }
        if self.description.trim().is_empty() {
            return Err(Error::InvalidEntry("description is required".into()));
        }
        Ok(())
    }
}

/// Author details as the tracker reports them. Carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorklogAuthor {
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub email_address: Option<String>,
}

/// A worklog as it exists on the remote tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWorklog {
    pub id: String,
    pub issue_key: String,
    pub duration_seconds: i64,
    pub started: DateTime<FixedOffset>,
    pub comment: Comment,
    pub author: Option<WorklogAuthor>,
}

/// Worklog comment body: either a bare string or a rich-text document.
#[derive(Debug, Clone, PartialEq)]
pub enum Comment {
    Plain(String),
    Document(Document),
}

impl Default for Comment {
    fn default() -> Self {
        Comment::Document(Document::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    /// Any non-paragraph block (heading, list item, code block...).
    Other { kind: String, inlines: Vec<Inline> },
}

impl Block {
    pub fn inlines(&self) -> &[Inline] {
        match self {
            Block::Paragraph(inlines) => inlines,
            Block::Other { inlines, .. } => inlines,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    /// Mentions, emoji, hard breaks and similar nodes with no plain text.
    Other(String),
}

impl Document {
    /// Single paragraph holding `text` as one run.
    pub fn from_text(text: &str) -> Self {
        Self {
            blocks: vec![Block::Paragraph(vec![Inline::Text(text.to_string())])],
        }
    }
}

/// Inclusive calendar-date range bounding a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// When non-empty, issue discovery is skipped and these keys are used.
    pub issue_keys: Vec<String>,
}

impl SyncWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidEntry(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self {
            start,
            end,
            issue_keys: Vec::new(),
        })
    }

    pub fn with_issue_keys(mut self, keys: Vec<String>) -> Self {
        self.issue_keys = keys;
        self
    }

    /// Whether `instant` falls in `[start, end + 1 day)`.
    pub fn contains(&self, instant: &DateTime<FixedOffset>) -> bool {
        let (lo, hi) = crate::date_util::inclusive_day_bounds(self.start, self.end);
        let at = instant.with_timezone(&Utc);
        at >= lo && at < hi
    }
}

/// Everything needed to create a worklog on the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWorklogDraft {
    pub issue_key: String,
    pub duration_seconds: i64,
    pub started: DateTime<FixedOffset>,
    pub comment: String,
}
