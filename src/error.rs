use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote transport error: {0}")]
    RemoteTransport(String),

    #[error("Remote API error ({status}): {body}")]
    RemoteApi { status: u16, body: String },

    #[error("Unable to parse timestamp {value:?}")]
    TimestampParse { value: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Time entry {0} has no issue key")]
    MissingIssueKey(String),

    #[error("Invalid time entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid date: {0}")]
    DateParse(String),

    #[error("Invalid issue reference: {0}")]
    IssueRef(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl Error {
    /// Transport failures may succeed on a later attempt; everything else
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteTransport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Error::RemoteApi {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Error::RemoteTransport(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
