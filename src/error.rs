//! Error types for each pipeline stage.
//!
//! Per-record extraction failures are recoverable and get logged by the
//! cycle; every other kind aborts the stage that raised it.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to retrieve a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The page (or the element we waited for) did not show up in time.
    #[error("timed out after {waited_ms}ms waiting for {url}")]
    Timeout { url: String, waited_ms: u128 },

    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The page loaded but never rendered what we expected.
    #[error("render error on {url}: {reason}")]
    Render { url: String, reason: String },
}

/// A single listing element could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unrecognized date/time {raw_date:?} {raw_time:?}")]
    InvalidDateTime { raw_date: String, raw_time: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database schema version {found} is newer than supported ({supported})")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("backup file {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("stored column `{column}` holds unreadable value {value:?}")]
    Corrupt { column: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to read store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to read template {}: {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build RSS feed: {0}")]
    Rss(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid CSS selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a scrape cycle, tagged with the stage that stopped it.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch stage failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store stage failed: {0}")]
    Store(#[from] StoreError),
}
