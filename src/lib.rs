pub mod config;
pub mod cycle;
pub mod datetime;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lock;
pub mod publish;
pub mod store;

use chrono::{DateTime, NaiveDateTime, Utc};

pub use config::Config;
pub use cycle::{CycleReport, ScrapeCycle};
pub use error::{
    ConfigError, CycleError, ExtractionError, FetchError, LockError, PublishError, StoreError,
};
pub use extract::{Extractor, FilmLink, Showings};
pub use fetch::{PageFetcher, PageRequest};
pub use publish::{Publisher, RenderOptions};
pub use store::{ShowFilter, Store, UpsertReport};

/// Text format used for `scheduled_at` in storage and feeds.
pub const SCHEDULED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One screening as extracted from the theater site, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Showing {
    pub title: String,
    /// Date text exactly as it appeared on the page.
    pub raw_date: String,
    /// Time text exactly as it appeared on the page.
    pub raw_time: String,
    /// Local theater time derived from `raw_date` + `raw_time`.
    pub scheduled_at: NaiveDateTime,
    pub venue: String,
    pub detail_url: Option<String>,
}

impl Showing {
    /// Natural identity of a showing; two rows with the same key are the same screening.
    pub fn dedup_key(&self) -> (&str, NaiveDateTime, &str) {
        (&self.title, self.scheduled_at, &self.venue)
    }
}

/// A showing as persisted by the [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowOccurrence {
    pub showing: Showing,
    pub first_seen_at: DateTime<Utc>,
}
