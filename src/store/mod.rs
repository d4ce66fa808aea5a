//! SQLite-backed storage of scraped showings.
//!
//! One table, one row per showing, keyed by `(title, scheduled_at, venue)`.
//! Re-scraping the same page is a no-op: known rows are skipped, new rows are
//! inserted and mirrored to an append-only CSV file.

mod backup;
mod migrations;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

pub use backup::BackupMirror;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::{SCHEDULED_AT_FORMAT, ShowOccurrence, Showing};

/// Outcome of one [`Store::upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Row selection for [`Store::query`]. Empty filter selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowFilter {
    /// Inclusive lower bound on `scheduled_at`.
    pub from: Option<NaiveDateTime>,
    /// Exclusive upper bound on `scheduled_at`.
    pub until: Option<NaiveDateTime>,
    /// Substring of the venue name, ASCII case-insensitive.
    pub venue: Option<String>,
    /// Substring of the title, ASCII case-insensitive.
    pub title: Option<String>,
}

impl ShowFilter {
    /// Showings on `date` only.
    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            from: Some(date.and_time(chrono::NaiveTime::MIN)),
            until: date.succ_opt().map(|next| next.and_time(chrono::NaiveTime::MIN)),
            ..Self::default()
        }
    }

    /// Showings from the start of `today` onward.
    pub fn from_day(today: NaiveDate) -> Self {
        Self {
            from: Some(today.and_time(chrono::NaiveTime::MIN)),
            ..Self::default()
        }
    }
}

/// `%text%` with LIKE wildcards in `text` taken literally.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn format_scheduled_at(at: NaiveDateTime) -> String {
    at.format(SCHEDULED_AT_FORMAT).to_string()
}

struct ShowingRow {
    title: String,
    raw_date: String,
    raw_time: String,
    scheduled_at: String,
    venue: String,
    detail_url: Option<String>,
    first_seen_at: String,
}

impl ShowingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            title: row.get(0)?,
            raw_date: row.get(1)?,
            raw_time: row.get(2)?,
            scheduled_at: row.get(3)?,
            venue: row.get(4)?,
            detail_url: row.get(5)?,
            first_seen_at: row.get(6)?,
        })
    }

    fn into_occurrence(self) -> Result<ShowOccurrence, StoreError> {
        let scheduled_at = NaiveDateTime::parse_from_str(&self.scheduled_at, SCHEDULED_AT_FORMAT)
            .map_err(|_| StoreError::Corrupt {
                column: "scheduled_at",
                value: self.scheduled_at.clone(),
            })?;
        let first_seen_at = DateTime::parse_from_rfc3339(&self.first_seen_at)
            .map_err(|_| StoreError::Corrupt {
                column: "first_seen_at",
                value: self.first_seen_at.clone(),
            })?
            .with_timezone(&Utc);

        Ok(ShowOccurrence {
            showing: Showing {
                title: self.title,
                raw_date: self.raw_date,
                raw_time: self.raw_time,
                scheduled_at,
                venue: self.venue,
                detail_url: self.detail_url,
            },
            first_seen_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT title, raw_date, raw_time, scheduled_at, venue, detail_url, first_seen_at FROM showings";

/// Handle to the showings database. Opened once per process and passed to
/// whoever needs it; the connection closes when the handle is closed or dropped.
pub struct Store {
    conn: Connection,
    backup: Option<BackupMirror>,
}

impl Store {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config.database.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }
        migrations::run_migrations(&mut conn)?;
        info!("Database ready at {}", path.display());

        Ok(Self {
            conn,
            backup: config.backup_csv.as_ref().map(BackupMirror::new),
        })
    }

    /// Ephemeral database without a backup mirror.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn,
            backup: None,
        })
    }

    pub fn with_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup = Some(BackupMirror::new(path));
        self
    }

    /// Insert every showing not stored yet; skip the rest.
    ///
    /// Each insert commits on its own together with its backup line, so an
    /// error stops the batch without touching rows committed before it.
    pub fn upsert<I>(&mut self, batch: I) -> Result<UpsertReport, StoreError>
    where
        I: IntoIterator<Item = Showing>,
    {
        let mut report = UpsertReport::default();
        for showing in batch {
            if self.insert_one(showing)? {
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        debug!(
            "upsert: {} inserted, {} skipped",
            report.inserted, report.skipped
        );
        Ok(report)
    }

    fn insert_one(&mut self, showing: Showing) -> Result<bool, StoreError> {
        let occurrence = ShowOccurrence {
            showing,
            first_seen_at: Utc::now(),
        };
        let show = &occurrence.showing;

        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "INSERT OR IGNORE INTO showings
             (title, raw_date, raw_time, scheduled_at, venue, detail_url, first_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                show.title,
                show.raw_date,
                show.raw_time,
                format_scheduled_at(show.scheduled_at),
                show.venue,
                show.detail_url,
                occurrence.first_seen_at.to_rfc3339(),
            ],
        )?;
        let inserted = changed == 1;

        // Dropping `tx` on error rolls the insert back.
        let mark = match self.backup.as_mut() {
            Some(backup) if inserted => Some(backup.append(&occurrence)?),
            _ => None,
        };
        if let Err(e) = tx.commit() {
            if let (Some(backup), Some(mark)) = (self.backup.as_mut(), mark) {
                if let Err(cut) = backup.truncate(mark) {
                    error!("Backup out of step with the database: {cut}");
                }
            }
            return Err(e.into());
        }
        Ok(inserted)
    }

    /// Matching rows ordered by `scheduled_at`, oldest first.
    pub fn query(&self, filter: &ShowFilter) -> Result<Vec<ShowOccurrence>, StoreError> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(from) = filter.from {
            sql.push_str(" AND scheduled_at >= ?");
            args.push(Value::Text(format_scheduled_at(from)));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND scheduled_at < ?");
            args.push(Value::Text(format_scheduled_at(until)));
        }
        if let Some(venue) = &filter.venue {
            sql.push_str(" AND venue LIKE ? ESCAPE '\\'");
            args.push(Value::Text(like_pattern(venue)));
        }
        if let Some(title) = &filter.title {
            sql.push_str(" AND title LIKE ? ESCAPE '\\'");
            args.push(Value::Text(like_pattern(title)));
        }
        sql.push_str(" ORDER BY scheduled_at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), ShowingRow::from_row)?;
        let occurrences = rows
            .map(|row| row.map_err(StoreError::from).and_then(ShowingRow::into_occurrence))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(occurrences)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM showings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete showings scheduled before `before`. Returns the number removed.
    /// The backup mirror keeps its copies.
    pub fn prune(&mut self, before: NaiveDateTime) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM showings WHERE scheduled_at < ?1",
            params![format_scheduled_at(before)],
        )?;
        info!("Pruned {deleted} showings scheduled before {before}");
        Ok(deleted)
    }

    /// Write every stored row to a fresh CSV file at `path`.
    pub fn export_csv(&self, path: &Path) -> Result<usize, StoreError> {
        let rows = self.query(&ShowFilter::default())?;
        backup::export(path, &rows)?;
        info!("Exported {} showings to {}", rows.len(), path.display());
        Ok(rows.len())
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn showing(title: &str, scheduled_at: NaiveDateTime, venue: &str) -> Showing {
        Showing {
            title: title.to_string(),
            raw_date: scheduled_at.format("%a, %b %-d").to_string(),
            raw_time: scheduled_at.format("%-I:%M%P").to_string(),
            scheduled_at,
            venue: venue.to_string(),
            detail_url: Some(format!("https://example.com/{}", title.to_lowercase())),
        }
    }

    fn movie_a() -> Showing {
        Showing {
            title: "Movie A".to_string(),
            raw_date: "2024-01-15".to_string(),
            raw_time: "7:00 PM".to_string(),
            scheduled_at: at(2024, 1, 15, 19, 0),
            venue: "Screen 1".to_string(),
            detail_url: None,
        }
    }

    #[test]
    fn first_upsert_inserts_second_skips() {
        let mut store = Store::open_in_memory().unwrap();

        let report = store.upsert([movie_a()]).unwrap();
        assert_eq!(report, UpsertReport { inserted: 1, skipped: 0 });

        let rows = store.query(&ShowFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].showing.scheduled_at.format(SCHEDULED_AT_FORMAT).to_string(),
            "2024-01-15T19:00:00"
        );

        let report = store.upsert([movie_a()]).unwrap();
        assert_eq!(report, UpsertReport { inserted: 0, skipped: 1 });
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn detail_url_is_not_part_of_the_key() {
        let mut store = Store::open_in_memory().unwrap();
        let mut other = movie_a();
        other.detail_url = Some("https://example.com/elsewhere".to_string());

        let report = store.upsert([movie_a(), other]).unwrap();
        assert_eq!(report, UpsertReport { inserted: 1, skipped: 1 });
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn same_title_other_venue_is_a_new_row() {
        let mut store = Store::open_in_memory().unwrap();
        let mut other = movie_a();
        other.venue = "Screen 2".to_string();

        let report = store.upsert([movie_a(), other]).unwrap();
        assert_eq!(report.inserted, 2);
    }

    #[test]
    fn query_orders_by_scheduled_at() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert([
                showing("Late", at(2025, 5, 31, 21, 20), "Cinema One"),
                showing("Early", at(2025, 5, 30, 14, 0), "Cinema One"),
                showing("Middle", at(2025, 5, 30, 19, 10), "Cinema Two"),
            ])
            .unwrap();

        let titles: Vec<_> = store
            .query(&ShowFilter::default())
            .unwrap()
            .into_iter()
            .map(|o| o.showing.title)
            .collect();
        assert_eq!(titles, vec!["Early", "Middle", "Late"]);
    }

    #[test]
    fn round_trip_preserves_fields() {
        let mut store = Store::open_in_memory().unwrap();
        let input = vec![
            movie_a(),
            showing("Paris, Texas", at(2025, 5, 30, 14, 0), "Cinema \"One\""),
        ];
        store.upsert(input.clone()).unwrap();

        let stored: Vec<_> = store
            .query(&ShowFilter::default())
            .unwrap()
            .into_iter()
            .map(|o| o.showing)
            .collect();
        assert_eq!(stored, input);
    }

    #[test]
    fn filters_by_range_and_venue() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert([
                showing("A", at(2025, 5, 30, 14, 0), "Cinema One"),
                showing("B", at(2025, 5, 30, 19, 10), "Cinema Two"),
                showing("C", at(2025, 5, 31, 21, 20), "Cinema One"),
            ])
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 5, 30).unwrap();
        let on_day: Vec<_> = store
            .query(&ShowFilter::on_date(day))
            .unwrap()
            .into_iter()
            .map(|o| o.showing.title)
            .collect();
        assert_eq!(on_day, vec!["A", "B"]);

        let filter = ShowFilter {
            venue: Some("One".to_string()),
            ..ShowFilter::default()
        };
        let in_one: Vec<_> = store
            .query(&filter)
            .unwrap()
            .into_iter()
            .map(|o| o.showing.title)
            .collect();
        assert_eq!(in_one, vec!["A", "C"]);
    }

    #[test]
    fn text_filters_ignore_case_and_wildcards() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert([
                showing("Paris, Texas", at(2025, 5, 30, 14, 0), "Fletcher Hall"),
                showing("100% Wolf", at(2025, 5, 30, 19, 0), "Cinema One"),
                showing("1000 Wolves", at(2025, 5, 31, 19, 0), "Cinema_Two"),
            ])
            .unwrap();

        let titles = |filter: ShowFilter| -> Vec<String> {
            store
                .query(&filter)
                .unwrap()
                .into_iter()
                .map(|o| o.showing.title)
                .collect()
        };

        assert_eq!(
            titles(ShowFilter {
                title: Some("paris".to_string()),
                ..ShowFilter::default()
            }),
            vec!["Paris, Texas"]
        );
        assert_eq!(
            titles(ShowFilter {
                title: Some("0%".to_string()),
                ..ShowFilter::default()
            }),
            vec!["100% Wolf"]
        );
        assert_eq!(
            titles(ShowFilter {
                venue: Some("r_h".to_string()),
                ..ShowFilter::default()
            }),
            Vec::<String>::new()
        );
        assert_eq!(
            titles(ShowFilter {
                venue: Some("CINEMA_".to_string()),
                ..ShowFilter::default()
            }),
            vec!["1000 Wolves"]
        );
    }

    #[test]
    fn prune_removes_only_older_rows() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert([
                showing("Old", at(2025, 1, 1, 19, 0), "Cinema One"),
                showing("New", at(2025, 6, 1, 19, 0), "Cinema One"),
            ])
            .unwrap();

        assert_eq!(store.prune(at(2025, 3, 1, 0, 0)).unwrap(), 1);
        let rows = store.query(&ShowFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].showing.title, "New");
    }

    #[test]
    fn backup_gets_one_line_per_insert() {
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("backup").join("showtimes.csv");
        let mut store = Store::open_in_memory().unwrap().with_backup(&backup);

        store.upsert([movie_a()]).unwrap();
        store.upsert([movie_a()]).unwrap();
        store
            .upsert([showing("B", at(2025, 5, 30, 19, 10), "Cinema Two")])
            .unwrap();

        let mut reader = csv::Reader::from_path(&backup).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), backup::HEADER.to_vec());
        let titles: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(titles, vec!["Movie A", "B"]);
    }

    #[test]
    fn failed_backup_keeps_earlier_rows() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut store = Store::open_in_memory().unwrap();
        store.upsert([movie_a()]).unwrap();

        let mut store = store.with_backup(blocker.join("showtimes.csv"));
        let err = store
            .upsert([
                showing("B", at(2025, 5, 30, 19, 10), "Cinema Two"),
                showing("C", at(2025, 5, 31, 21, 20), "Cinema One"),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Backup { .. }));

        let titles: Vec<_> = store
            .query(&ShowFilter::default())
            .unwrap()
            .into_iter()
            .map(|o| o.showing.title)
            .collect();
        assert_eq!(titles, vec!["Movie A"]);
    }

    #[test]
    fn reopening_file_database_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            database: dir.path().join("db").join("showtimes.db"),
            backup_csv: None,
        };

        let mut store = Store::open(&config).unwrap();
        store.upsert([movie_a()]).unwrap();
        store.close().unwrap();

        let mut store = Store::open(&config).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.upsert([movie_a()]).unwrap(),
            UpsertReport { inserted: 0, skipped: 1 }
        );
    }

    #[test]
    fn export_writes_full_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut store = Store::open_in_memory().unwrap();
        store
            .upsert([
                showing("B", at(2025, 5, 31, 19, 0), "Cinema One"),
                showing("A", at(2025, 5, 30, 19, 0), "Cinema One"),
            ])
            .unwrap();

        assert_eq!(store.export_csv(&path).unwrap(), 2);
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<_> = reader
            .records()
            .map(|r| r.unwrap()[3].to_string())
            .collect();
        assert_eq!(rows, vec!["2025-05-30T19:00:00", "2025-05-31T19:00:00"]);
    }
}
