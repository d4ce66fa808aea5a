//! CSV files mirroring the `showings` table.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::error;

use crate::error::StoreError;
use crate::{SCHEDULED_AT_FORMAT, ShowOccurrence};

pub const HEADER: [&str; 7] = [
    "title",
    "raw_date",
    "raw_time",
    "scheduled_at",
    "venue",
    "detail_url",
    "first_seen_at",
];

pub fn write_row<W: Write>(
    writer: &mut csv::Writer<W>,
    occurrence: &ShowOccurrence,
) -> Result<(), csv::Error> {
    let show = &occurrence.showing;
    let scheduled_at = show.scheduled_at.format(SCHEDULED_AT_FORMAT).to_string();
    let first_seen_at = occurrence.first_seen_at.to_rfc3339();
    writer.write_record([
        show.title.as_str(),
        show.raw_date.as_str(),
        show.raw_time.as_str(),
        scheduled_at.as_str(),
        show.venue.as_str(),
        show.detail_url.as_deref().unwrap_or(""),
        first_seen_at.as_str(),
    ])
}

/// Append-only copy of every inserted row. Existing lines are never rewritten.
pub struct BackupMirror {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl BackupMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, csv::Error> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open()?,
        };
        Ok(self.writer.insert(writer))
    }

    fn open(&self) -> Result<csv::Writer<File>, csv::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        Ok(writer)
    }

    fn error(&self, source: csv::Error) -> StoreError {
        StoreError::Backup {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one row and flush it to disk.
    ///
    /// Returns the file length before the row, to pass to
    /// [`BackupMirror::truncate`] if the matching insert does not commit. A
    /// failed append leaves the file as it was.
    pub fn append(&mut self, occurrence: &ShowOccurrence) -> Result<u64, StoreError> {
        let mark = match self
            .writer()
            .and_then(|writer| Ok(writer.get_ref().metadata()?.len()))
        {
            Ok(mark) => mark,
            Err(source) => {
                self.writer = None;
                return Err(self.error(source));
            }
        };

        let written = self.writer().and_then(|writer| {
            write_row(writer, occurrence)?;
            writer.flush()?;
            Ok(())
        });
        if let Err(source) = written {
            if let Err(e) = self.truncate(mark) {
                error!("Backup {} may hold a partial line: {e}", self.path.display());
            }
            return Err(self.error(source));
        }
        Ok(mark)
    }

    /// Cut the file back to `len` bytes, dropping every line appended after it.
    pub fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        // Whatever is still buffered must land before the cut, not after it.
        self.writer = None;
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_len(len))
            .map_err(|e| self.error(e.into()))
    }
}

/// Write a full snapshot of `rows` to `path`, replacing the file.
pub fn export(path: &Path, rows: &[ShowOccurrence]) -> Result<(), StoreError> {
    let to_store_error = |source| StoreError::Backup {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_store_error)?;
    writer.write_record(HEADER).map_err(to_store_error)?;
    for row in rows {
        write_row(&mut writer, row).map_err(to_store_error)?;
    }
    writer.flush().map_err(|e| to_store_error(e.into()))?;
    Ok(())
}
