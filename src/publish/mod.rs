//! Publish pass: read the store, write the public documents.
//!
//! Rendering is pure; only [`Publisher::publish`] touches the filesystem.
//! A failed publish leaves the store untouched and the previous outputs in
//! place.

pub mod html;
pub mod json;
pub mod rss;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use log::{info, warn};

use crate::config::PublishConfig;
use crate::error::PublishError;
use crate::store::{ShowFilter, Store};

/// Knobs for one render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// First day shown when no target date is set.
    pub today: NaiveDate,
    /// Restrict the page to a single day.
    pub target_date: Option<NaiveDate>,
    pub group_by_title: bool,
    pub page_title: String,
    pub generated_at: NaiveDateTime,
}

impl RenderOptions {
    pub fn now(config: &PublishConfig) -> Self {
        let now = Local::now().naive_local();
        Self {
            today: now.date(),
            target_date: None,
            group_by_title: config.group_by_title,
            page_title: config.page_title.clone(),
            generated_at: now,
        }
    }

    /// Which stored rows the page covers.
    pub fn filter(&self) -> ShowFilter {
        match self.target_date {
            Some(day) => ShowFilter::on_date(day),
            None => ShowFilter::from_day(self.today),
        }
    }
}

/// Files written by one publish pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub showings: usize,
    pub html: PathBuf,
    pub json: Option<PathBuf>,
    pub rss: Option<PathBuf>,
}

pub struct Publisher {
    config: PublishConfig,
}

impl Publisher {
    pub fn new(config: PublishConfig) -> Self {
        Self { config }
    }

    fn template(&self) -> Result<String, PublishError> {
        match &self.config.template {
            Some(path) => fs::read_to_string(path).map_err(|source| PublishError::Template {
                path: path.clone(),
                source,
            }),
            None => Ok(html::DEFAULT_TEMPLATE.to_string()),
        }
    }

    pub fn publish(
        &self,
        store: &Store,
        options: &RenderOptions,
    ) -> Result<PublishReport, PublishError> {
        let snapshot = store.query(&options.filter())?;
        info!("Publishing {} showings", snapshot.len());

        let template = self.template()?;
        let page = html::render(&snapshot, options, &template);
        let html_path = self.config.html_output.clone();
        self.write_output(&html_path, &page)?;
        info!("HTML written to {}", html_path.display());
        self.copy_static_files(&html_path);

        let json = match &self.config.json_output {
            Some(path) => {
                self.write_output(path, &json::render(&snapshot)?)?;
                info!("JSON written to {}", path.display());
                Some(path.clone())
            }
            None => None,
        };

        let rss = match &self.config.rss_output {
            Some(path) => {
                let feed = rss::render(&snapshot, &self.config.page_title, &self.config.site_link)
                    .map_err(|e| PublishError::Rss(e.to_string()))?;
                self.write_output(path, &feed)?;
                info!("RSS written to {}", path.display());
                Some(path.clone())
            }
            None => None,
        };

        Ok(PublishReport {
            showings: snapshot.len(),
            html: html_path,
            json,
            rss,
        })
    }

    /// Replace `path` with `content`, keeping a timestamped copy of the old file
    /// when configured. The new content lands via rename, never half-written.
    fn write_output(&self, path: &Path, content: &str) -> Result<(), PublishError> {
        let write_error = |source| PublishError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_error)?;
            }
        }

        if self.config.backup_existing && path.exists() {
            let stamp = Local::now().format("%Y%m%d_%H%M%S");
            let backup = PathBuf::from(format!("{}.backup_{stamp}", path.display()));
            match fs::copy(path, &backup) {
                Ok(_) => {
                    info!("Created backup: {}", backup.display());
                    self.prune_backups(path);
                }
                Err(e) => warn!("Could not back up {}: {e}", path.display()),
            }
        }

        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        fs::write(&tmp, content).map_err(write_error)?;
        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            write_error(source)
        })
    }

    /// Delete all but the newest `backup_keep` copies of `path`. Failures only warn.
    fn prune_backups(&self, path: &Path) {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let prefix = format!("{}.backup_", name.to_string_lossy());

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list backups in {}: {e}", dir.display());
                return;
            }
        };
        // The stamp sorts chronologically, so name order is age order.
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect();
        backups.sort();

        let excess = backups.len().saturating_sub(self.config.backup_keep);
        for old in &backups[..excess] {
            match fs::remove_file(old) {
                Ok(()) => info!("Removed old backup {}", old.display()),
                Err(e) => warn!("Could not remove old backup {}: {e}", old.display()),
            }
        }
    }

    /// Stylesheet and extra assets next to the page. Failures only warn.
    fn copy_static_files(&self, html_path: &Path) {
        let out_dir = match html_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let css_dest = out_dir.join("styles.css");
        let css_result = match &self.config.stylesheet {
            Some(source) => fs::copy(source, &css_dest).map(|_| ()),
            None => fs::write(&css_dest, html::DEFAULT_STYLESHEET),
        };
        if let Err(e) = css_result {
            warn!("Could not write stylesheet {}: {e}", css_dest.display());
        }

        for asset in &self.config.assets {
            let Some(name) = asset.file_name() else {
                warn!("Skipping asset without file name: {}", asset.display());
                continue;
            };
            let dest = out_dir.join(name);
            match fs::copy(asset, &dest) {
                Ok(_) => info!("Copied {} to {}", asset.display(), dest.display()),
                Err(e) => warn!("Could not copy {}: {e}", asset.display()),
            }
        }
    }
}
