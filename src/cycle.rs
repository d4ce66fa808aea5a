//! One scrape cycle: listings → film pages → store.

use std::collections::HashSet;

use log::{info, warn};

use crate::config::Config;
use crate::datetime::DateNormalizer;
use crate::error::{ConfigError, CycleError};
use crate::extract::{Extractor, FilmLink};
use crate::fetch::{self, HttpFetcher, PageFetcher, PageRequest};
use crate::store::Store;

/// Counters for one finished cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct films found across all listing pages.
    pub films: usize,
    /// Film detail pages that could not be fetched.
    pub failed_pages: usize,
    /// Showings extracted successfully.
    pub extracted: usize,
    /// Cards and time entries skipped as malformed.
    pub rejected: usize,
    pub inserted: usize,
    pub skipped: usize,
}

pub struct ScrapeCycle {
    listing_fetcher: Box<dyn PageFetcher>,
    detail_fetcher: Box<dyn PageFetcher>,
    extractor: Extractor,
    listing_urls: Vec<String>,
    wait_for: Option<String>,
}

impl ScrapeCycle {
    pub fn new(
        listing_fetcher: Box<dyn PageFetcher>,
        detail_fetcher: Box<dyn PageFetcher>,
        extractor: Extractor,
        listing_urls: Vec<String>,
    ) -> Self {
        Self {
            listing_fetcher,
            detail_fetcher,
            extractor,
            listing_urls,
            wait_for: None,
        }
    }

    /// Listing pages only count as loaded once `selector` matches.
    pub fn waiting_for(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.wait_for = (!selector.trim().is_empty()).then_some(selector);
        self
    }

    /// The configured fetchers, with dates resolved against today.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let extractor = Extractor::new(&config.extract, DateNormalizer::today())?;
        Ok(Self::new(
            fetch::listing_fetcher(&config.fetch)?,
            Box::new(HttpFetcher::new(&config.fetch)?),
            extractor,
            config.fetch.listing_urls.clone(),
        )
        .waiting_for(config.fetch.wait_for.clone()))
    }

    /// Fetch every listing, then every film page, and upsert what was found.
    ///
    /// A listing that cannot be fetched aborts the cycle before anything is
    /// stored. A film page that cannot be fetched is skipped.
    pub async fn run(&self, store: &mut Store) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();

        let films = self.collect_films(&mut report).await?;
        report.films = films.len();
        info!("Found {} films across {} listing pages", films.len(), self.listing_urls.len());

        let mut showings = Vec::new();
        for film in &films {
            let request = PageRequest::new(film.url.as_str());
            let html = match self.detail_fetcher.fetch(&request).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Skipping {}: {e}", film.title);
                    report.failed_pages += 1;
                    continue;
                }
            };

            let before = showings.len();
            for result in self.extractor.showings(&html, film) {
                match result {
                    Ok(showing) => showings.push(showing),
                    Err(e) => {
                        warn!("Skipping showtime of {} ({}): {e}", film.title, film.url);
                        report.rejected += 1;
                    }
                }
            }
            info!("{}: {} showtimes", film.title, showings.len() - before);
        }
        report.extracted = showings.len();

        let upserted = store.upsert(showings)?;
        report.inserted = upserted.inserted;
        report.skipped = upserted.skipped;

        info!(
            "Cycle finished: {} inserted, {} already known, {} rejected, {} pages failed",
            report.inserted, report.skipped, report.rejected, report.failed_pages
        );
        Ok(report)
    }

    async fn collect_films(&self, report: &mut CycleReport) -> Result<Vec<FilmLink>, CycleError> {
        let mut seen = HashSet::new();
        let mut films = Vec::new();

        for url in &self.listing_urls {
            let mut request = PageRequest::new(url.as_str());
            if let Some(selector) = &self.wait_for {
                request = request.waiting_for(selector.as_str());
            }
            info!("Fetching listing {url}");
            let html = self.listing_fetcher.fetch(&request).await?;

            for result in self.extractor.film_links(&html, url) {
                match result {
                    Ok(film) => {
                        if seen.insert(film.url.clone()) {
                            films.push(film);
                        }
                    }
                    Err(e) => {
                        warn!("Skipping film card on {url}: {e}");
                        report.rejected += 1;
                    }
                }
            }
        }

        Ok(films)
    }
}
