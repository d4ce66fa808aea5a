//! Turns fetched HTML into [`Showing`] candidates.
//!
//! Listing pages yield one [`FilmLink`] per film card; a film's detail page
//! yields its showtimes, grouped by date, each entry reading
//! `"<time> - <venue>"`. Every element is extracted on its own, so one
//! malformed card or time entry never costs the rest of the page.

use std::collections::HashSet;

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::Showing;
use crate::config::ExtractConfig;
use crate::datetime::DateNormalizer;
use crate::error::{ConfigError, ExtractionError};

/// A film found on a listing page, pointing at its detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilmLink {
    pub title: String,
    pub url: String,
}

pub struct Extractor {
    film_card: Selector,
    film_title: Selector,
    film_link: Selector,
    date_block: Selector,
    date_label: Selector,
    time_entry: Selector,
    venue_separator: String,
    default_venue: Option<String>,
    normalizer: DateNormalizer,
}

fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Visible text of an element, whitespace runs collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_link(base: Option<&Url>, href: &str) -> String {
    match base.and_then(|base| base.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

impl Extractor {
    pub fn new(config: &ExtractConfig, normalizer: DateNormalizer) -> Result<Self, ConfigError> {
        Ok(Self {
            film_card: parse_selector(&config.film_card)?,
            film_title: parse_selector(&config.film_title)?,
            film_link: parse_selector(&config.film_link)?,
            date_block: parse_selector(&config.date_block)?,
            date_label: parse_selector(&config.date_label)?,
            time_entry: parse_selector(&config.time_entry)?,
            venue_separator: config.venue_separator.clone(),
            default_venue: config
                .default_venue
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            normalizer,
        })
    }

    /// Film cards on a listing page, in page order, one result per card.
    /// Repeated detail links are reported once.
    pub fn film_links(&self, html: &str, page_url: &str) -> Vec<Result<FilmLink, ExtractionError>> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for card in document.select(&self.film_card) {
            let title = card
                .select(&self.film_title)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty());
            let href = card
                .select(&self.film_link)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .find(|h| !h.is_empty());

            let link = match (title, href) {
                (None, _) => Err(ExtractionError::MissingField("title")),
                (Some(_), None) => Err(ExtractionError::MissingField("link")),
                (Some(title), Some(href)) => {
                    let url = resolve_link(base.as_ref(), href);
                    if !seen.insert(url.clone()) {
                        continue;
                    }
                    Ok(FilmLink { title, url })
                }
            };
            links.push(link);
        }

        links
    }

    /// Showtimes listed on a film's detail page.
    ///
    /// The returned iterator is single-pass; date/time normalization happens
    /// as it is advanced.
    pub fn showings(&self, html: &str, film: &FilmLink) -> Showings {
        let document = Html::parse_document(html);
        let mut entries = Vec::new();

        for block in document.select(&self.date_block) {
            let raw_date = block
                .select(&self.date_label)
                .next()
                .map(element_text)
                .filter(|d| !d.is_empty());
            for entry in block.select(&self.time_entry) {
                entries.push(RawEntry {
                    raw_date: raw_date.clone(),
                    text: element_text(entry),
                });
            }
        }

        Showings {
            title: film.title.clone(),
            detail_url: film.url.clone(),
            entries: entries.into_iter(),
            venue_separator: self.venue_separator.clone(),
            default_venue: self.default_venue.clone(),
            normalizer: self.normalizer,
        }
    }
}

/// One time entry as found on the page, with the date heading it sat under.
#[derive(Debug)]
struct RawEntry {
    raw_date: Option<String>,
    text: String,
}

/// Lazily normalized showings of one film page.
#[derive(Debug)]
pub struct Showings {
    title: String,
    detail_url: String,
    entries: std::vec::IntoIter<RawEntry>,
    venue_separator: String,
    default_venue: Option<String>,
    normalizer: DateNormalizer,
}

impl Showings {
    fn build(&self, entry: RawEntry) -> Result<Showing, ExtractionError> {
        let raw_date = entry.raw_date.ok_or(ExtractionError::MissingField("date"))?;

        let (raw_time, venue) = match entry.text.split_once(self.venue_separator.as_str()) {
            Some((time, venue)) => (time.trim().to_string(), Some(venue.trim().to_string())),
            None => (entry.text.trim().to_string(), None),
        };
        if raw_time.is_empty() {
            return Err(ExtractionError::MissingField("time"));
        }
        let venue = venue
            .filter(|v| !v.is_empty())
            .or_else(|| self.default_venue.clone())
            .ok_or(ExtractionError::MissingField("venue"))?;

        let scheduled_at = self.normalizer.normalize(&raw_date, &raw_time).ok_or_else(|| {
            ExtractionError::InvalidDateTime {
                raw_date: raw_date.clone(),
                raw_time: raw_time.clone(),
            }
        })?;

        Ok(Showing {
            title: self.title.clone(),
            raw_date,
            raw_time,
            scheduled_at,
            venue,
            detail_url: Some(self.detail_url.clone()),
        })
    }
}

impl Iterator for Showings {
    type Item = Result<Showing, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(self.build(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LISTING: &str = include_str!("../tests/fixtures/listing.html");
    const FILM: &str = include_str!("../tests/fixtures/film.html");

    fn extractor() -> Extractor {
        let today = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        Extractor::new(&ExtractConfig::default(), DateNormalizer::new(today)).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn listing_yields_one_link_per_film() {
        let results = extractor().film_links(LISTING, "https://carolinatheatre.org/now-playing/");
        let links: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();

        assert_eq!(
            links,
            vec![
                &FilmLink {
                    title: "The Seventh Seal".to_string(),
                    url: "https://carolinatheatre.org/films/the-seventh-seal/".to_string(),
                },
                &FilmLink {
                    title: "Paris, Texas".to_string(),
                    url: "https://carolinatheatre.org/films/paris-texas/".to_string(),
                },
            ]
        );
    }

    #[test]
    fn malformed_cards_are_reported_not_fatal() {
        let results = extractor().film_links(LISTING, "https://carolinatheatre.org/now-playing/");
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        assert_eq!(
            errors,
            vec![
                ExtractionError::MissingField("link"),
                ExtractionError::MissingField("title"),
            ]
        );
    }

    #[test]
    fn film_page_showings() {
        let film = FilmLink {
            title: "The Seventh Seal".to_string(),
            url: "https://carolinatheatre.org/films/the-seventh-seal/".to_string(),
        };
        let results: Vec<_> = extractor().showings(FILM, &film).collect();
        assert_eq!(results.len(), 6);

        let showings: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let summary: Vec<_> = showings
            .iter()
            .map(|s| (s.scheduled_at, s.venue.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (at(30, 14, 0), "Cinema One"),
                (at(30, 19, 10), "Cinema Two"),
                (at(31, 21, 20), "Fletcher Hall"),
                (at(31, 13, 0), "Unknown Cinema"),
            ]
        );

        let first = showings[0];
        assert_eq!(first.title, "The Seventh Seal");
        assert_eq!(first.raw_date, "Fri, May 30");
        assert_eq!(first.raw_time, "2:00pm");
        assert_eq!(first.detail_url.as_deref(), Some(film.url.as_str()));
    }

    #[test]
    fn bad_entries_are_skipped_individually() {
        let film = FilmLink {
            title: "The Seventh Seal".to_string(),
            url: "https://carolinatheatre.org/films/the-seventh-seal/".to_string(),
        };
        let errors: Vec<_> = extractor()
            .showings(FILM, &film)
            .filter_map(Result::err)
            .collect();
        assert_eq!(
            errors,
            vec![
                ExtractionError::InvalidDateTime {
                    raw_date: "Sat, May 31".to_string(),
                    raw_time: "whenever".to_string(),
                },
                ExtractionError::MissingField("date"),
            ]
        );
    }

    #[test]
    fn missing_venue_without_default_is_rejected() {
        let config = ExtractConfig {
            default_venue: None,
            ..ExtractConfig::default()
        };
        let today = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let extractor = Extractor::new(&config, DateNormalizer::new(today)).unwrap();
        let film = FilmLink {
            title: "X".to_string(),
            url: "https://example.com/x".to_string(),
        };
        let html = r#"<li class="showInfo__date"><span class="date">May 30</span>
            <div class="showInfo__times"><span class="time">1:00pm</span></div></li>"#;

        let results: Vec<_> = extractor.showings(html, &film).collect();
        assert_eq!(results, vec![Err(ExtractionError::MissingField("venue"))]);
    }

    #[test]
    fn invalid_selector_is_a_config_error() {
        let config = ExtractConfig {
            film_card: "div[".to_string(),
            ..ExtractConfig::default()
        };
        let err = Extractor::new(&config, DateNormalizer::today()).err().unwrap();
        assert!(matches!(err, ConfigError::Selector { .. }));
    }
}
