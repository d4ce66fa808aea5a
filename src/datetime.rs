//! Normalization of the date and time strings found on listing pages.
//!
//! The theater prints dates like `Fri, May 30` (no year) and times like
//! `2:00pm`; other sources use ISO dates and 24h times. Formats are tried in
//! order and the first match wins.

use chrono::{Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Formats that carry their own year.
const FULL_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%a, %b %d, %Y",
    "%A, %B %d, %Y",
];

/// Formats without a year; parsed with the reference year appended.
const YEARLESS_DATE_FORMATS: &[&str] = &["%b %d %Y", "%B %d %Y", "%m/%d %Y"];

/// Resolves page date/time text relative to a reference day.
#[derive(Debug, Clone, Copy)]
pub struct DateNormalizer {
    today: NaiveDate,
}

impl DateNormalizer {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Normalizer anchored on the local calendar date.
    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn normalize(&self, raw_date: &str, raw_time: &str) -> Option<NaiveDateTime> {
        let date = self.parse_date(raw_date)?;
        let time = parse_time(raw_time)?;
        Some(date.and_time(time))
    }

    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let lower = raw.to_lowercase();
        if lower.contains("today") {
            return Some(self.today);
        }
        if lower.contains("tomorrow") {
            return self.today.checked_add_days(Days::new(1));
        }

        if let Some(date) = FULL_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        {
            return Some(date);
        }

        // "Fri, May 30" -> "May 30"
        let without_weekday = match raw.split_once(", ") {
            Some((_, rest)) => rest.trim(),
            None => raw,
        };
        match self.parse_yearless(without_weekday, self.today.year()) {
            Some(date) if date >= self.today => Some(date),
            // Past, or no such day this year (Feb 29): the listing means next year.
            _ => self.parse_yearless(without_weekday, self.today.year() + 1),
        }
    }

    fn parse_yearless(&self, text: &str, year: i32) -> Option<NaiveDate> {
        let with_year = format!("{} {}", text.trim_end_matches('.'), year);
        YEARLESS_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&with_year, fmt).ok())
    }
}

/// Parse `7:00 PM`, `2:00pm`, `7pm`, `7:00 p.m.`, `19:00` or `19.00`.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let compact: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let compact = compact.replace("a.m.", "am").replace("p.m.", "pm");

    let (clock, meridiem) = if let Some(rest) = compact.strip_suffix("am") {
        (rest, Some(false))
    } else if let Some(rest) = compact.strip_suffix("pm") {
        (rest, Some(true))
    } else {
        (compact.as_str(), None)
    };

    let (hour, minute) = match clock.split_once([':', '.']) {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (pm, hour) {
                (true, 12) => 12,
                (true, h) => h + 12,
                (false, 12) => 0,
                (false, h) => h,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
