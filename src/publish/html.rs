//! Static schedule page.
//!
//! The schedule is rendered twice, once by day and once by film, and the page
//! script toggles between the two views. `group_by_title` only picks which
//! one is visible first.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use maud::{Markup, html};

use super::RenderOptions;
use crate::{SCHEDULED_AT_FORMAT, ShowOccurrence};

pub const DEFAULT_TEMPLATE: &str = include_str!("../../templates/index.html");
pub const DEFAULT_STYLESHEET: &str = include_str!("../../templates/styles.css");

/// URL/id friendly form of a title: `"Paris, Texas"` -> `"paris-texas"`.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn display_date(date: NaiveDate) -> String {
    date.format("%a, %b %-d, %Y").to_string()
}

fn display_time(at: NaiveDateTime) -> String {
    at.format("%-I:%M%P").to_string()
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn hidden(hide: bool) -> Option<&'static str> {
    hide.then_some("display:none")
}

/// Render the schedule page for `snapshot` into `template`.
///
/// Pure: the same snapshot and options always give the same document.
pub fn render(snapshot: &[ShowOccurrence], options: &RenderOptions, template: &str) -> String {
    let visible: Vec<&ShowOccurrence> = snapshot
        .iter()
        .filter(|o| match options.target_date {
            Some(day) => o.showing.scheduled_at.date() == day,
            None => true,
        })
        .collect();

    let mut by_date: BTreeMap<NaiveDate, Vec<&ShowOccurrence>> = BTreeMap::new();
    for &occurrence in &visible {
        by_date
            .entry(occurrence.showing.scheduled_at.date())
            .or_default()
            .push(occurrence);
    }
    for shows in by_date.values_mut() {
        shows.sort_by_key(|o| o.showing.scheduled_at);
    }

    let day_options = html! {
        @for date in by_date.keys() {
            option value=(iso_date(*date)) { (display_date(*date)) }
        }
    };

    let schedule = if visible.is_empty() {
        html! { p class="no-showtimes" { "No upcoming showtimes." } }
    } else {
        // Ids stay unique across both views.
        let mut counter = 0;
        let by_day = render_by_day(&by_date, &mut counter, options.group_by_title);
        let by_title = render_by_title(&visible, &mut counter, !options.group_by_title);
        html! { (by_day) (by_title) }
    };

    let generated_at = options.generated_at.format("%Y-%m-%d %H:%M").to_string();
    template
        .replace("{{PAGE_TITLE}}", &html! { (options.page_title) }.into_string())
        .replace("{{GENERATED_AT}}", &html! { (generated_at) }.into_string())
        .replace("{{DAY_FILTER_OPTIONS}}", &day_options.into_string())
        .replace("{{SCHEDULE_CONTENT}}", &schedule.into_string())
}

fn render_by_day(
    by_date: &BTreeMap<NaiveDate, Vec<&ShowOccurrence>>,
    counter: &mut usize,
    hide: bool,
) -> Markup {
    html! {
        div id="by-day" class="view" style=[hidden(hide)] {
            @for (date, shows) in by_date {
                div class="day" data-date=(iso_date(*date)) {
                    h2 { (display_date(*date)) }
                    @for occurrence in shows {
                        (render_movie(occurrence, next(counter), display_time(occurrence.showing.scheduled_at)))
                    }
                }
            }
        }
    }
}

fn render_by_title(shows: &[&ShowOccurrence], counter: &mut usize, hide: bool) -> Markup {
    let mut by_title: BTreeMap<&str, Vec<&ShowOccurrence>> = BTreeMap::new();
    for &occurrence in shows {
        by_title
            .entry(occurrence.showing.title.as_str())
            .or_default()
            .push(occurrence);
    }
    for shows in by_title.values_mut() {
        shows.sort_by_key(|o| o.showing.scheduled_at);
    }

    html! {
        div id="by-title" class="view" style=[hidden(hide)] {
            @for (title, shows) in &by_title {
                div class="movie-group" data-title=(title) {
                    h3 { (title) }
                    @for occurrence in shows {
                        @let at = occurrence.showing.scheduled_at;
                        (render_movie(
                            occurrence,
                            next(counter),
                            format!("{} ({})", display_time(at), at.format("%a, %b %-d")),
                        ))
                    }
                }
            }
        }
    }
}

fn next(counter: &mut usize) -> usize {
    *counter += 1;
    *counter
}

fn render_movie(occurrence: &ShowOccurrence, counter: usize, when: String) -> Markup {
    let show = &occurrence.showing;
    let at = show.scheduled_at;
    html! {
        div class="movie"
            id=(format!("movie-{}-{counter}", slugify(&show.title)))
            data-date=(iso_date(at.date()))
            data-movie-title=(show.title)
            data-movie-cinema=(show.venue)
            data-scheduled-at=(at.format(SCHEDULED_AT_FORMAT).to_string())
            data-when=(format!("{} {}", at.format("%a, %b %-d"), display_time(at)))
        {
            span class="movie-title" {
                @if let Some(url) = &show.detail_url {
                    a href=(url) target="_blank" { (show.title) }
                } @else {
                    (show.title)
                }
            }
            div class="movie-info" {
                span class="movie-time" { (when) }
                span class="movie-cinema" { (show.venue) }
            }
            div class="movie-actions" {
                button type="button" class="other-times-btn" onclick="showOtherTimes(this)" {
                    "Show Other Times"
                }
                button type="button" class="share-btn" onclick="copyShareLink(this, event)" title="Copy link" {
                    "Copy Link"
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Showing;
    use chrono::{TimeZone, Utc};

    fn occurrence(title: &str, day: u32, h: u32, m: u32, venue: &str) -> ShowOccurrence {
        let scheduled_at = NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        ShowOccurrence {
            showing: Showing {
                title: title.to_string(),
                raw_date: String::new(),
                raw_time: String::new(),
                scheduled_at,
                venue: venue.to_string(),
                detail_url: Some(format!("https://example.com/films/{}/", slugify(title))),
            },
            first_seen_at: Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn options() -> RenderOptions {
        RenderOptions {
            today: NaiveDate::from_ymd_opt(2025, 5, 30).unwrap(),
            target_date: None,
            group_by_title: false,
            page_title: "Showtimes".to_string(),
            generated_at: NaiveDate::from_ymd_opt(2025, 5, 30)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn empty_snapshot_renders_no_showtimes_state() {
        let html = render(&[], &options(), DEFAULT_TEMPLATE);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("No upcoming showtimes."));
        assert!(html.contains("</html>"));
        assert!(!html.contains("{{"));
        assert!(!html.contains("id=\"by-day\""));
    }

    #[test]
    fn groups_by_day_in_time_order() {
        let snapshot = vec![
            occurrence("Paris, Texas", 31, 21, 20, "Fletcher Hall"),
            occurrence("The Seventh Seal", 30, 19, 10, "Cinema Two"),
            occurrence("The Seventh Seal", 30, 14, 0, "Cinema One"),
        ];
        let html = render(&snapshot, &options(), DEFAULT_TEMPLATE);

        let first_day = html
            .find("<div class=\"day\" data-date=\"2025-05-30\"><h2>Fri, May 30, 2025</h2>")
            .unwrap();
        let second_day = html.find("<h2>Sat, May 31, 2025</h2>").unwrap();
        assert!(first_day < second_day);

        let two_pm = html.find("2:00pm").unwrap();
        let seven_pm = html.find("7:10pm").unwrap();
        assert!(two_pm < seven_pm && seven_pm < second_day);

        assert!(html.contains("<option value=\"2025-05-31\">Sat, May 31, 2025</option>"));
        assert!(html.contains("id=\"movie-paris-texas-3\""));
        assert!(html.contains("<div id=\"by-day\" class=\"view\">"));
    }

    #[test]
    fn both_views_are_rendered_with_unique_ids() {
        let snapshot = vec![
            occurrence("Zelig", 30, 14, 0, "Cinema One"),
            occurrence("Alphaville", 31, 19, 0, "Cinema Two"),
        ];
        let html = render(&snapshot, &options(), DEFAULT_TEMPLATE);

        // By day first, numbered in time order, then by film continuing the count.
        assert!(html.contains("id=\"movie-zelig-1\""));
        assert!(html.contains("id=\"movie-alphaville-2\""));
        assert!(html.contains("id=\"movie-alphaville-3\""));
        assert!(html.contains("id=\"movie-zelig-4\""));
        assert!(html.contains("<div id=\"by-title\" class=\"view\" style=\"display:none\">"));
        assert_eq!(html.matches("Show Other Times").count(), 4);
        assert_eq!(html.matches("onclick=\"copyShareLink(this, event)\"").count(), 4);
    }

    #[test]
    fn groups_by_title_when_asked() {
        let snapshot = vec![
            occurrence("Zelig", 30, 14, 0, "Cinema One"),
            occurrence("Alphaville", 31, 19, 0, "Cinema Two"),
        ];
        let mut opts = options();
        opts.group_by_title = true;
        let html = render(&snapshot, &opts, DEFAULT_TEMPLATE);

        let alpha = html.find("<h3>Alphaville</h3>").unwrap();
        let zelig = html.find("<h3>Zelig</h3>").unwrap();
        assert!(alpha < zelig);
        assert!(html.contains("7:00pm (Sat, May 31)"));
        assert!(html.contains("<div id=\"by-day\" class=\"view\" style=\"display:none\">"));
        assert!(html.contains("<div id=\"by-title\" class=\"view\">"));
    }

    #[test]
    fn target_date_limits_the_page() {
        let snapshot = vec![
            occurrence("A", 30, 14, 0, "Cinema One"),
            occurrence("B", 31, 19, 0, "Cinema Two"),
        ];
        let mut opts = options();
        opts.target_date = NaiveDate::from_ymd_opt(2025, 5, 31);
        let html = render(&snapshot, &opts, DEFAULT_TEMPLATE);

        assert!(html.contains("data-movie-title=\"B\""));
        assert!(!html.contains("data-movie-title=\"A\""));
    }

    #[test]
    fn text_is_escaped() {
        let snapshot = vec![occurrence("Tom & Jerry <Big> Day", 30, 14, 0, "Cinema \"1\"")];
        let mut opts = options();
        opts.page_title = "Films <b>now</b>".to_string();
        let html = render(&snapshot, &opts, DEFAULT_TEMPLATE);

        assert!(html.contains("Tom &amp; Jerry &lt;Big&gt; Day"));
        assert!(html.contains("data-movie-cinema=\"Cinema &quot;1&quot;\""));
        assert!(html.contains("<title>Films &lt;b&gt;now&lt;/b&gt;</title>"));
        assert!(!html.contains("<Big>"));
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Paris, Texas"), "paris-texas");
        assert_eq!(slugify("  2001: A Space Odyssey "), "2001-a-space-odyssey");
        assert_eq!(slugify("Amélie"), "amélie");
    }
}
