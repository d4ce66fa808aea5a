use serde::Serialize;

use crate::{SCHEDULED_AT_FORMAT, ShowOccurrence};

#[derive(Debug, Serialize)]
struct FeedEntry<'a> {
    title: &'a str,
    scheduled_at: String,
    venue: &'a str,
    detail_url: Option<&'a str>,
}

/// JSON array of `{title, scheduled_at, venue, detail_url}`, in snapshot order.
pub fn render(snapshot: &[ShowOccurrence]) -> Result<String, serde_json::Error> {
    let entries: Vec<FeedEntry<'_>> = snapshot
        .iter()
        .map(|o| FeedEntry {
            title: &o.showing.title,
            scheduled_at: o.showing.scheduled_at.format(SCHEDULED_AT_FORMAT).to_string(),
            venue: &o.showing.venue,
            detail_url: o.showing.detail_url.as_deref(),
        })
        .collect();
    serde_json::to_string_pretty(&entries)
}
