use rss::{ChannelBuilder, ItemBuilder};

use super::html::slugify;
use crate::ShowOccurrence;

/// RSS feed with one item per film, listing its upcoming showtimes.
pub fn render(
    snapshot: &[ShowOccurrence],
    channel_title: &str,
    channel_link: &str,
) -> Result<String, rss::Error> {
    // Films in order of their first showing.
    let mut films: Vec<(&str, Vec<&ShowOccurrence>)> = Vec::new();
    for occurrence in snapshot {
        let title = occurrence.showing.title.as_str();
        match films.iter_mut().find(|(t, _)| *t == title) {
            Some((_, shows)) => shows.push(occurrence),
            None => films.push((title, vec![occurrence])),
        }
    }

    let mut items = Vec::with_capacity(films.len());
    for (title, shows) in films {
        let showtimes: Vec<String> = shows
            .iter()
            .map(|o| {
                format!(
                    "{} - {}",
                    o.showing.scheduled_at.format("%a, %b %-d %-I:%M%P"),
                    o.showing.venue
                )
            })
            .collect();

        let link = shows
            .iter()
            .find_map(|o| o.showing.detail_url.clone())
            .unwrap_or_else(|| channel_link.to_string());
        let guid = rss::Guid {
            value: format!("{}#{}", link, slugify(title)),
            permalink: false,
        };
        // When the film first showed up in the listings.
        let first_seen = shows.iter().map(|o| o.first_seen_at).min();

        let mut item_builder = ItemBuilder::default();
        item_builder.title(title.to_string());
        item_builder.link(link);
        item_builder.description(showtimes.join("<br/>\n"));
        item_builder.guid(guid);
        if let Some(date) = first_seen {
            item_builder.pub_date(date.to_rfc2822());
        }
        items.push(item_builder.build());
    }

    let channel = ChannelBuilder::default()
        .title(channel_title)
        .link(channel_link)
        .description(format!("Upcoming showtimes: {channel_title}"))
        .items(items)
        .build();

    let mut buf = Vec::new();
    channel.write_to(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
