use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::Event;

pub const DATE_FORMAT: &str = "%d.%m.‘%y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// First announcement of a newly listed event; carries the ticket status.
    Fresh,
    /// Entry of the periodic upcoming-events digest.
    Upcoming,
}

pub fn format_date(date: DateTime<Utc>, tz: Tz) -> String {
    date.with_timezone(&tz).format(DATE_FORMAT).to_string()
}

pub fn compose(event: &Event, kind: MessageKind, tz: Tz) -> String {
    let mut out = String::with_capacity(128);
    out.push_str(&event.name);
    out.push_str("\n\n");

    let date = format_date(event.date, tz);
    match event.postponed_date {
        None => out.push_str(&format!("*{date}*")),
        Some(previous) => {
            out.push_str(&format!("~{}~ : *{date}*", format_date(previous, tz)));
        }
    }

    if kind == MessageKind::Fresh {
        out.push_str(&format!(" | {}", event.status));
    }

    out.push_str(&format!("\nLocation: {}", event.place));
    if let Some(url) = &event.artist_url {
        out.push_str(&format!("\nSpotify: {url}"));
    }
    out.push_str(&format!("\nInfo: {}", event.link));
    out
}
