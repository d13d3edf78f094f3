use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::db::{EventStore, StoreError};
use crate::models::{CandidateEvent, Event};

/// Dates closer than this to "now" are never adopted from a scrape.
const MIN_LEAD_HOURS: i64 = 24;
/// Date moves within this distance are treated as scrape noise.
const RESCHEDULE_THRESHOLD_HOURS: i64 = 23;

/// Merges a crawled observation into the stored state for the same link.
///
/// Without a stored record the candidate seeds a fresh, unpersisted event.
/// Otherwise non-blank candidate text wins field by field, and the date is
/// only adopted when it lies more than a day ahead of `now`. A date that moves
/// further than the noise threshold counts as a postponement: the previous
/// date is kept in `postponed_date` and both report flags are cleared so the
/// event gets announced again.
pub fn reconcile(
    candidate: &CandidateEvent,
    existing: Option<Event>,
    now: DateTime<Utc>,
) -> Event {
    let Some(mut event) = existing else {
        return Event {
            name: candidate.name.trim().to_string(),
            place: candidate.place.trim().to_string(),
            status: candidate.status.trim().to_string(),
            link: candidate.link.trim().to_string(),
            date: candidate.date,
            artist_img_url: non_blank(candidate.artist_img_url.as_deref()),
            ..Event::default()
        };
    };

    let far_enough_ahead = candidate.date - now > Duration::hours(MIN_LEAD_HOURS);
    let moved = (candidate.date - event.date).abs() > Duration::hours(RESCHEDULE_THRESHOLD_HOURS);

    if far_enough_ahead && moved {
        event.postponed_date = Some(event.date);
        event.reported_at_new = None;
        event.reported_at_upcoming = None;
    }

    if far_enough_ahead {
        event.date = candidate.date;
    }

    merge_text(&mut event.name, &candidate.name);
    merge_text(&mut event.place, &candidate.place);
    merge_text(&mut event.status, &candidate.status);
    merge_text(&mut event.link, &candidate.link);
    if let Some(url) = non_blank(candidate.artist_img_url.as_deref()) {
        event.artist_img_url = Some(url);
    }

    event
}

fn merge_text(stored: &mut String, observed: &str) {
    let observed = observed.trim();
    if !observed.is_empty() {
        *stored = observed.to_string();
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Reconciles a whole crawl into the store. Stops at the first write failure.
pub fn persist_candidates<S: EventStore + ?Sized>(
    store: &S,
    candidates: &[CandidateEvent],
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut saved = 0;
    for candidate in candidates {
        let link = candidate.link.trim();
        if link.is_empty() {
            warn!(name = %candidate.name.trim(), "skipping candidate without link");
            continue;
        }

        let existing = store.find_by_link(link)?;
        let postponed_before = existing.as_ref().and_then(|e| e.postponed_date);
        let event = reconcile(candidate, existing, now);
        if event.postponed_date != postponed_before {
            info!(link, date = %event.date, "event was rescheduled");
        }
        debug!(link, is_new = !event.is_persisted(), "saving event");

        store.save(&event)?;
        saved += 1;
    }
    Ok(saved)
}
