use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored event. `id == 0` means the event has not been persisted yet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub id: i64,
    pub link: String, // unique across crawler runs
    pub name: String,
    pub place: String,
    pub status: String,
    pub date: DateTime<Utc>,
    pub postponed_date: Option<DateTime<Utc>>,
    pub artist: Option<String>,
    pub category: Option<String>,
    pub artist_url: Option<String>,
    pub artist_img_url: Option<String>,
    pub reported_at_new: Option<DateTime<Utc>>,
    pub reported_at_upcoming: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    pub fn artist_name(&self) -> Option<&str> {
        self.artist
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn missing_metadata(&self) -> bool {
        self.artist.is_none()
            || self.category.is_none()
            || self.artist_url.is_none()
            || self.artist_img_url.is_none()
    }
}

/// One observation of an event produced by a crawler run.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CandidateEvent {
    pub name: String,
    pub place: String,
    pub status: String,
    pub link: String,
    pub date: DateTime<Utc>,
    pub artist_img_url: Option<String>,
}
