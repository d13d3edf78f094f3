use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::models::Event;
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("event {0} not found")]
    NotFound(i64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence capabilities the reconciliation, notification and metadata
/// passes rely on.
pub trait EventStore {
    /// Inserts the event and returns its new id.
    fn create(&self, event: &Event) -> StoreResult<i64>;
    fn update(&self, event: &Event) -> StoreResult<()>;
    fn find_by_link(&self, link: &str) -> StoreResult<Option<Event>>;
    fn find_by_id(&self, id: i64) -> StoreResult<Event>;
    /// Not yet announced as new and not in the past, ordered by date.
    fn list_fresh(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>>;
    /// Not yet part of a digest, `from <= date <= to`, ordered by date.
    fn list_in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> StoreResult<Vec<Event>>;
    /// Any enrichment attribute still unset on an event not yet part of an
    /// upcoming digest, ordered by date.
    fn list_missing_metadata(&self) -> StoreResult<Vec<Event>>;

    fn save(&self, event: &Event) -> StoreResult<()> {
        if event.is_persisted() {
            self.update(event)
        } else {
            self.create(event).map(|_| ())
        }
    }
}

const COLUMNS: &str = "id, link, name, place, status, date, postponed_date, artist, category,
    artist_url, artist_img_url, reported_at_new, reported_at_upcoming, created_at";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        utils::ensure_parent(path);
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                place TEXT NOT NULL,
                status TEXT NOT NULL,
                date TEXT NOT NULL,
                postponed_date TEXT,
                artist TEXT,
                category TEXT,
                artist_url TEXT,
                artist_img_url TEXT,
                reported_at_new TEXT,
                reported_at_upcoming TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_date ON events(date);",
        )
    }

    fn query_events<P: rusqlite::Params>(&self, sql: &str, params: P) -> StoreResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, event_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl EventStore for Store {
    fn create(&self, event: &Event) -> StoreResult<i64> {
        let created_at = event.created_at.unwrap_or_else(Utc::now);
        self.conn.execute(
            "INSERT INTO events (link, name, place, status, date, postponed_date, artist,
                category, artist_url, artist_img_url, reported_at_new, reported_at_upcoming,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.link,
                event.name,
                event.place,
                event.status,
                event.date,
                event.postponed_date,
                event.artist,
                event.category,
                event.artist_url,
                event.artist_img_url,
                event.reported_at_new,
                event.reported_at_upcoming,
                created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, event: &Event) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE events SET link = ?2, name = ?3, place = ?4, status = ?5, date = ?6,
                postponed_date = ?7, artist = ?8, category = ?9, artist_url = ?10,
                artist_img_url = ?11, reported_at_new = ?12, reported_at_upcoming = ?13
             WHERE id = ?1",
            params![
                event.id,
                event.link,
                event.name,
                event.place,
                event.status,
                event.date,
                event.postponed_date,
                event.artist,
                event.category,
                event.artist_url,
                event.artist_img_url,
                event.reported_at_new,
                event.reported_at_upcoming,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(event.id));
        }
        Ok(())
    }

    fn find_by_link(&self, link: &str) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE link = ?1 LIMIT 1");
        Ok(self
            .conn
            .query_row(&sql, params![link], event_from_row)
            .optional()?)
    }

    fn find_by_id(&self, id: i64) -> StoreResult<Event> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], event_from_row)
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    fn list_fresh(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events
             WHERE reported_at_new IS NULL AND date >= ?1
             ORDER BY date"
        );
        self.query_events(&sql, params![now])
    }

    fn list_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events
             WHERE reported_at_upcoming IS NULL AND date >= ?1 AND date <= ?2
             ORDER BY date"
        );
        self.query_events(&sql, params![from, to])
    }

    fn list_missing_metadata(&self) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events
             WHERE reported_at_upcoming IS NULL
               AND (artist IS NULL
                    OR category IS NULL
                    OR artist_url IS NULL
                    OR artist_img_url IS NULL)
             ORDER BY date"
        );
        self.query_events(&sql, [])
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        link: row.get(1)?,
        name: row.get(2)?,
        place: row.get(3)?,
        status: row.get(4)?,
        date: row.get(5)?,
        postponed_date: row.get(6)?,
        artist: row.get(7)?,
        category: row.get(8)?,
        artist_url: row.get(9)?,
        artist_img_url: row.get(10)?,
        reported_at_new: row.get(11)?,
        reported_at_upcoming: row.get(12)?,
        created_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 18, 30, 0).unwrap()
    }

    fn event(link: &str, date: DateTime<Utc>) -> Event {
        Event {
            link: link.to_string(),
            name: format!("name of {link}"),
            place: "Halle".to_string(),
            status: "available".to_string(),
            date,
            ..Event::default()
        }
    }

    #[test]
    fn creates_and_reads_back_an_event() {
        let store = Store::open_in_memory().unwrap();
        let mut stored = event("link-1", now());
        stored.artist_img_url = Some("https://img.example/a.png".into());

        store.save(&stored).unwrap();

        let found = store.find_by_link("link-1").unwrap().unwrap();
        assert_eq!(found.id, 1);
        assert_eq!(found.name, "name of link-1");
        assert_eq!(found.date, now());
        assert_eq!(found.artist_img_url, stored.artist_img_url);
        assert!(found.created_at.is_some());
        assert_eq!(store.find_by_id(1).unwrap(), found);
        assert!(matches!(store.find_by_id(2), Err(StoreError::NotFound(2))));
        assert!(store.find_by_link("link-2").unwrap().is_none());
    }

    #[test]
    fn save_updates_persisted_events() {
        let store = Store::open_in_memory().unwrap();
        store.save(&event("link-1", now())).unwrap();

        let mut found = store.find_by_id(1).unwrap();
        found.reported_at_new = Some(now());
        found.postponed_date = Some(now() - Duration::days(3));
        found.category = Some("concert".into());
        store.save(&found).unwrap();

        assert_eq!(store.find_by_id(1).unwrap(), found);
    }

    #[test]
    fn update_of_unknown_id_fails() {
        let store = Store::open_in_memory().unwrap();
        let mut ghost = event("ghost", now());
        ghost.id = 42;

        assert!(matches!(store.update(&ghost), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn rejects_duplicate_links() {
        let store = Store::open_in_memory().unwrap();
        store.create(&event("link-1", now())).unwrap();

        assert!(store.create(&event("link-1", now())).is_err());
    }

    #[test]
    fn fresh_events_skip_reported_and_past_ones() {
        let store = Store::open_in_memory().unwrap();
        store.create(&event("later", now() + Duration::days(9))).unwrap();
        store.create(&event("past", now() - Duration::days(1))).unwrap();
        store.create(&event("sooner", now() + Duration::days(1))).unwrap();
        let mut reported = event("reported", now() + Duration::days(2));
        reported.reported_at_new = Some(now());
        store.create(&reported).unwrap();

        let links: Vec<_> = store
            .list_fresh(now())
            .unwrap()
            .into_iter()
            .map(|e| e.link)
            .collect();

        assert_eq!(links, vec!["sooner", "later"]);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let store = Store::open_in_memory().unwrap();
        let from = now();
        let to = now() + Duration::days(10);
        store.create(&event("start", from)).unwrap();
        store.create(&event("end", to)).unwrap();
        store.create(&event("after", to + Duration::seconds(1))).unwrap();
        store.create(&event("before", from - Duration::seconds(1))).unwrap();
        let mut digested = event("digested", from + Duration::days(1));
        digested.reported_at_upcoming = Some(now());
        store.create(&digested).unwrap();

        let links: Vec<_> = store
            .list_in_window(from, to)
            .unwrap()
            .into_iter()
            .map(|e| e.link)
            .collect();

        assert_eq!(links, vec!["start", "end"]);
    }

    #[test]
    fn lists_events_missing_any_metadata() {
        let store = Store::open_in_memory().unwrap();
        let complete = Event {
            artist: Some("a".into()),
            category: Some("concert".into()),
            artist_url: Some("u".into()),
            artist_img_url: Some("i".into()),
            ..event("complete", now())
        };
        store.create(&complete).unwrap();
        let partial = Event {
            artist_url: None,
            ..complete.clone()
        };
        store
            .create(&Event {
                link: "partial".into(),
                ..partial
            })
            .unwrap();

        let missing = store.list_missing_metadata().unwrap();

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].link, "partial");
    }

    #[test]
    fn digested_events_are_not_enriched_again() {
        let store = Store::open_in_memory().unwrap();
        store.create(&event("bare", now())).unwrap();
        let digested = Event {
            reported_at_upcoming: Some(now()),
            ..event("digested", now())
        };
        store.create(&digested).unwrap();

        let links: Vec<_> = store
            .list_missing_metadata()
            .unwrap()
            .into_iter()
            .map(|e| e.link)
            .collect();

        assert_eq!(links, vec!["bare"]);
    }
}
