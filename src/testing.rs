//! In-memory stand-ins for the store, the transport and the enrichment
//! services, shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::db::{EventStore, StoreError, StoreResult};
use crate::images::ImageResolver;
use crate::metadata::{EnrichError, Enricher, ResponseCache};
use crate::models::Event;
use crate::transport::{Attachment, Transport, TransportError};

#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<Event>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn mark_all_reported(&self, at: DateTime<Utc>) {
        for event in self.events.lock().unwrap().iter_mut() {
            event.reported_at_new = Some(at);
            event.reported_at_upcoming = Some(at);
        }
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    fn select(&self, keep: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut found: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|&event| keep(event))
            .cloned()
            .collect();
        found.sort_by_key(|event| event.date);
        found
    }
}

impl EventStore for MemoryStore {
    fn create(&self, event: &Event) -> StoreResult<i64> {
        self.check_writable()?;
        let mut events = self.events.lock().unwrap();
        let id = events.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        events.push(Event {
            id,
            created_at: event.created_at.or_else(|| Some(Utc::now())),
            ..event.clone()
        });
        Ok(id)
    }

    fn update(&self, event: &Event) -> StoreResult<()> {
        self.check_writable()?;
        let mut events = self.events.lock().unwrap();
        let stored = events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or(StoreError::NotFound(event.id))?;
        *stored = event.clone();
        Ok(())
    }

    fn find_by_link(&self, link: &str) -> StoreResult<Option<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.link == link)
            .cloned())
    }

    fn find_by_id(&self, id: i64) -> StoreResult<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn list_fresh(&self, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        Ok(self.select(|e| e.reported_at_new.is_none() && e.date >= now))
    }

    fn list_in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        Ok(self.select(|e| e.reported_at_upcoming.is_none() && e.date >= from && e.date <= to))
    }

    fn list_missing_metadata(&self) -> StoreResult<Vec<Event>> {
        Ok(self.select(|e| e.reported_at_upcoming.is_none() && e.missing_metadata()))
    }
}

/// Records successful sends. Messages containing a registered pattern fail
/// with a transient or a fatal error instead.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    transient: Mutex<Vec<String>>,
    fatal: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_for(&self, pattern: &str) {
        self.transient.lock().unwrap().push(pattern.to_string());
    }

    pub fn fatal_for(&self, pattern: &str) {
        self.fatal.lock().unwrap().push(pattern.to_string());
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_with_image(
        &self,
        receiver: &str,
        message: &str,
        _image: Option<Attachment>,
    ) -> Result<(), TransportError> {
        let matches = |patterns: &Mutex<Vec<String>>| {
            patterns
                .lock()
                .unwrap()
                .iter()
                .any(|pattern| message.contains(pattern.as_str()))
        };
        if matches(&self.fatal) {
            return Err(TransportError::Api {
                status: StatusCode::UNAUTHORIZED,
                body: "invalid token".into(),
            });
        }
        if matches(&self.transient) {
            return Err(TransportError::Http("connection reset".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((receiver.to_string(), message.to_string()));
        Ok(())
    }
}

pub struct NoImages;

#[async_trait]
impl ImageResolver for NoImages {
    async fn resolve(&self, _event: &Event) -> Option<Attachment> {
        None
    }
}

/// Copies each attribute from a template event.
pub struct TemplateEnricher {
    template: Event,
    pub fail_on_artist_url: bool,
    pub initialized: bool,
}

impl TemplateEnricher {
    pub fn new(template: Event) -> Self {
        Self {
            template,
            fail_on_artist_url: false,
            initialized: false,
        }
    }
}

#[async_trait]
impl Enricher for TemplateEnricher {
    async fn init(&mut self) -> Result<(), EnrichError> {
        self.initialized = true;
        Ok(())
    }

    async fn set_category(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        event.category = self.template.category.clone();
        Ok(())
    }

    async fn set_artist(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        event.artist = self.template.artist.clone();
        Ok(())
    }

    async fn set_artist_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if self.fail_on_artist_url {
            return Err(EnrichError::Unavailable("catalog down".into()));
        }
        event.artist_url = self.template.artist_url.clone();
        Ok(())
    }

    async fn set_artist_img_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        event.artist_img_url = self.template.artist_img_url.clone();
        Ok(())
    }
}

/// Counts backend calls behind the same caches the real services use.
#[derive(Default)]
pub struct CountingEnricher {
    pub classifications: usize,
    pub searches: usize,
    classified: ResponseCache<i64, String>,
    searched: ResponseCache<(i64, String), (String, String)>,
}

impl CountingEnricher {
    fn classify(&mut self, event: &Event) -> String {
        if let Some(hit) = self.classified.get(&event.id) {
            return hit.clone();
        }
        self.classifications += 1;
        let artist = event.name.clone();
        self.classified.insert(event.id, artist.clone());
        artist
    }

    fn search(&mut self, event: &Event) -> Option<(String, String)> {
        let artist = event.artist_name()?.to_string();
        let key = (event.id, artist.clone());
        if let Some(hit) = self.searched.get(&key) {
            return Some(hit.clone());
        }
        self.searches += 1;
        let found = (format!("catalog://{artist}"), format!("img://{artist}"));
        self.searched.insert(key, found.clone());
        Some(found)
    }
}

#[async_trait]
impl Enricher for CountingEnricher {
    async fn init(&mut self) -> Result<(), EnrichError> {
        Ok(())
    }

    async fn set_category(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        self.classify(event);
        event.category = Some("concert".into());
        Ok(())
    }

    async fn set_artist(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        event.artist = Some(self.classify(event));
        Ok(())
    }

    async fn set_artist_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if let Some((url, _)) = self.search(event) {
            event.artist_url = Some(url);
        }
        Ok(())
    }

    async fn set_artist_img_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if let Some((_, img)) = self.search(event) {
            event.artist_img_url = Some(img);
        }
        Ok(())
    }
}

pub struct StubResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl StubResponse {
    pub fn json(body: &str) -> Self {
        Self::bytes("application/json", body.as_bytes().to_vec())
    }

    pub fn bytes(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type,
            body,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// Local HTTP/1.1 endpoint answering every request through `respond`, which
/// gets the request line (`GET /path?query HTTP/1.1`). Connections are closed
/// after each response.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(request_line) = read_request(&mut socket).await else {
                    continue;
                };
                let response = respond(&request_line);
                seen.lock().unwrap().push(request_line);

                let head = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    response.status,
                    response.content_type,
                    response.body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&response.body).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose line mentions `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|line| line.contains(path))
            .count()
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let body_len = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + body_len {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
    }

    head.lines().next().map(str::to_string)
}
