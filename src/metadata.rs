use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{EventStore, StoreError};
use crate::llm::LlmClassifier;
use crate::models::Event;
use crate::spotify::SpotifyCatalog;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment unavailable: {0}")]
    Unavailable(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("enricher used before init")]
    NotInitialized,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Enrich(#[from] EnrichError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lookups that fill the enrichment attributes of an event. Each setter only
/// touches its own field and only writes non-empty results.
#[async_trait]
pub trait Enricher: Send {
    async fn init(&mut self) -> Result<(), EnrichError>;
    async fn set_category(&mut self, event: &mut Event) -> Result<(), EnrichError>;
    async fn set_artist(&mut self, event: &mut Event) -> Result<(), EnrichError>;
    async fn set_artist_url(&mut self, event: &mut Event) -> Result<(), EnrichError>;
    async fn set_artist_img_url(&mut self, event: &mut Event) -> Result<(), EnrichError>;
}

/// Remembers the last response so several attributes derived from one lookup
/// cost a single request per event.
#[derive(Debug)]
pub struct ResponseCache<K, T> {
    entry: Option<(K, T)>,
}

impl<K, T> Default for ResponseCache<K, T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<K: PartialEq, T> ResponseCache<K, T> {
    pub fn get(&self, key: &K) -> Option<&T> {
        match &self.entry {
            Some((cached, value)) if cached == key => Some(value),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: K, value: T) {
        self.entry = Some((key, value));
    }
}

pub struct MetadataSync<E> {
    enricher: E,
}

impl<E: Enricher> MetadataSync<E> {
    pub fn new(enricher: E) -> Self {
        Self { enricher }
    }

    /// Fills whatever enrichment attributes are still unset. The first failing
    /// lookup is returned; attributes filled before it stay on the event.
    pub async fn sync(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if event.category.is_none() {
            self.enricher.set_category(event).await?;
        }
        if event.artist.is_none() {
            self.enricher.set_artist(event).await?;
        }

        if event.artist_name().is_none() {
            debug!(link = %event.link, "no artist known, skipping catalog lookups");
            return Ok(());
        }

        if event.artist_url.is_none() {
            self.enricher.set_artist_url(event).await?;
        }
        if event.artist_img_url.is_none() {
            self.enricher.set_artist_img_url(event).await?;
        }
        Ok(())
    }

    /// Syncs every stored event with missing attributes. Enrichment failures
    /// are logged and the partial result is still saved; store failures stop
    /// the pass.
    pub async fn run<S: EventStore + ?Sized>(&mut self, store: &S) -> Result<usize, SyncError> {
        let events = store.list_missing_metadata()?;
        if events.is_empty() {
            info!("no events without metadata");
            return Ok(0);
        }

        self.enricher.init().await?;

        let mut failed = 0;
        for mut event in events.into_iter() {
            if let Err(err) = self.sync(&mut event).await {
                failed += 1;
                warn!(link = %event.link, %err, "metadata sync incomplete");
            }
            store.save(&event)?;
        }

        info!(failed, "metadata sync finished");
        Ok(failed)
    }
}

/// Artist and category from the language model, links and pictures from the
/// music catalog.
pub struct ServiceEnricher {
    llm: LlmClassifier,
    catalog: SpotifyCatalog,
}

impl ServiceEnricher {
    pub fn new(llm: LlmClassifier, catalog: SpotifyCatalog) -> Self {
        Self { llm, catalog }
    }
}

#[async_trait]
impl Enricher for ServiceEnricher {
    async fn init(&mut self) -> Result<(), EnrichError> {
        self.llm.init()?;
        self.catalog.init().await
    }

    async fn set_category(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        self.llm.set_category(event).await
    }

    async fn set_artist(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        self.llm.set_artist(event).await
    }

    async fn set_artist_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        self.catalog.set_artist_url(event).await
    }

    async fn set_artist_img_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        self.catalog.set_artist_img_url(event).await
    }
}
