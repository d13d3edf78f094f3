pub mod config;
pub mod db;
pub mod images;
pub mod link;
pub mod llm;
pub mod message;
pub mod metadata;
pub mod models;
pub mod reconcile;
pub mod scheduler;
pub mod scraping;
pub mod spotify;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use config::{AppConfig, ConfigStore};
use db::Store;
use images::HttpImages;
use link::GraphLinker;
use llm::LlmClassifier;
use message::MessageKind;
use metadata::{MetadataSync, ServiceEnricher};
use scheduler::{Notifier, PassReport};
use scraping::zollhaus_html::ZollhausScraper;
use scraping::CandidateSource;
use spotify::SpotifyCatalog;
use transport::{GraphPoster, LogTransport, Transport, GRAPH_BASE};

/// Reads `config.json` from the data directory and overlays the environment.
pub fn load_config() -> Result<AppConfig> {
    let mut config = ConfigStore::load()
        .and_then(|store| store.read())
        .context("failed to load configuration")?;
    config.apply_env()?;
    Ok(config)
}

/// Scrapes the venue listing and reconciles the result into the store.
pub async fn crawl(config: &AppConfig) -> Result<usize> {
    let tz = config.tz()?;
    let store = Store::open(config.database_path()).context("failed to open event store")?;
    let source = ZollhausScraper::new(config.listing_url(), tz);

    let candidates = source
        .fetch()
        .await
        .with_context(|| format!("failed to crawl {}", source.source_url()))?;
    let saved = reconcile::persist_candidates(&store, &candidates, Utc::now())?;

    info!(found = candidates.len(), saved, "crawl finished");
    Ok(saved)
}

/// Runs one announcement pass. A dry run logs the messages and leaves the
/// report flags untouched.
pub async fn notify(config: &AppConfig, kind: MessageKind, dry_run: bool) -> Result<PassReport> {
    let receiver = match kind {
        MessageKind::Fresh => config.fresh_channel()?,
        MessageKind::Upcoming => config.upcoming_channel()?,
    }
    .to_string();
    let tz = config.tz()?;
    let days_ahead = config.notify_days_ahead()?;
    let images = HttpImages::new(config.assets_dir());

    if dry_run {
        let store = Store::open(config.database_path())?;
        let notifier = Notifier::new(store, LogTransport, images, tz, days_ahead).dry_run(true);
        return run_pass(&notifier, kind, &receiver).await;
    }

    let transport = GraphPoster::new(config.graph_token()?)?;
    let store = Store::open(config.database_path())?;
    let notifier = Notifier::new(store, transport, images, tz, days_ahead);
    run_pass(&notifier, kind, &receiver).await
}

async fn run_pass<T: Transport>(
    notifier: &Notifier<Store, T, HttpImages>,
    kind: MessageKind,
    receiver: &str,
) -> Result<PassReport> {
    let now = Utc::now();
    let report = match kind {
        MessageKind::Fresh => notifier.send_fresh(receiver, now).await?,
        MessageKind::Upcoming => notifier.send_upcoming(receiver, now).await?,
    };
    Ok(report)
}

/// Fills missing artist, category and catalog data. Returns the number of
/// events that could not be completed.
pub async fn sync_metadata(config: &AppConfig) -> Result<usize> {
    let (client_id, client_secret) = config.spotify_credentials()?;
    let enricher = ServiceEnricher::new(
        LlmClassifier::from_config(config),
        SpotifyCatalog::new(client_id, client_secret),
    );
    let store = Store::open(config.database_path())?;

    let failed = MetadataSync::new(enricher).run(&store).await?;
    Ok(failed)
}

/// Verifies a Graph token (exchanging it when app credentials are configured)
/// and saves it to `config.json`. Without `token` the configured one is
/// re-validated.
pub async fn link(token: Option<&str>) -> Result<AppConfig> {
    let store = ConfigStore::load().context("failed to load configuration")?;
    let mut config = store.read()?;
    config.apply_env()?;

    let token = match token {
        Some(token) => token.to_string(),
        None => config.graph_token()?.to_string(),
    };
    let linked = link::link_account(
        &GraphLinker::new(GRAPH_BASE),
        &store,
        &token,
        config.graph_app_credentials(),
        Utc::now(),
    )
    .await?;
    Ok(linked)
}
