use std::collections::HashMap;

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::metadata::{EnrichError, ResponseCache};
use crate::models::Event;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
const PREFERRED_IMAGE_WIDTH: u32 = 320;
/// Only these categories are worth looking up in a music catalog.
const CATALOG_CATEGORIES: [&str; 2] = ["concert", "comedy"];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ArtistDoc {
    pub name: String,
    #[serde(default)]
    pub external_urls: HashMap<String, String>,
    #[serde(default)]
    pub images: Vec<ImageDoc>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageDoc {
    pub url: String,
    pub width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: Option<ArtistPage>,
}

#[derive(Debug, Deserialize)]
struct ArtistPage {
    #[serde(default)]
    items: Vec<ArtistDoc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Artist links and pictures from the Spotify Web API, authenticated with
/// client credentials.
pub struct SpotifyCatalog {
    token_url: String,
    search_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
    token: Option<String>,
    cache: ResponseCache<(i64, String), Option<ArtistDoc>>,
}

impl SpotifyCatalog {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::with_endpoints(client_id, client_secret, TOKEN_URL, SEARCH_URL)
    }

    pub fn with_endpoints(
        client_id: &str,
        client_secret: &str,
        token_url: &str,
        search_url: &str,
    ) -> Self {
        Self {
            token_url: token_url.to_string(),
            search_url: search_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            client: Client::new(),
            token: None,
            cache: ResponseCache::default(),
        }
    }

    pub async fn init(&mut self) -> Result<(), EnrichError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(EnrichError::Unavailable(format!(
                "spotify token error {status}: {body}"
            )));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| EnrichError::Parse(err.to_string()))?;
        self.token = Some(token.access_token);
        Ok(())
    }

    pub async fn set_artist_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if !catalog_relevant(event) {
            return Ok(());
        }

        let url = self
            .lookup(event)
            .await?
            .and_then(|artist| artist.external_urls.get("spotify").cloned())
            .filter(|url| !url.is_empty());
        if let Some(url) = url {
            event.artist_url = Some(url);
        }
        Ok(())
    }

    pub async fn set_artist_img_url(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if !catalog_relevant(event) {
            return Ok(());
        }

        let url = self
            .lookup(event)
            .await?
            .and_then(|artist| closest_image(&artist.images, PREFERRED_IMAGE_WIDTH));
        if let Some(url) = url {
            event.artist_img_url = Some(url);
        }
        Ok(())
    }

    async fn lookup(&mut self, event: &Event) -> Result<Option<ArtistDoc>, EnrichError> {
        let name = match event.artist_name() {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };
        let key = (event.id, name.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let token = self.token.as_deref().ok_or(EnrichError::NotInitialized)?;
        let mut url = Url::parse(&self.search_url).map_err(|err| EnrichError::Http(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("q", &format!("artist:{name}"))
            .append_pair("type", "artist");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(EnrichError::Unavailable(format!(
                "spotify search error {status}: {body}"
            )));
        }

        let payload: SearchResponse =
            serde_json::from_str(&body).map_err(|err| EnrichError::Parse(err.to_string()))?;
        let artists = payload.artists.map(|page| page.items).unwrap_or_default();
        let artist = pick_artist(&name, artists);
        debug!(artist = %name, found = artist.is_some(), "spotify search");

        self.cache.insert(key, artist.clone());
        Ok(artist)
    }
}

fn catalog_relevant(event: &Event) -> bool {
    event.artist_name().is_some()
        && event
            .category
            .as_deref()
            .is_some_and(|category| CATALOG_CATEGORIES.contains(&category))
}

/// Prefers an exact, case-insensitive name match and falls back to the top
/// search result.
pub fn pick_artist(name: &str, artists: Vec<ArtistDoc>) -> Option<ArtistDoc> {
    let exact = artists
        .iter()
        .position(|artist| artist.name.to_lowercase() == name.to_lowercase());
    match exact {
        Some(index) => artists.into_iter().nth(index),
        None => artists.into_iter().next(),
    }
}

pub fn closest_image(images: &[ImageDoc], width: u32) -> Option<String> {
    images
        .iter()
        .filter(|image| !image.url.is_empty())
        .min_by_key(|image| image.width.unwrap_or(0).abs_diff(width))
        .map(|image| image.url.clone())
}
