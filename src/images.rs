use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Event;
use crate::transport::Attachment;

const FALLBACK_MIME: &str = "image/jpeg";
/// Attached pictures fit into a square of this many pixels.
pub const MAX_IMAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum ImageFetchError {
    #[error("image download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("unreadable image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Picks the picture that goes along with an event announcement.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, event: &Event) -> Option<Attachment>;
}

/// Downloads the artist image and falls back to a bundled picture per
/// category.
pub struct HttpImages {
    client: Client,
    assets_dir: PathBuf,
}

impl HttpImages {
    pub fn new(assets_dir: PathBuf) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, assets_dir }
    }

    async fn download(&self, url: &str) -> Result<Attachment, ImageFetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(fit_image(&bytes)?)
    }

    async fn fallback(&self, event: &Event) -> Option<Attachment> {
        let path = self.assets_dir.join(fallback_file(event.category.as_deref()));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(Attachment {
                bytes,
                mime_type: FALLBACK_MIME.to_string(),
            }),
            Err(err) => {
                warn!(?path, %err, "no fallback image available");
                None
            }
        }
    }
}

#[async_trait]
impl ImageResolver for HttpImages {
    async fn resolve(&self, event: &Event) -> Option<Attachment> {
        if let Some(url) = event.artist_img_url.as_deref() {
            match self.download(url).await {
                Ok(image) => return Some(image),
                Err(err) => debug!(url, %err, "artist image unusable"),
            }
        }
        self.fallback(event).await
    }
}

/// Shrinks the picture to fit `MAX_IMAGE_SIZE` on both edges, keeping the
/// aspect ratio, and re-encodes it in its own format. Formats without an
/// encoder become JPEG.
pub fn fit_image(bytes: &[u8]) -> Result<Attachment, image::ImageError> {
    let source = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, source)?;

    let fitted = if decoded.width() > MAX_IMAGE_SIZE || decoded.height() > MAX_IMAGE_SIZE {
        decoded.resize(MAX_IMAGE_SIZE, MAX_IMAGE_SIZE, FilterType::Lanczos3)
    } else {
        decoded
    };

    let format = match source {
        ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp => source,
        _ => ImageFormat::Jpeg,
    };
    // JPEG has no alpha channel; GIF frames are encoded from RGBA.
    let fitted = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(fitted.to_rgb8()),
        ImageFormat::Gif => DynamicImage::ImageRgba8(fitted.to_rgba8()),
        _ => fitted,
    };

    let mut out = Cursor::new(Vec::new());
    fitted.write_to(&mut out, format)?;
    Ok(Attachment {
        bytes: out.into_inner(),
        mime_type: format.to_mime_type().to_string(),
    })
}

pub fn fallback_file(category: Option<&str>) -> &'static str {
    match category {
        Some("comedy") => "comedy.jpeg",
        Some("concert") => "concert.jpeg",
        Some("party") => "party.jpeg",
        Some("theatre") => "theatre.jpeg",
        Some("reading") => "reading.jpeg",
        _ => "fallback.jpeg",
    }
}
