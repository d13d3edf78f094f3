use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("missing access token")]
    MissingToken,
    #[error("http error: {0}")]
    Http(String),
    #[error("api error ({status}): {body}")]
    Api { status: StatusCode, body: String },
}

impl TransportError {
    /// Errors no retry within the same batch can fix, such as rejected
    /// credentials or an unknown receiver.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::MissingToken => true,
            TransportError::Http(_) => false,
            TransportError::Api { status, .. } => matches!(
                *status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Delivers one message to a channel. Tracking what was already announced is
/// the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_with_image(
        &self,
        receiver: &str,
        message: &str,
        image: Option<Attachment>,
    ) -> Result<(), TransportError>;
}

pub const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

/// Posts to a group through the Graph API: a photo with caption when an image
/// is available, a plain feed post otherwise.
pub struct GraphPoster {
    token: String,
    client: Client,
}

impl GraphPoster {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(TransportError::MissingToken);
        }
        Ok(Self {
            token,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Transport for GraphPoster {
    async fn send_with_image(
        &self,
        receiver: &str,
        message: &str,
        image: Option<Attachment>,
    ) -> Result<(), TransportError> {
        let request = match image {
            Some(image) => {
                let part = multipart::Part::bytes(image.bytes)
                    .file_name("event")
                    .mime_str(&image.mime_type)
                    .map_err(|err| TransportError::Http(err.to_string()))?;
                let form = multipart::Form::new()
                    .text("caption", message.to_string())
                    .text("access_token", self.token.clone())
                    .part("source", part);
                self.client
                    .post(format!("{GRAPH_BASE}/{receiver}/photos"))
                    .multipart(form)
            }
            None => self
                .client
                .post(format!("{GRAPH_BASE}/{receiver}/feed"))
                .form(&[("message", message), ("access_token", self.token.as_str())]),
        };

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Api { status, body });
        }

        Ok(())
    }
}

/// Writes messages to the log instead of posting them.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send_with_image(
        &self,
        receiver: &str,
        message: &str,
        image: Option<Attachment>,
    ) -> Result<(), TransportError> {
        let image_bytes = image.as_ref().map(|img| img.bytes.len()).unwrap_or(0);
        info!(receiver, image_bytes, "dry run message:\n{}", message);
        Ok(())
    }
}
