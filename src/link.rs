use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError, ConfigStore};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("missing access token")]
    MissingToken,
    #[error("graph request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph api error ({status}): {body}")]
    Api { status: StatusCode, body: String },
    #[error("unexpected graph response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GraphAccount {
    pub id: String,
    pub name: Option<String>,
}

/// Token exchange and identity lookup against the Graph API.
pub struct GraphLinker {
    base_url: String,
    client: Client,
}

impl GraphLinker {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Trades a short-lived user token for a long-lived one.
    pub async fn exchange(
        &self,
        app_id: &str,
        app_secret: &str,
        token: &str,
    ) -> Result<TokenGrant, LinkError> {
        self.get_json(
            "/oauth/access_token",
            &[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("fb_exchange_token", token),
            ],
        )
        .await
    }

    pub async fn me(&self, token: &str) -> Result<GraphAccount, LinkError> {
        self.get_json("/me", &[("fields", "id,name"), ("access_token", token)])
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, LinkError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LinkError::Api { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Validates `token` against `/me` and stores it. With app credentials the
/// token is first exchanged for a long-lived one; a failed exchange keeps the
/// given token. Nothing is written unless the token resolves to an account.
pub async fn link_account(
    linker: &GraphLinker,
    store: &ConfigStore,
    token: &str,
    app: Option<(&str, &str)>,
    now: DateTime<Utc>,
) -> Result<AppConfig, LinkError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(LinkError::MissingToken);
    }

    let mut grant = TokenGrant {
        access_token: token.to_string(),
        expires_in: None,
    };
    if let Some((app_id, app_secret)) = app {
        match linker.exchange(app_id, app_secret, token).await {
            Ok(exchanged) => grant = exchanged,
            Err(err) => warn!(%err, "token exchange failed, keeping the given token"),
        }
    }

    let account = linker.me(&grant.access_token).await?;
    let expires_at = grant
        .expires_in
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime));

    let updated = store.update(|config| {
        config.graph_access_token = Some(grant.access_token.clone());
        config.graph_token_expires_at = expires_at;
        config.graph_user_id = Some(account.id.clone());
        config.graph_user_name = account.name.clone();
    })?;

    info!(user = %account.id, ?expires_at, "linked graph account");
    Ok(updated)
}
