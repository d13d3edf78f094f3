use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils;

pub const DEFAULT_LISTING_URL: &str = "https://www.zollhaus-leer.com/veranstaltungen/";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;
pub const DEFAULT_NOTIFY_DAYS_AHEAD: i64 = 15;
/// Look-ahead beyond one year is rejected.
pub const MAX_NOTIFY_DAYS_AHEAD: i64 = 366;
const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:1234/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("config io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config mutex poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub listing_url: Option<String>,
    pub timezone: Option<String>,
    pub notify_days_ahead: Option<i64>,
    pub assets_dir: Option<PathBuf>,
    pub graph_access_token: Option<String>,
    pub graph_token_expires_at: Option<DateTime<Utc>>,
    pub graph_user_id: Option<String>,
    pub graph_user_name: Option<String>,
    pub graph_app_id: Option<String>,
    pub graph_app_secret: Option<String>,
    pub fresh_channel_id: Option<String>,
    pub upcoming_channel_id: Option<String>,
    pub llm_endpoint: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

impl AppConfig {
    /// Overlays values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("SHOW_NOTIFY_DATABASE") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("SHOW_NOTIFY_LISTING_URL") {
            self.listing_url = Some(value);
        }
        if let Some(value) = get("SHOW_NOTIFY_TIMEZONE") {
            self.timezone = Some(value);
        }
        if let Some(value) = get("SHOW_NOTIFY_DAYS_AHEAD") {
            let days = value.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
                key: "SHOW_NOTIFY_DAYS_AHEAD",
                value: value.clone(),
            })?;
            self.notify_days_ahead = Some(days);
        }
        if let Some(value) = get("SHOW_NOTIFY_ASSETS") {
            self.assets_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("GRAPH_ACCESS_TOKEN") {
            self.graph_access_token = Some(value);
        }
        if let Some(value) = get("GRAPH_APP_ID") {
            self.graph_app_id = Some(value);
        }
        if let Some(value) = get("GRAPH_APP_SECRET") {
            self.graph_app_secret = Some(value);
        }
        if let Some(value) = get("NEW_EVENTS_CHANNEL_ID") {
            self.fresh_channel_id = Some(value);
        }
        if let Some(value) = get("MONTHLY_CHANNEL_ID") {
            self.upcoming_channel_id = Some(value);
        }
        if let Some(value) = get("LLM_ENDPOINT") {
            self.llm_endpoint = Some(value);
        }
        if let Some(value) = get("LLM_MODEL") {
            self.llm_model = Some(value);
        }
        if let Some(value) = get("LLM_API_KEY") {
            self.llm_api_key = Some(value);
        }
        if let Some(value) = get("SPOTIFY_ID") {
            self.spotify_client_id = Some(value);
        }
        if let Some(value) = get("SPOTIFY_SECRET") {
            self.spotify_client_secret = Some(value);
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    pub fn listing_url(&self) -> &str {
        self.listing_url.as_deref().unwrap_or(DEFAULT_LISTING_URL)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.assets_dir.clone().unwrap_or_else(utils::assets_path)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_TIMEZONE),
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::Invalid {
                key: "timezone",
                value: name.to_string(),
            }),
        }
    }

    pub fn notify_days_ahead(&self) -> Result<i64, ConfigError> {
        match self.notify_days_ahead {
            None => Ok(DEFAULT_NOTIFY_DAYS_AHEAD),
            Some(days) if (0..=MAX_NOTIFY_DAYS_AHEAD).contains(&days) => Ok(days),
            Some(days) => Err(ConfigError::Invalid {
                key: "notify_days_ahead",
                value: days.to_string(),
            }),
        }
    }

    pub fn fresh_channel(&self) -> Result<&str, ConfigError> {
        required(&self.fresh_channel_id, "NEW_EVENTS_CHANNEL_ID")
    }

    pub fn upcoming_channel(&self) -> Result<&str, ConfigError> {
        required(&self.upcoming_channel_id, "MONTHLY_CHANNEL_ID")
    }

    pub fn graph_token(&self) -> Result<&str, ConfigError> {
        required(&self.graph_access_token, "GRAPH_ACCESS_TOKEN")
    }

    /// App id and secret, needed only to exchange for a long-lived token.
    pub fn graph_app_credentials(&self) -> Option<(&str, &str)> {
        Some((
            required(&self.graph_app_id, "GRAPH_APP_ID").ok()?,
            required(&self.graph_app_secret, "GRAPH_APP_SECRET").ok()?,
        ))
    }

    pub fn spotify_credentials(&self) -> Result<(&str, &str), ConfigError> {
        Ok((
            required(&self.spotify_client_id, "SPOTIFY_ID")?,
            required(&self.spotify_client_secret, "SPOTIFY_SECRET")?,
        ))
    }

    pub fn llm_endpoint(&self) -> &str {
        self.llm_endpoint.as_deref().unwrap_or(DEFAULT_LLM_ENDPOINT)
    }

    pub fn llm_model(&self) -> &str {
        self.llm_model.as_deref().unwrap_or(DEFAULT_LLM_MODEL)
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let data = read_config(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn read(&self) -> Result<AppConfig, ConfigError> {
        self.data
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| ConfigError::Poisoned)
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.data.lock().map_err(|_| ConfigError::Poisoned)?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    serde_json::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path);
    let contents =
        serde_json::to_string_pretty(config).map_err(|err| ConfigError::Parse(err.to_string()))?;
    fs::write(path, contents).map_err(|err| ConfigError::Io(err.to_string()))
}
