use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::AppConfig;
use crate::metadata::{EnrichError, ResponseCache};
use crate::models::Event;

const TEMPERATURE: f32 = 0.0;
const MAX_TOKENS: u32 = 200;
pub const CATEGORIES: [&str; 6] = ["concert", "reading", "theatre", "comedy", "party", "unknown"];

const SYSTEM_PROMPT: &str = "Extract the performer (\"artist\") and the category of the event from the announcement headline.
- Available categories: concert, reading, theatre, comedy, party, unknown.
- Ignore any text in parentheses.
- Ignore \"& Band\".
- Do not wrap the answer in markdown code fences.
Answer in this JSON format: {\"artist\": \"performer\", \"category\": \"category\"}";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub category: String,
}

/// Classifies event headlines through an OpenAI-compatible chat endpoint.
pub struct LlmClassifier {
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
    cache: ResponseCache<i64, Classification>,
}

impl LlmClassifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm_model().to_string(),
            base_url: config.llm_endpoint().to_string(),
            api_key: config.llm_api_key.clone().filter(|key| !key.trim().is_empty()),
            client: Client::new(),
            cache: ResponseCache::default(),
        }
    }

    pub fn init(&self) -> Result<(), EnrichError> {
        Url::parse(&self.base_url)
            .map(|_| ())
            .map_err(|err| EnrichError::Unavailable(format!("invalid LLM endpoint: {err}")))
    }

    pub async fn set_artist(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if event.artist.is_some() {
            return Ok(());
        }
        let classification = self.classify(event).await?;
        if !classification.artist.is_empty() {
            event.artist = Some(classification.artist);
        }
        Ok(())
    }

    pub async fn set_category(&mut self, event: &mut Event) -> Result<(), EnrichError> {
        if event.category.is_some() {
            return Ok(());
        }
        let classification = self.classify(event).await?;
        if !classification.category.is_empty() {
            event.category = Some(classification.category);
        }
        Ok(())
    }

    async fn classify(&mut self, event: &Event) -> Result<Classification, EnrichError> {
        if let Some(hit) = self.cache.get(&event.id) {
            return Ok(hit.clone());
        }

        let content = self.request_completion(&event.name).await?;
        let classification = parse_classification(&content)?;
        debug!(link = %event.link, ?classification, "classified event");

        self.cache.insert(event.id, classification.clone());
        Ok(classification)
    }

    async fn request_completion(&self, headline: &str) -> Result<String, EnrichError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{}/chat/completions", base);

        let payload = json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": headline },
            ],
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .await
            .map_err(|err| EnrichError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(EnrichError::Unavailable(format!(
                "HTTP {}: {}",
                status, text_body
            )));
        }

        let value: serde_json::Value =
            serde_json::from_str(&text_body).map_err(|err| EnrichError::Parse(err.to_string()))?;

        value
            .get("choices")
            .and_then(|choices| choices.as_array())
            .filter(|choices| choices.len() == 1)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EnrichError::Unavailable("LLM response missing content".to_string()))
    }
}

/// Reads the model's JSON answer, tolerating code fences around it. Unknown
/// categories collapse to `unknown`.
pub fn parse_classification(content: &str) -> Result<Classification, EnrichError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let mut parsed: Classification =
        serde_json::from_str(body.trim()).map_err(|err| EnrichError::Parse(err.to_string()))?;

    parsed.artist = parsed.artist.trim().to_string();
    let category = parsed.category.trim().to_lowercase();
    parsed.category = if category.is_empty() {
        category
    } else if CATEGORIES.contains(&category.as_str()) {
        category
    } else {
        "unknown".to_string()
    };
    Ok(parsed)
}
