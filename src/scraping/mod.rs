pub mod base;
pub mod zollhaus_html;

use async_trait::async_trait;

use crate::models::CandidateEvent;

/// Produces the events currently listed by a venue.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn source_url(&self) -> &str;
    async fn fetch(&self) -> anyhow::Result<Vec<CandidateEvent>>;
}
