use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::base;
use super::CandidateSource;
use crate::models::CandidateEvent;

/// Listing dates carry no time; events are assumed to start in the morning of
/// that day so they stay "today" across the whole day.
const START_HOUR: u32 = 6;

static CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".elementor-6082").expect("zollhaus card selector"));
static NAME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h3.elementor-heading-title").expect("zollhaus name selector"));
static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".elementor-heading-title").expect("zollhaus heading selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("zollhaus link selector"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img.attachment-large").expect("zollhaus image selector"));
static LIST_ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.elementor-icon-list-item").expect("zollhaus list selector"));
static LIST_ICON_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("span.elementor-icon-list-icon i").expect("zollhaus icon selector")
});
static LIST_TEXT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("span.elementor-icon-list-text").expect("zollhaus list text selector")
});
static STATUS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.elementor-element-5bb6689 .elementor-button-text")
        .expect("zollhaus status selector")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:Mo|Di|Mi|Do|Fr|Sa|So)\., (\d{2}\.\d{2}\.\d{4})$").expect("valid date regex")
});

const MAP_PIN_CLASS: &str = "fad fa-map-pin";

pub struct ZollhausScraper {
    listing_url: String,
    tz: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingCard {
    pub name: String,
    pub date: DateTime<Utc>,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPage {
    pub image: Option<String>,
    pub place: Option<String>,
    pub status: Option<String>,
}

impl ZollhausScraper {
    pub fn new(listing_url: &str, tz: Tz) -> Self {
        Self {
            listing_url: listing_url.to_string(),
            tz,
        }
    }

    pub(crate) fn parse_listing(&self, html: &str) -> Vec<ListingCard> {
        let document = Html::parse_document(html);
        let mut cards = Vec::new();

        for card in document.select(&CARD_SELECTOR) {
            let name = base::first_text(&card, &NAME_SELECTOR).unwrap_or_default();

            let date = card
                .select(&HEADING_SELECTOR)
                .map(|heading| heading.text().collect::<String>())
                .find_map(|text| parse_listing_date(text.trim(), self.tz));
            let Some(date) = date else {
                debug!(card = %name, "card without date");
                continue;
            };

            let link = base::absolute_url(
                &self.listing_url,
                base::first_attr(&card, &LINK_SELECTOR, "href"),
            );
            let Some(link) = link else {
                debug!(card = %name, "card without link");
                continue;
            };

            cards.push(ListingCard { name, date, link });
        }

        cards
    }
}

pub fn parse_listing_date(text: &str, tz: Tz) -> Option<DateTime<Utc>> {
    DATE_RE.captures_iter(text).find_map(|caps| {
        let day = NaiveDate::parse_from_str(caps.get(1)?.as_str(), "%d.%m.%Y").ok()?;
        base::to_utc(day, NaiveTime::from_hms_opt(START_HOUR, 0, 0)?, tz)
    })
}

pub fn parse_detail(html: &str) -> DetailPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let image = root.select(&IMAGE_SELECTOR).next().and_then(|img| {
        ["data-lazy-src", "src"]
            .iter()
            .filter_map(|attr| img.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    });

    let place = root
        .select(&LIST_ITEM_SELECTOR)
        .find(|item| {
            item.select(&LIST_ICON_SELECTOR)
                .any(|icon| icon.value().attr("class") == Some(MAP_PIN_CLASS))
        })
        .and_then(|item| base::first_text(&item, &LIST_TEXT_SELECTOR));

    let status = base::first_text(&root, &STATUS_SELECTOR);

    DetailPage {
        image,
        place,
        status,
    }
}

fn merge(card: ListingCard, detail: DetailPage) -> CandidateEvent {
    CandidateEvent {
        name: card.name,
        place: detail.place.unwrap_or_default(),
        status: detail.status.unwrap_or_default(),
        link: card.link,
        date: card.date,
        artist_img_url: detail.image,
    }
}

#[async_trait]
impl CandidateSource for ZollhausScraper {
    fn source_url(&self) -> &str {
        &self.listing_url
    }

    /// Fetches the listing, then every detail page concurrently. Returns once
    /// all detail requests have finished.
    async fn fetch(&self) -> Result<Vec<CandidateEvent>> {
        let client = base::CLIENT.clone();
        let html = base::fetch_html(&client, &self.listing_url).await?;
        let cards = self.parse_listing(&html);
        info!(count = cards.len(), "parsed listing");

        let mut pending = JoinSet::new();
        for (index, card) in cards.iter().enumerate() {
            let client = client.clone();
            let link = card.link.clone();
            pending.spawn(async move {
                let detail = base::fetch_html(&client, &link)
                    .await
                    .map(|html| parse_detail(&html));
                (index, detail)
            });
        }

        let mut details = vec![DetailPage::default(); cards.len()];
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((index, Ok(detail))) => details[index] = detail,
                Ok((index, Err(err))) => {
                    warn!(link = %cards[index].link, %err, "failed to visit detail page");
                }
                Err(err) => warn!(%err, "detail task failed"),
            }
        }

        Ok(cards.into_iter().zip(details).map(|(c, d)| merge(c, d)).collect())
    }
}
