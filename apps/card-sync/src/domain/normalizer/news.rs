//! News card: dedup, newest-first, signal filtering.

use std::collections::HashSet;

use serde_json::Value;

use super::capability::missing_reason;
use super::fields::{first, text, timestamp};
use crate::domain::card::{Card, CardKind, NewsData, NewsItem};

/// Maximum number of items on the card.
pub const MAX_NEWS_ITEMS: usize = 5;

/// Headline keywords that mark an item as signal.
const SIGNAL_KEYWORDS: &[&str] = &[
    "upgrade",
    "downgrade",
    "beats",
    "misses",
    "guidance",
    "earnings",
    "fda",
    "approval",
    "acquisition",
    "acquire",
    "merger",
    "offering",
    "lawsuit",
    "recall",
    "partnership",
    "buyback",
    "halt",
    "bankruptcy",
    "investigation",
    "contract",
];

/// Whether a headline contains a signal keyword.
#[must_use]
pub fn headline_is_signal(headline: &str) -> bool {
    let lower = headline.to_lowercase();
    SIGNAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn parse_item(value: &Value) -> Option<NewsItem> {
    let map = value.as_object();
    let headline = text(first(map, &["headline", "title"]))?;
    let url = text(first(map, &["url", "link"]))
        .filter(|url| url.starts_with("https://") || url.starts_with("http://"));
    let sentiment = text(first(map, &["sentiment"])).map(|s| s.to_lowercase());
    let is_signal = sentiment.is_some() || headline_is_signal(&headline);

    Some(NewsItem {
        url,
        source: text(first(map, &["source", "publisher"])),
        published_at: timestamp(first(map, &["published_at", "datetime", "time"])),
        sentiment,
        is_signal,
        headline,
    })
}

fn dedup_key(item: &NewsItem) -> String {
    item.url
        .as_deref()
        .unwrap_or(&item.headline)
        .trim()
        .to_lowercase()
}

pub(super) fn build_news(raw: Option<&Value>) -> Card<NewsData> {
    let mut card = Card::empty(CardKind::News);

    let mut items: Vec<NewsItem> = raw
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(parse_item).collect())
        .unwrap_or_default();

    // Newest first; undated items sink to the end in arrival order.
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(dedup_key(item)));

    let has_signal = items.iter().any(|item| item.is_signal);
    let selected: Vec<NewsItem> = items
        .into_iter()
        .filter(|item| !has_signal || item.is_signal)
        .take(MAX_NEWS_ITEMS)
        .collect();

    if selected.is_empty() {
        card.missing.push("news.items", missing_reason("news.items"), None);
        return card;
    }

    for (index, item) in selected.iter().enumerate() {
        if item.url.is_none() {
            let key = format!("news[{index}].url");
            let reason = missing_reason(&key);
            card.missing.push(key, reason, None);
        }
    }

    card.data = Some(NewsData { items: selected });
    card
}
