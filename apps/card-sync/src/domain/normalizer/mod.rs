//! Card Payload Normalizer
//!
//! Turns raw, possibly malformed backend payloads into a strict
//! [`CardViewModel`]. The normalizer is a pure function that never fails:
//! every field access is type-checked and range-checked, and an unusable
//! value becomes an absent field plus a [`MissingField`] entry rather than a
//! zero or empty placeholder.
//!
//! [`MissingField`]: crate::domain::card::MissingField

pub mod capability;
pub mod fields;
mod levels;
pub mod news;
pub mod sentiment;
pub mod snapshot;

use serde_json::{Value, json};

use self::capability::{card_capability, missing_reason};
use self::fields::{flag, object, text, timestamp, unsigned};
use crate::domain::card::{
    Card, CardKind, CardViewModel, Cards, MissingDataBlock, TICKER_NOT_FOUND,
};
use crate::domain::instrument::InstrumentKey;

/// Summary shown when the backend returned none.
pub const NO_SUMMARY: &str = "No backend summary available.";

/// Records absent fields of one card while passing values through.
pub(crate) struct FieldRecorder<'a> {
    block: &'a mut MissingDataBlock,
    prefix: &'static str,
}

impl<'a> FieldRecorder<'a> {
    pub(crate) const fn new(block: &'a mut MissingDataBlock, kind: CardKind) -> Self {
        Self {
            block,
            prefix: kind.key(),
        }
    }

    fn record(&mut self, field: &str) {
        let key = format!("{}.{field}", self.prefix);
        let reason = missing_reason(&key);
        self.block.push(key, reason, None);
    }

    pub(crate) fn number(&mut self, field: &str, value: Option<f64>) -> Option<f64> {
        if value.is_none() {
            self.record(field);
        }
        value
    }

    pub(crate) fn array(&mut self, field: &str, value: Option<Vec<f64>>) -> Option<Vec<f64>> {
        if value.is_none() {
            self.record(field);
        }
        value
    }
}

/// Card that the backend never produced for this response.
fn absent_card<T>(kind: CardKind, detail: Option<&str>) -> Card<T> {
    let mut card = Card::empty(kind);
    card.missing.push(
        kind.key(),
        card_capability(kind).missing_reason(),
        detail.map(str::to_string),
    );
    card
}

/// Card slot the backend does not implement: always absent.
fn unimplemented_card<T>(kind: CardKind) -> Card<T> {
    let mut card = Card::empty(kind);
    card.missing.push(
        kind.key(),
        crate::domain::card::MissingReason::MissingBackendField,
        Some("not yet implemented by the backend".to_string()),
    );
    card
}

fn error_codes(payload: &Value) -> Vec<String> {
    let mut codes: Vec<String> = payload
        .get("errors")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| text(Some(v)))
                .map(|code| code.to_lowercase())
                .collect()
        })
        .unwrap_or_default();
    codes.dedup();
    codes
}

/// Normalize a `/card/{ticker}` payload.
///
/// The view model is keyed by `requested`, the key the fetch was issued for.
#[must_use]
pub fn normalize(payload: &Value, requested: &InstrumentKey) -> CardViewModel {
    let card_obj = payload.get("card").filter(|card| card.is_object());
    let status = object(Some(payload), "status");
    let header = object(card_obj, "header");
    let tradeability = object(card_obj, "tradeability");
    let tech = object(card_obj, "tech");
    let gap = object(card_obj, "gap");
    let raw_sources = object(card_obj, "raw_sources");
    let server_ts = timestamp(payload.get("server_ts"));

    let enrichment = sentiment::enrichment(status);
    let llm = raw_sources
        .and_then(|sources| sources.get("llm"))
        .or_else(|| card_obj.and_then(|card| card.get("llm")))
        .and_then(Value::as_object);

    let cards = if card_obj.is_some() {
        let news_raw = raw_sources
            .and_then(|sources| sources.get("news"))
            .or_else(|| card_obj.and_then(|card| card.get("news")));
        Cards {
            snapshot: snapshot::build_snapshot(header, tradeability, server_ts),
            levels: levels::build_levels(tech),
            news: news::build_news(news_raw),
            risk_plan: unimplemented_card(CardKind::RiskPlan),
            trade_idea: unimplemented_card(CardKind::TradeIdea),
            gap_analysis: snapshot::build_gap_analysis(gap, tradeability),
        }
    } else {
        let detail = Some("backend returned no card");
        Cards {
            snapshot: absent_card(CardKind::Snapshot, detail),
            levels: absent_card(CardKind::Levels, detail),
            news: absent_card(CardKind::News, detail),
            risk_plan: unimplemented_card(CardKind::RiskPlan),
            trade_idea: unimplemented_card(CardKind::TradeIdea),
            gap_analysis: absent_card(CardKind::GapAnalysis, detail),
        }
    };

    let summary = text(card_obj.and_then(|card| card.get("summary")))
        .unwrap_or_else(|| NO_SUMMARY.to_string());

    CardViewModel {
        ticker: requested.clone(),
        summary,
        cards,
        sentiment: sentiment::build_sentiment(llm, &enrichment),
        has_card: card_obj.is_some(),
        is_missing: flag(payload.get("is_missing")),
        is_stale: flag(payload.get("is_stale")),
        refresh_triggered: flag(payload.get("refresh_triggered")),
        refresh_deduped: flag(payload.get("refresh_deduped")),
        refreshing: flag(status.and_then(|s| s.get("refreshing"))),
        enrichment,
        etag: text(payload.get("etag")),
        version: unsigned(status.and_then(|s| s.get("version"))),
        server_ts,
        errors: error_codes(payload),
    }
}

/// View model for an instrument the backend confirmed does not exist.
#[must_use]
pub fn normalize_not_found(requested: &InstrumentKey) -> CardViewModel {
    normalize(
        &json!({
            "ticker": requested.as_str(),
            "card": null,
            "status": null,
            "errors": [TICKER_NOT_FOUND],
        }),
        requested,
    )
}
