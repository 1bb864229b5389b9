//! Snapshot and gap-analysis cards.

use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::America::New_York;
use serde_json::{Map, Value};

use super::FieldRecorder;
use super::fields::{finite, first, text, timestamp};
use crate::domain::card::{Card, CardKind, GapAnalysisData, SnapshotData};

/// Whether `as_of` falls on a Saturday or Sunday in exchange-local time.
#[must_use]
pub fn is_exchange_weekend(as_of: DateTime<Utc>) -> bool {
    matches!(
        as_of.with_timezone(&New_York).weekday(),
        Weekday::Sat | Weekday::Sun
    )
}

/// Percent change of `price` vs `open`.
///
/// Forced to exactly `0` when the as-of timestamp is an exchange weekend.
#[must_use]
pub fn change_percent(
    price: Option<f64>,
    open: Option<f64>,
    as_of: Option<DateTime<Utc>>,
) -> Option<f64> {
    if as_of.is_some_and(is_exchange_weekend) {
        return Some(0.0);
    }
    let (price, open) = (price?, open?);
    if open == 0.0 {
        return None;
    }
    let change = (price - open) / open * 100.0;
    change.is_finite().then_some(change)
}

pub(super) fn build_snapshot(
    header: Option<&Map<String, Value>>,
    tradeability: Option<&Map<String, Value>>,
    fallback_as_of: Option<DateTime<Utc>>,
) -> Card<SnapshotData> {
    let mut card = Card::empty(CardKind::Snapshot);
    let mut fields = FieldRecorder::new(&mut card.missing, CardKind::Snapshot);

    let price = fields.number("price", finite(first(header, &["current_price", "price"])));
    let session_open = fields.number(
        "session_open",
        finite(first(header, &["session_open_px", "open"])),
    );
    let prev_close = fields.number("prev_close", finite(first(header, &["prev_close"])));
    let as_of = timestamp(first(header, &["as_of"])).or(fallback_as_of);
    let change = fields.number("change_percent", change_percent(price, session_open, as_of));
    let volume = fields.number("volume", finite(first(header, &["volume"])));
    let market_cap = fields.number("market_cap", finite(first(header, &["market_cap"])));
    let rvol = fields.number("rvol", finite(first(tradeability, &["rvol"])));

    let data = SnapshotData {
        name: text(first(header, &["name"])),
        price,
        session_open,
        prev_close,
        change_percent: change,
        volume,
        market_cap,
        rvol,
        as_of,
    };
    card.data = (!data.is_empty()).then_some(data);
    card
}

pub(super) fn build_gap_analysis(
    gap: Option<&Map<String, Value>>,
    tradeability: Option<&Map<String, Value>>,
) -> Card<GapAnalysisData> {
    let mut card = Card::empty(CardKind::GapAnalysis);
    let mut fields = FieldRecorder::new(&mut card.missing, CardKind::GapAnalysis);

    let gap_pct = fields.number("gap_pct", finite(first(gap, &["gap_pct"])));
    let direction = text(first(gap, &["direction"]))
        .map(|d| d.to_lowercase())
        .filter(|d| d == "up" || d == "down")
        .or_else(|| {
            gap_pct
                .filter(|pct| *pct != 0.0)
                .map(|pct| if pct > 0.0 { "up" } else { "down" }.to_string())
        });
    let rvol = fields.number("rvol", finite(first(tradeability, &["rvol"])));
    let float_shares = fields.number(
        "float_shares",
        finite(first(tradeability, &["float_shares"])),
    );
    let float_rotation = fields.number(
        "float_rotation",
        finite(first(gap, &["float_rotation"]).or_else(|| first(tradeability, &["float_rotation"]))),
    );

    let data = GapAnalysisData {
        gap_pct,
        direction,
        rvol,
        float_shares,
        float_rotation,
    };
    card.data = (!data.is_empty()).then_some(data);
    card
}

/// Carry forward snapshot fields `next` omits from the `prior` card.
///
/// Returns the merged card and the number of fields carried over. A carried
/// field drops its missing-field entry.
#[must_use]
pub fn merge_forward(
    next: &Card<SnapshotData>,
    prior: &Card<SnapshotData>,
) -> (Card<SnapshotData>, usize) {
    let Some(old) = prior.data.as_ref() else {
        return (next.clone(), 0);
    };

    let mut data = next.data.clone().unwrap_or_default();
    let mut missing = next.missing.clone();
    let mut carried = 0;

    let mut carry = |slot: &mut Option<f64>, value: Option<f64>, field: &str| {
        if slot.is_none() && value.is_some() {
            *slot = value;
            missing = missing.without_key(&format!("{}.{field}", CardKind::Snapshot.key()));
            carried += 1;
        }
    };
    carry(&mut data.price, old.price, "price");
    carry(&mut data.session_open, old.session_open, "session_open");
    carry(&mut data.prev_close, old.prev_close, "prev_close");
    carry(&mut data.volume, old.volume, "volume");
    carry(&mut data.market_cap, old.market_cap, "market_cap");
    carry(&mut data.rvol, old.rvol, "rvol");

    if data.name.is_none() {
        data.name.clone_from(&old.name);
    }
    if data.as_of.is_none() {
        data.as_of = old.as_of;
    }

    // A fresh price invalidates the prior change; derive it from the merged inputs.
    let fresh_price = next.data.as_ref().is_some_and(|d| d.price.is_some());
    let derived = change_percent(data.price, data.session_open, data.as_of)
        .or(if fresh_price { None } else { old.change_percent });
    if data.change_percent.is_none() && derived.is_some() {
        data.change_percent = derived;
        missing = missing.without_key(&format!("{}.change_percent", CardKind::Snapshot.key()));
        carried += 1;
    }
    if carried > 0 {
        missing = missing.without_key(CardKind::Snapshot.key());
    }

    let merged = Card {
        data: (!data.is_empty()).then_some(data),
        missing,
    };
    (merged, carried)
}
