//! Key levels card.

use serde_json::{Map, Value};

use super::FieldRecorder;
use super::fields::{finite, finite_array, first};
use crate::domain::card::{Card, CardKind, LevelsData};

pub(super) fn build_levels(tech: Option<&Map<String, Value>>) -> Card<LevelsData> {
    let mut card = Card::empty(CardKind::Levels);
    let mut fields = FieldRecorder::new(&mut card.missing, CardKind::Levels);

    let support = fields.array("support", sorted(finite_array(first(tech, &["support"]))));
    let resistance = fields.array(
        "resistance",
        sorted(finite_array(first(tech, &["resistance"]))),
    );
    let vwap = fields.number("vwap", finite(first(tech, &["vwap"])));
    let day_high = fields.number("day_high", finite(first(tech, &["day_high", "high"])));
    let day_low = fields.number("day_low", finite(first(tech, &["day_low", "low"])));
    let atr = fields.number("atr", finite(first(tech, &["atr"])));

    let data = LevelsData {
        support,
        resistance,
        vwap,
        day_high,
        day_low,
        atr,
    };
    card.data = (!data.is_empty()).then_some(data);
    card
}

fn sorted(levels: Option<Vec<f64>>) -> Option<Vec<f64>> {
    levels.map(|mut levels| {
        levels.sort_by(f64::total_cmp);
        levels.dedup();
        levels
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::card::MissingReason;
    use serde_json::json;

    #[test]
    fn levels_are_sorted_and_deduplicated() {
        let tech = json!({"support": [101.5, "99", 101.5, null], "vwap": 102.1});
        let card = build_levels(tech.as_object());
        let data = card.data.unwrap();
        assert_eq!(data.support, Some(vec![99.0, 101.5]));
        assert_eq!(data.vwap, Some(102.1));
        assert!(data.resistance.is_none());
        assert!(
            card.missing
                .contains("levels.resistance", MissingReason::MissingTickerData)
        );
        assert!(
            card.missing
                .contains("levels.atr", MissingReason::MissingBackendField)
        );
    }

    #[test]
    fn empty_arrays_are_absent_not_empty() {
        let tech = json!({"support": [], "resistance": ["x"]});
        let card = build_levels(tech.as_object());
        assert!(card.data.is_none());
        assert!(card.missing.has_key("levels.support"));
        assert!(card.missing.has_key("levels.resistance"));
    }
}
