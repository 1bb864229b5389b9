//! Sentiment sub-model and enrichment state.

use serde_json::{Map, Value};

use super::capability::missing_reason;
use super::fields::{finite, first, flag, text};
use crate::domain::card::{
    Card, Enrichment, MissingDataBlock, Sentiment, SentimentLabel, SentimentSource,
};

const IMPACT_WEIGHT: f64 = 0.55;
const CONFIDENCE_WEIGHT: f64 = 0.25;
const SIGNAL_WEIGHT: f64 = 0.20;

/// Resolve enrichment state from the status object. Pending wins over failed.
pub(super) fn enrichment(status: Option<&Map<String, Value>>) -> Enrichment {
    let state = text(first(status, &["llm_status", "enrichment_status"]))
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let pending = flag(first(status, &["llm_pending"]))
        || matches!(
            state.as_str(),
            "pending" | "queued" | "running" | "in_progress"
        );
    if pending {
        return Enrichment::Pending;
    }

    let failed = flag(first(status, &["llm_failed"])) || matches!(state.as_str(), "failed" | "error");
    if failed {
        return Enrichment::Failed {
            detail: text(first(status, &["llm_error", "enrichment_error"])),
        };
    }

    match state.as_str() {
        "complete" | "completed" | "done" | "ok" | "ready" => Enrichment::Complete,
        _ => Enrichment::Unknown,
    }
}

fn signal_score(signal: &str) -> Option<f64> {
    match signal.to_lowercase().as_str() {
        "bullish" | "positive" => Some(100.0),
        "bearish" | "negative" => Some(0.0),
        "neutral" | "mixed" => Some(50.0),
        _ => None,
    }
}

/// Weighted blend of impact, confidence and categorical signal.
#[must_use]
pub fn derive_score(impact: Option<f64>, confidence: Option<f64>, signal: Option<&str>) -> Option<f64> {
    let confidence = confidence.map(|c| if c <= 1.0 { c * 100.0 } else { c });
    let inputs = [
        (impact, IMPACT_WEIGHT),
        (confidence, CONFIDENCE_WEIGHT),
        (signal.and_then(signal_score), SIGNAL_WEIGHT),
    ];

    let (weighted, total) = inputs
        .iter()
        .filter_map(|(value, weight)| value.map(|v| (v.clamp(0.0, 100.0), *weight)))
        .fold((0.0, 0.0), |(sum, total), (value, weight)| {
            (sum + value * weight, total + weight)
        });

    (total > 0.0).then(|| weighted / total)
}

pub(super) fn build_sentiment(
    llm: Option<&Map<String, Value>>,
    enrichment: &Enrichment,
) -> Card<Sentiment> {
    let mut card = Card {
        data: None,
        missing: MissingDataBlock::new("Sentiment"),
    };

    let backend_score = finite(first(llm, &["sentiment_score"]))
        .filter(|score| (0.0..=100.0).contains(score));

    let sentiment = if let Some(score) = backend_score {
        Some((score, SentimentSource::Backend))
    } else {
        let signal = text(first(llm, &["signal", "sentiment"]));
        derive_score(
            finite(first(llm, &["impact_score"])),
            finite(first(llm, &["confidence"])),
            signal.as_deref(),
        )
        .map(|score| (score, SentimentSource::Derived))
    };

    match sentiment {
        Some((score, source)) => {
            card.data = Some(Sentiment {
                score,
                label: SentimentLabel::from_score(score),
                source,
            });
        }
        None => {
            let detail = match enrichment {
                Enrichment::Pending => Some("enrichment pending".to_string()),
                Enrichment::Failed { detail: Some(d) } => Some(format!("enrichment failed: {d}")),
                Enrichment::Failed { detail: None } => Some("enrichment failed".to_string()),
                Enrichment::Unknown | Enrichment::Complete => None,
            };
            card.missing
                .push("sentiment.score", missing_reason("sentiment.score"), detail);
        }
    }
    card
}
