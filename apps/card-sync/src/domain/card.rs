//! Card View Model
//!
//! The canonical per-instrument synchronized state. Every numeric or array
//! field is either a backend-sourced value or `None`; a `None` is always
//! paired with a [`MissingField`] in the owning card's [`MissingDataBlock`].
//! View models are never mutated after construction: each fetch produces a
//! new one that supersedes the cached value.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::instrument::InstrumentKey;

/// Backend error code for an instrument that does not exist.
pub const TICKER_NOT_FOUND: &str = "ticker_not_found";

// =============================================================================
// Missing Data
// =============================================================================

/// Why a field is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// The backend supports the field but has no value for this instrument.
    MissingTickerData,
    /// The backend does not implement the field yet.
    MissingBackendField,
}

impl MissingReason {
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTickerData => "missing_ticker_data",
            Self::MissingBackendField => "missing_backend_field",
        }
    }
}

/// Explicit declaration that a value is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingField {
    /// Dotted field path (`snapshot.price`, `news[2].url`).
    pub key: String,
    /// Why it is absent.
    pub reason: MissingReason,
    /// Optional human-readable explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Titled group of missing fields, deduplicated by `(key, reason)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDataBlock {
    /// Block title shown above the list.
    pub title: String,
    fields: Vec<MissingField>,
}

impl MissingDataBlock {
    /// Create an empty block.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    /// Record a missing field. Duplicate `(key, reason)` pairs are ignored.
    pub fn push(&mut self, key: impl Into<String>, reason: MissingReason, detail: Option<String>) {
        let key = key.into();
        if self.contains(&key, reason) {
            return;
        }
        self.fields.push(MissingField {
            key,
            reason,
            detail,
        });
    }

    /// Whether `(key, reason)` is recorded.
    #[must_use]
    pub fn contains(&self, key: &str, reason: MissingReason) -> bool {
        self.fields
            .iter()
            .any(|field| field.key == key && field.reason == reason)
    }

    /// Whether any entry exists for `key`.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.fields.iter().any(|field| field.key == key)
    }

    /// Return a copy without entries for `key`.
    #[must_use]
    pub fn without_key(&self, key: &str) -> Self {
        Self {
            title: self.title.clone(),
            fields: self
                .fields
                .iter()
                .filter(|field| field.key != key)
                .cloned()
                .collect(),
        }
    }

    /// Recorded fields in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[MissingField] {
        &self.fields
    }

    /// Whether the block is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// =============================================================================
// Cards
// =============================================================================

/// The fixed set of card slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    /// Price snapshot.
    Snapshot,
    /// Support/resistance and intraday levels.
    Levels,
    /// Signal news.
    News,
    /// Risk plan (not produced by the backend yet).
    RiskPlan,
    /// Trade idea (not produced by the backend yet).
    TradeIdea,
    /// Opening gap analysis.
    GapAnalysis,
}

impl CardKind {
    /// All card kinds in display order.
    pub const ALL: [Self; 6] = [
        Self::Snapshot,
        Self::Levels,
        Self::News,
        Self::RiskPlan,
        Self::TradeIdea,
        Self::GapAnalysis,
    ];

    /// Field-path prefix of the card.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Levels => "levels",
            Self::News => "news",
            Self::RiskPlan => "risk_plan",
            Self::TradeIdea => "trade_idea",
            Self::GapAnalysis => "gap_analysis",
        }
    }

    /// Title of the card's missing-data block.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Snapshot => "Snapshot",
            Self::Levels => "Key Levels",
            Self::News => "News",
            Self::RiskPlan => "Risk Plan",
            Self::TradeIdea => "Trade Idea",
            Self::GapAnalysis => "Gap Analysis",
        }
    }
}

/// One typed card: data when the backend produced it, and what is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card<T> {
    /// Card payload; `None` when nothing usable was returned.
    pub data: Option<T>,
    /// Missing-field declarations for this card.
    pub missing: MissingDataBlock,
}

impl<T> Card<T> {
    /// Card with no data and an empty missing block.
    #[must_use]
    pub fn empty(kind: CardKind) -> Self {
        Self {
            data: None,
            missing: MissingDataBlock::new(kind.title()),
        }
    }
}

/// Price snapshot card.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotData {
    /// Company or instrument name.
    pub name: Option<String>,
    /// Last price.
    pub price: Option<f64>,
    /// Session open price.
    pub session_open: Option<f64>,
    /// Previous close.
    pub prev_close: Option<f64>,
    /// Percent change vs session open (`0` on weekends).
    pub change_percent: Option<f64>,
    /// Session volume.
    pub volume: Option<f64>,
    /// Market capitalization.
    pub market_cap: Option<f64>,
    /// Relative volume.
    pub rvol: Option<f64>,
    /// As-of timestamp of the snapshot.
    pub as_of: Option<DateTime<Utc>>,
}

impl SnapshotData {
    /// Whether no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.session_open.is_none()
            && self.prev_close.is_none()
            && self.change_percent.is_none()
            && self.volume.is_none()
            && self.market_cap.is_none()
            && self.rvol.is_none()
    }
}

/// Key levels card.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelsData {
    /// Support levels, ascending.
    pub support: Option<Vec<f64>>,
    /// Resistance levels, ascending.
    pub resistance: Option<Vec<f64>>,
    /// Session VWAP.
    pub vwap: Option<f64>,
    /// Session high.
    pub day_high: Option<f64>,
    /// Session low.
    pub day_low: Option<f64>,
    /// Average true range.
    pub atr: Option<f64>,
}

impl LevelsData {
    /// Whether no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.support.is_none()
            && self.resistance.is_none()
            && self.vwap.is_none()
            && self.day_high.is_none()
            && self.day_low.is_none()
            && self.atr.is_none()
    }
}

/// One news headline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    /// Headline text.
    pub headline: String,
    /// Article URL, when resolvable.
    pub url: Option<String>,
    /// Publisher.
    pub source: Option<String>,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// Explicit sentiment tag from the backend.
    pub sentiment: Option<String>,
    /// Whether the item passed the signal filter.
    pub is_signal: bool,
}

/// News card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsData {
    /// Up to five items, newest first.
    pub items: Vec<NewsItem>,
}

/// Gap analysis card.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GapAnalysisData {
    /// Opening gap percent vs previous close.
    pub gap_pct: Option<f64>,
    /// Gap direction (`up`/`down`).
    pub direction: Option<String>,
    /// Relative volume.
    pub rvol: Option<f64>,
    /// Float shares.
    pub float_shares: Option<f64>,
    /// Float rotation.
    pub float_rotation: Option<f64>,
}

impl GapAnalysisData {
    /// Whether no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.gap_pct.is_none()
            && self.direction.is_none()
            && self.rvol.is_none()
            && self.float_shares.is_none()
            && self.float_rotation.is_none()
    }
}

/// Risk plan card. The backend does not produce it yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPlanData {
    /// Stop price.
    pub stop: f64,
    /// Profit targets.
    pub targets: Vec<f64>,
}

/// Trade idea card. The backend does not produce it yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeIdeaData {
    /// Thesis text.
    pub thesis: String,
}

/// All card slots of a view model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cards {
    /// Snapshot card.
    pub snapshot: Card<SnapshotData>,
    /// Levels card.
    pub levels: Card<LevelsData>,
    /// News card.
    pub news: Card<NewsData>,
    /// Risk plan card.
    pub risk_plan: Card<RiskPlanData>,
    /// Trade idea card.
    pub trade_idea: Card<TradeIdeaData>,
    /// Gap analysis card.
    pub gap_analysis: Card<GapAnalysisData>,
}

impl Cards {
    /// Missing-data blocks of every card, in display order.
    #[must_use]
    pub fn missing_blocks(&self) -> [&MissingDataBlock; 6] {
        [
            &self.snapshot.missing,
            &self.levels.missing,
            &self.news.missing,
            &self.risk_plan.missing,
            &self.trade_idea.missing,
            &self.gap_analysis.missing,
        ]
    }
}

// =============================================================================
// Sentiment
// =============================================================================

/// Where a sentiment score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentSource {
    /// Backend-provided 0-100 score.
    Backend,
    /// Weighted blend of impact, confidence and signal.
    Derived,
}

/// Sentiment sub-model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sentiment {
    /// Score in `0..=100`.
    pub score: f64,
    /// Bucketed label.
    pub label: SentimentLabel,
    /// Provenance.
    pub source: SentimentSource,
}

/// Bucketed sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    /// Score >= 60.
    Bullish,
    /// Score <= 40.
    Bearish,
    /// Anything in between.
    Neutral,
}

impl SentimentLabel {
    /// Bucket a 0-100 score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 60.0 {
            Self::Bullish
        } else if score <= 40.0 {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }
}

// =============================================================================
// Enrichment
// =============================================================================

/// Backend-side asynchronous enrichment state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Enrichment {
    /// No enrichment information.
    #[default]
    Unknown,
    /// Enrichment is queued or running.
    Pending,
    /// Enrichment completed.
    Complete,
    /// Enrichment failed.
    Failed {
        /// Failure detail from the backend.
        detail: Option<String>,
    },
}

impl Enrichment {
    /// Whether enrichment is still running.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

// =============================================================================
// View Model
// =============================================================================

/// Canonical synchronized state for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardViewModel {
    /// Instrument the card is about.
    pub ticker: InstrumentKey,
    /// Summary text.
    pub summary: String,
    /// Typed cards.
    pub cards: Cards,
    /// Sentiment sub-model.
    pub sentiment: Card<Sentiment>,
    /// Whether the backend returned a card object at all.
    pub has_card: bool,
    /// Backend flags the card as missing.
    pub is_missing: bool,
    /// Backend flags the card as stale.
    pub is_stale: bool,
    /// Backend started a refresh for this request.
    pub refresh_triggered: bool,
    /// Backend folded this request into an already running refresh.
    pub refresh_deduped: bool,
    /// Backend status reports an in-progress refresh.
    pub refreshing: bool,
    /// Enrichment state.
    pub enrichment: Enrichment,
    /// Revalidation token (ETag).
    pub etag: Option<String>,
    /// Monotonic backend version.
    pub version: Option<u64>,
    /// Backend timestamp of the response.
    pub server_ts: Option<DateTime<Utc>>,
    /// Backend error codes.
    pub errors: Vec<String>,
}

impl CardViewModel {
    /// Whether the backend reported the instrument as nonexistent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.errors.iter().any(|code| code == TICKER_NOT_FOUND)
    }

    /// Whether the backend is still (re)computing the card.
    #[must_use]
    pub const fn is_refreshing(&self) -> bool {
        self.refresh_triggered || self.refresh_deduped || self.refreshing
    }

    /// All missing-data blocks including sentiment.
    pub fn missing_blocks(&self) -> impl Iterator<Item = &MissingDataBlock> {
        self.cards
            .missing_blocks()
            .into_iter()
            .chain(std::iter::once(&self.sentiment.missing))
    }
}
