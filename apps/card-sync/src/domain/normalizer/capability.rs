//! Backend capability table.
//!
//! Decides whether an absent field is absent because this instrument has no
//! value (`missing_ticker_data`) or because the backend does not produce the
//! field at all (`missing_backend_field`).

use crate::domain::card::{CardKind, MissingReason};

/// Whether the backend can return a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The backend returns this field when data exists.
    Supported,
    /// The backend does not implement this field.
    NotImplemented,
}

impl Capability {
    /// Reason to record when a field with this capability is absent.
    #[must_use]
    pub const fn missing_reason(self) -> MissingReason {
        match self {
            Self::Supported => MissingReason::MissingTickerData,
            Self::NotImplemented => MissingReason::MissingBackendField,
        }
    }
}

/// Field-level overrides of the card-level capability.
const FIELD_CAPABILITIES: &[(&str, Capability)] = &[
    ("snapshot.market_cap", Capability::NotImplemented),
    ("levels.atr", Capability::NotImplemented),
    ("gap_analysis.float_rotation", Capability::NotImplemented),
];

/// Capability of a whole card.
#[must_use]
pub const fn card_capability(kind: CardKind) -> Capability {
    match kind {
        CardKind::Snapshot | CardKind::Levels | CardKind::News | CardKind::GapAnalysis => {
            Capability::Supported
        }
        CardKind::RiskPlan | CardKind::TradeIdea => Capability::NotImplemented,
    }
}

/// Capability of a dotted field path, falling back to the owning card.
#[must_use]
pub fn field_capability(path: &str) -> Capability {
    if let Some((_, capability)) = FIELD_CAPABILITIES.iter().find(|(key, _)| *key == path) {
        return *capability;
    }

    let prefix = path.split(['.', '[']).next().unwrap_or(path);
    CardKind::ALL
        .iter()
        .find(|kind| kind.key() == prefix)
        .map_or(Capability::Supported, |kind| card_capability(*kind))
}

/// Reason to record for an absent field.
#[must_use]
pub fn missing_reason(path: &str) -> MissingReason {
    field_capability(path).missing_reason()
}
