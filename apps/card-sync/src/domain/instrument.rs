//! Instrument and Context Identifiers
//!
//! `InstrumentKey` is the only valid key for caches, stream dispatch and
//! backend paths. Normalization is total (every raw string maps to a key or
//! to `None`) and idempotent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a normalized ticker.
pub const MAX_TICKER_LEN: usize = 10;

/// Exchange suffixes stripped during normalization.
const EXCHANGE_SUFFIXES: &[&str] = &[".US", "-US", ":US"];

/// A normalized instrument identifier (e.g. `NVDA`, `BRK.B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstrumentKey(String);

impl InstrumentKey {
    /// Normalize a raw symbol.
    ///
    /// Returns `None` when the symbol cannot be turned into a valid key.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let mut symbol = raw.trim().trim_start_matches('$').trim().to_uppercase();

        loop {
            let Some(stripped) = EXCHANGE_SUFFIXES
                .iter()
                .find_map(|suffix| symbol.strip_suffix(suffix))
            else {
                break;
            };
            symbol = stripped.to_string();
        }

        is_valid_symbol(&symbol).then_some(Self(symbol))
    }

    /// The normalized symbol.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cashtag form used in user-facing messages (`$NVDA`).
    #[must_use]
    pub fn cashtag(&self) -> String {
        format!("${}", self.0)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstrumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for InstrumentKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ticker: {raw}")))
    }
}

fn is_valid_symbol(symbol: &str) -> bool {
    let bytes = symbol.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    symbol.len() <= MAX_TICKER_LEN
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-'))
}

/// Identifier of a rendering context (a chat thread, a panel, a watchlist).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Create a context identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
