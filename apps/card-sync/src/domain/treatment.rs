//! Display Treatment Selector
//!
//! Maps a [`CardViewModel`] to the single user-facing state it should be
//! rendered as. The precedence rules live here and nowhere else:
//!
//! 1. `NotFound` - backend reported `ticker_not_found` (terminal).
//! 2. `Missing` - no card object was returned.
//! 3. `Ready` - a card exists, possibly partial.
//!
//! Phrasing is picked deterministically from the instrument key so repeated
//! renders of the same state read the same.

use serde::Serialize;

use super::card::{CardViewModel, Enrichment};
use super::instrument::InstrumentKey;

/// Status flag attached to every user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Request acknowledged, backend still working.
    Sent,
    /// Card rendered for the first time.
    Ready,
    /// Card re-rendered after an update.
    Updated,
    /// Terminal failure.
    Error,
    /// Informational notice.
    Info,
}

/// Why a card is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderIntent {
    /// First render in a context.
    #[default]
    Open,
    /// Re-render triggered by an update or poll.
    Update,
}

/// Discriminant of [`DisplayTreatment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentKind {
    /// Instrument does not exist.
    NotFound,
    /// No card yet.
    Missing,
    /// Card available.
    Ready,
}

/// User-facing rendering decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayTreatment {
    /// Backend confirmed the instrument does not exist.
    NotFound {
        /// Message text.
        content: String,
    },
    /// No card object was returned.
    Missing {
        /// Message text.
        content: String,
        /// `Sent` while the backend is working on it, `Error` otherwise.
        status: MessageStatus,
        /// Whether the card should be polled until it settles.
        refresh_pending: bool,
    },
    /// A card exists.
    Ready {
        /// Message text.
        content: String,
        /// `Ready` or `Updated`.
        status: MessageStatus,
        /// Whether the card should be polled until it settles.
        refresh_pending: bool,
    },
}

impl DisplayTreatment {
    /// Discriminant.
    #[must_use]
    pub const fn kind(&self) -> TreatmentKind {
        match self {
            Self::NotFound { .. } => TreatmentKind::NotFound,
            Self::Missing { .. } => TreatmentKind::Missing,
            Self::Ready { .. } => TreatmentKind::Ready,
        }
    }

    /// Message text.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::NotFound { content }
            | Self::Missing { content, .. }
            | Self::Ready { content, .. } => content,
        }
    }

    /// Status flag.
    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        match self {
            Self::NotFound { .. } => MessageStatus::Error,
            Self::Missing { status, .. } | Self::Ready { status, .. } => *status,
        }
    }

    /// Whether the card is still expected to change.
    #[must_use]
    pub const fn refresh_pending(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Missing {
                refresh_pending, ..
            }
            | Self::Ready {
                refresh_pending, ..
            } => *refresh_pending,
        }
    }
}

// =============================================================================
// Phrasing
// =============================================================================

const NOT_FOUND_PHRASES: &[&str] = &[
    "Couldn't find {t}. Double-check the symbol.",
    "{t} doesn't match any instrument we track.",
    "No instrument named {t} exists on our side.",
];

const COOKING_PHRASES: &[&str] = &[
    "Building the {t} card now. It'll show up here when it's ready.",
    "{t} is still cooking on the backend. Hang tight.",
    "Pulling fresh data for {t}. This can take a minute.",
];

const ABSENT_PHRASES: &[&str] = &[
    "No card is available for {t} right now.",
    "The backend has nothing for {t} at the moment.",
    "{t} has no analysis card yet.",
];

const PARTIAL_PHRASES: &[&str] = &[
    "{t} partial card is up; enrichment is still pending.",
    "Here's what we have on {t} so far. Enrichment pending.",
    "{t} base card ready. Still enriching the rest.",
];

const ENRICHMENT_FAILED_PHRASES: &[&str] = &[
    "{t} card ready; enrichment unavailable.",
    "{t} card is up, but enrichment didn't come through.",
    "Showing the {t} card without enrichment.",
];

const READY_PHRASES: &[&str] = &[
    "{t} card is ready.",
    "Here's the latest on {t}.",
    "{t} analysis card loaded.",
];

const UPDATED_PHRASES: &[&str] = &[
    "{t} card updated.",
    "Fresh numbers in for {t}.",
    "{t} card refreshed.",
];

const TIMEOUT_PHRASES: &[&str] = &[
    "{t} is taking too long to finish. Try again in a bit.",
    "Gave up waiting on {t}; the backend never finished the card.",
    "The {t} refresh timed out.",
];

/// Deterministic seed: sum of the character codes of `input`.
#[must_use]
pub fn phrase_seed(input: &str) -> u64 {
    input.chars().map(u64::from).sum()
}

/// Pick one phrasing from `phrases` for `input`. Same input, same pick.
#[must_use]
pub fn pick_phrase<'a>(phrases: &[&'a str], input: &str) -> &'a str {
    if phrases.is_empty() {
        return "";
    }
    let index = usize::try_from(phrase_seed(input) % phrases.len() as u64).unwrap_or(0);
    phrases[index]
}

fn phrase(phrases: &[&str], ticker: &InstrumentKey) -> String {
    pick_phrase(phrases, ticker.as_str()).replace("{t}", &ticker.cashtag())
}

/// Terminal message for a refresh that never settled.
#[must_use]
pub fn timeout_message(ticker: &InstrumentKey) -> String {
    phrase(TIMEOUT_PHRASES, ticker)
}

// =============================================================================
// Selection
// =============================================================================

/// Select the treatment for a first render.
#[must_use]
pub fn select(vm: &CardViewModel) -> DisplayTreatment {
    select_with_intent(vm, RenderIntent::Open)
}

/// Select the treatment for a view model.
#[must_use]
pub fn select_with_intent(vm: &CardViewModel, intent: RenderIntent) -> DisplayTreatment {
    let ticker = &vm.ticker;

    if vm.is_not_found() {
        return DisplayTreatment::NotFound {
            content: phrase(NOT_FOUND_PHRASES, ticker),
        };
    }

    if !vm.has_card {
        let working = vm.refresh_triggered || vm.refresh_deduped || vm.enrichment.is_pending();
        return if working {
            DisplayTreatment::Missing {
                content: phrase(COOKING_PHRASES, ticker),
                status: MessageStatus::Sent,
                refresh_pending: true,
            }
        } else {
            DisplayTreatment::Missing {
                content: phrase(ABSENT_PHRASES, ticker),
                status: MessageStatus::Error,
                refresh_pending: false,
            }
        };
    }

    let status = match intent {
        RenderIntent::Open => MessageStatus::Ready,
        RenderIntent::Update => MessageStatus::Updated,
    };

    match &vm.enrichment {
        Enrichment::Pending => DisplayTreatment::Ready {
            content: phrase(PARTIAL_PHRASES, ticker),
            status,
            refresh_pending: true,
        },
        Enrichment::Failed { detail } => {
            let base = phrase(ENRICHMENT_FAILED_PHRASES, ticker);
            let content = match detail {
                Some(detail) => format!("{base} ({detail})"),
                None => base,
            };
            DisplayTreatment::Ready {
                content,
                status,
                refresh_pending: false,
            }
        }
        Enrichment::Unknown | Enrichment::Complete => {
            let phrases = match intent {
                RenderIntent::Open => READY_PHRASES,
                RenderIntent::Update => UPDATED_PHRASES,
            };
            DisplayTreatment::Ready {
                content: phrase(phrases, ticker),
                status,
                refresh_pending: vm.is_refreshing(),
            }
        }
    }
}
