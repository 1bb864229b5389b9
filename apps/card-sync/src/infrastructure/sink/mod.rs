//! Tracing Card Sink
//!
//! Headless [`CardSink`] that turns every render and chat message into a
//! structured log event. Used by the binary to run the synchronizer without
//! a UI.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::application::ports::{CardSink, ChatMessage};
use crate::domain::card::CardViewModel;
use crate::domain::instrument::ContextId;
use crate::domain::treatment::{DisplayTreatment, MessageStatus};

/// Last rendered state for one (context, instrument).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRecord {
    /// Context the card was rendered in.
    pub context: String,
    /// Instrument.
    pub ticker: String,
    /// How it was rendered.
    pub treatment: DisplayTreatment,
}

/// [`CardSink`] backed by `tracing`.
#[derive(Debug, Default)]
pub struct TracingCardSink {
    renders: Mutex<Vec<RenderRecord>>,
    messages: Mutex<usize>,
}

impl TracingCardSink {
    /// Create a sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest render per (context, instrument), in first-render order.
    #[must_use]
    pub fn renders(&self) -> Vec<RenderRecord> {
        self.renders.lock().clone()
    }

    /// Number of chat messages posted.
    #[must_use]
    pub fn message_count(&self) -> usize {
        *self.messages.lock()
    }
}

impl CardSink for TracingCardSink {
    fn render_card(
        &self,
        context: &ContextId,
        card: &Arc<CardViewModel>,
        treatment: &DisplayTreatment,
    ) {
        let missing = card
            .missing_blocks()
            .map(|block| block.fields().len())
            .sum::<usize>();

        tracing::info!(
            context = %context,
            ticker = %card.ticker,
            kind = ?treatment.kind(),
            status = ?treatment.status(),
            refresh_pending = treatment.refresh_pending(),
            version = card.version,
            missing_fields = missing,
            content = treatment.content(),
            "Card rendered"
        );

        let record = RenderRecord {
            context: context.to_string(),
            ticker: card.ticker.to_string(),
            treatment: treatment.clone(),
        };
        let mut renders = self.renders.lock();
        match renders
            .iter_mut()
            .find(|r| r.context == record.context && r.ticker == record.ticker)
        {
            Some(existing) => *existing = record,
            None => renders.push(record),
        }
    }

    fn post_message(&self, context: &ContextId, message: ChatMessage) {
        *self.messages.lock() += 1;
        let ticker = message.ticker.as_ref().map(ToString::to_string);
        match message.status {
            MessageStatus::Error => tracing::warn!(
                context = %context,
                ticker = ticker.as_deref(),
                status = ?message.status,
                content = %message.content,
                "Chat message"
            ),
            _ => tracing::info!(
                context = %context,
                ticker = ticker.as_deref(),
                status = ?message.status,
                content = %message.content,
                "Chat message"
            ),
        }
    }
}
