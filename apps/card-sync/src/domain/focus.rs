//! Focus Registry
//!
//! One focused instrument per context, plus the currently active context.
//! Bounded so long sessions with many contexts cannot grow it without limit.

use super::cache::LruCache;
use super::instrument::{ContextId, InstrumentKey};

/// Tracks which instrument each context is looking at.
#[derive(Debug)]
pub struct FocusRegistry {
    focus: LruCache<ContextId, InstrumentKey>,
    active: Option<ContextId>,
}

impl FocusRegistry {
    /// Create a registry tracking at most `capacity` contexts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            focus: LruCache::new(capacity),
            active: None,
        }
    }

    /// Focus `key` in `context` and make the context active.
    pub fn focus(&mut self, context: ContextId, key: InstrumentKey) {
        self.active = Some(context.clone());
        if let Some((evicted, _)) = self.focus.insert(context, key) {
            tracing::debug!(context = %evicted, "Focus registry evicted context");
        }
    }

    /// Make `context` active without changing its focus.
    pub fn activate(&mut self, context: ContextId) {
        self.active = Some(context);
    }

    /// Focused instrument of `context`.
    #[must_use]
    pub fn focused(&self, context: &ContextId) -> Option<&InstrumentKey> {
        self.focus.peek(context)
    }

    /// Active context.
    #[must_use]
    pub const fn active(&self) -> Option<&ContextId> {
        self.active.as_ref()
    }

    /// Active context and its focused instrument.
    #[must_use]
    pub fn active_focus(&self) -> Option<(ContextId, InstrumentKey)> {
        let context = self.active.as_ref()?;
        let key = self.focus.peek(context)?;
        Some((context.clone(), key.clone()))
    }

    /// Whether `key` is the focused instrument of the active context.
    #[must_use]
    pub fn is_active_focus(&self, key: &InstrumentKey) -> bool {
        self.active
            .as_ref()
            .and_then(|context| self.focus.peek(context))
            .is_some_and(|focused| focused == key)
    }

    /// Forget `context`.
    pub fn remove(&mut self, context: &ContextId) {
        self.focus.remove(context);
        if self.active.as_ref() == Some(context) {
            self.active = None;
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.focus.clear();
        self.active = None;
    }
}
