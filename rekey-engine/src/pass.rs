//! Pass-scoped visited tracking.
//!
//! A [`PassContext`] is created per top-level `process_*` invocation and
//! threaded through the traversal, so independent operations can never see
//! each other's visited set. Batch callers that *want* dedup across several
//! logical changes own a context themselves and pass it to the `*_with`
//! entry points.

use rekey_core::{CascadeKind, InstanceRef, ProcessedUpdate};
use std::collections::HashMap;

/// Visited set for one propagation pass.
#[derive(Debug, Default)]
pub struct PassTracker {
    entries: HashMap<InstanceRef, ProcessedUpdate>,
}

impl PassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, owner: &InstanceRef) -> Option<&ProcessedUpdate> {
        self.entries.get(owner)
    }

    pub fn find_or_create(&mut self, owner: InstanceRef) -> &ProcessedUpdate {
        self.entries
            .entry(owner.clone())
            .or_insert_with(|| ProcessedUpdate::new(owner))
    }

    pub fn mark_published(&mut self, owner: &InstanceRef) {
        if let Some(update) = self.entries.get_mut(owner) {
            update.published = true;
        }
    }

    /// Clear all entries.
    ///
    /// Callers that share one tracker across several logical operations MUST
    /// call this between them: stale entries from a previous operation
    /// silently suppress invalidation in the next one. This is a contract,
    /// not a runtime-detectable error.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one propagation pass carries: the cascade kind and the
/// visited set.
#[derive(Debug)]
pub struct PassContext {
    cascade: CascadeKind,
    tracker: PassTracker,
}

impl PassContext {
    pub fn new(cascade: CascadeKind) -> Self {
        Self {
            cascade,
            tracker: PassTracker::new(),
        }
    }

    pub fn cascade(&self) -> CascadeKind {
        self.cascade
    }

    pub fn tracker(&self) -> &PassTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PassTracker {
        &mut self.tracker
    }

    /// Whether an instance counts as already handled in this pass.
    ///
    /// In a draft cascade mere presence suffices. In a publish cascade only
    /// an entry marked published counts: the same instance may be touched in
    /// a draft-write context first and still need revisiting for
    /// publication.
    pub fn already_processed(&self, owner: &InstanceRef) -> bool {
        match self.cascade {
            CascadeKind::Draft => self.tracker.find(owner).is_some(),
            CascadeKind::Publish => self
                .tracker
                .find(owner)
                .map(|update| update.published)
                .unwrap_or(false),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
