//! Process-wide memoized graph with an explicit rebuild lifecycle.
//!
//! The graph is built lazily on first access and dropped only through
//! [`GraphCache::invalidate`], which the embedder calls after relation
//! configuration changes (typically a deployment). It is never rebuilt
//! implicitly mid-pass.

use crate::graph::RelationGraph;
use crate::registry::TypeRegistry;
use rekey_core::{RekeyResult, StorageError};
use std::sync::{Arc, RwLock};

/// Holder for the cached [`RelationGraph`].
///
/// Build happens outside the write lock and the finished graph is swapped in
/// atomically, so concurrent readers never observe a partially built graph.
#[derive(Debug)]
pub struct GraphCache {
    registry: Arc<TypeRegistry>,
    cached: RwLock<Option<Arc<RelationGraph>>>,
}

impl GraphCache {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            cached: RwLock::new(None),
        }
    }

    /// Get the graph, building it on first access.
    pub fn get(&self) -> RekeyResult<Arc<RelationGraph>> {
        {
            let cached = self
                .cached
                .read()
                .map_err(|_| StorageError::LockPoisoned)?;
            if let Some(graph) = cached.as_ref() {
                return Ok(Arc::clone(graph));
            }
        }

        // Build without holding the lock; a failed build leaves the cache
        // empty rather than half-populated.
        let graph = Arc::new(RelationGraph::build(Arc::clone(&self.registry))?);

        let mut cached = self
            .cached
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        // Another thread may have won the race; keep whichever graph landed
        // first so readers see one consistent build.
        if let Some(existing) = cached.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *cached = Some(Arc::clone(&graph));
        Ok(graph)
    }

    /// Drop the cached graph; the next access rebuilds it.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }
}

// ============================================================================
// TESTS
// ============================================================================
