//! The change processor: one propagation pass from a changed instance to
//! worklist exhaustion, then the global-care purge.

use crate::pass::PassContext;
use rekey_core::{CascadeKind, RekeyConfig, RekeyResult, RelationKind};
use rekey_graph::{Edge, GraphCache, RelationGraph};
use rekey_storage::{CacheKeyStore, Record, RecordStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Orchestrates propagation passes over the relationship graph.
pub struct ChangeProcessor {
    graph: Arc<GraphCache>,
    records: Arc<dyn RecordStore>,
    keys: CacheKeyStore,
    config: RekeyConfig,
}

impl ChangeProcessor {
    pub fn new(
        graph: Arc<GraphCache>,
        records: Arc<dyn RecordStore>,
        keys: CacheKeyStore,
        config: RekeyConfig,
    ) -> Self {
        Self {
            graph,
            records,
            keys,
            config,
        }
    }

    /// Process a created or updated instance: draft cascade.
    pub fn process_change(&self, record: &Record) -> RekeyResult<()> {
        let mut ctx = PassContext::new(CascadeKind::Draft);
        self.process_with(record, &mut ctx)
    }

    /// Process a published instance: draft cascade plus live-stage
    /// publication of every invalidated key.
    pub fn process_publish(&self, record: &Record) -> RekeyResult<()> {
        let mut ctx = PassContext::new(CascadeKind::Publish);
        self.process_with(record, &mut ctx)
    }

    /// Process a deleted instance: remove its own cache-key records, then
    /// re-key everything that depended on it.
    pub fn process_deletion(&self, record: &Record) -> RekeyResult<()> {
        let mut ctx = PassContext::new(CascadeKind::Draft);
        self.process_deletion_with(record, &mut ctx)
    }

    /// Like [`Self::process_change`]/[`Self::process_publish`] but with a
    /// caller-owned context, for batch callers that want dedup across
    /// several logical changes. The cascade kind comes from the context.
    ///
    /// Callers reusing one context across independent operations must
    /// `reset()` its tracker in between; see [`crate::PassTracker::reset`].
    pub fn process_with(&self, record: &Record, ctx: &mut PassContext) -> RekeyResult<()> {
        if !record.exists {
            debug!(instance = %record.instance, "skipping unsaved instance");
            return Ok(());
        }
        let graph = self.graph.get()?;
        self.run_worklist(&graph, vec![record.clone()], ctx)?;
        self.purge_global_dependents(&graph, record)
    }

    /// Deletion variant of [`Self::process_with`].
    pub fn process_deletion_with(
        &self,
        record: &Record,
        ctx: &mut PassContext,
    ) -> RekeyResult<()> {
        if !record.exists {
            debug!(instance = %record.instance, "skipping unsaved instance");
            return Ok(());
        }
        let removed = self.keys.remove(&record.instance)?;
        debug!(
            instance = %record.instance,
            removed, "removed cache-key records for deleted instance"
        );

        // The deleted owner must not be re-keyed by its own cascade; seed
        // the tracker so the worklist only expands its dependents.
        ctx.tracker_mut().find_or_create(record.instance.clone());

        let graph = self.graph.get()?;
        let mut seeds = Vec::new();
        for edge in graph.edges_from(&record.instance.type_name) {
            seeds.extend(self.resolve_edge(&graph, record, edge)?);
        }
        self.run_worklist(&graph, seeds, ctx)?;
        self.purge_global_dependents(&graph, record)
    }

    /// Explicit-stack traversal; bounds memory to the frontier instead of
    /// call-stack depth.
    fn run_worklist(
        &self,
        graph: &RelationGraph,
        seeds: Vec<Record>,
        ctx: &mut PassContext,
    ) -> RekeyResult<()> {
        let mut worklist = seeds;
        while let Some(current) = worklist.pop() {
            if ctx.already_processed(&current.instance) {
                debug!(instance = %current.instance, "already processed in this pass");
                continue;
            }
            self.invalidate(&current, ctx)?;
            for edge in graph.edges_from(&current.instance.type_name) {
                worklist.extend(self.resolve_edge(graph, &current, edge)?);
            }
        }
        Ok(())
    }

    /// Re-key one instance and record it in the pass tracker.
    fn invalidate(&self, record: &Record, ctx: &mut PassContext) -> RekeyResult<()> {
        let updated = self.keys.update_or_create(record)?;
        match &updated {
            Some(key) => debug!(
                instance = %record.instance,
                key = %key.key_hash,
                "cache key regenerated"
            ),
            None => debug!(
                instance = %record.instance,
                "type not configured for cache keys"
            ),
        }

        ctx.tracker_mut().find_or_create(record.instance.clone());
        if ctx.cascade() == CascadeKind::Publish {
            if updated.is_some() {
                self.keys
                    .publish(&record.instance, self.config.publish_mode)?;
            }
            ctx.tracker_mut().mark_published(&record.instance);
        }
        Ok(())
    }

    /// Resolve one edge against a source instance into the related records.
    ///
    /// A null foreign key or an empty collection is a normal terminal case
    /// and produces no work. Polymorphic targets are expanded to their
    /// concrete descendant types here.
    fn resolve_edge(
        &self,
        graph: &RelationGraph,
        current: &Record,
        edge: &Edge,
    ) -> RekeyResult<Vec<Record>> {
        let registry = graph.registry();
        let related = match edge.kind {
            RelationKind::HasOne => match current.foreign_key(&edge.relation) {
                None => Vec::new(),
                Some(target) => match self.records.record_get(target)? {
                    Some(record) => vec![record],
                    None => {
                        warn!(
                            instance = %current.instance,
                            target = %target,
                            relation = %edge.relation,
                            "dangling foreign key"
                        );
                        Vec::new()
                    }
                },
            },
            RelationKind::BelongsTo | RelationKind::HasMany => {
                let mut related = Vec::new();
                for concrete in registry.descendants(&edge.to) {
                    related.extend(self.records.records_by_foreign_key(
                        &concrete,
                        &edge.relation,
                        &current.instance,
                    )?);
                }
                if edge.kind.is_single_valued() {
                    related.truncate(1);
                }
                related
            }
            RelationKind::ManyMany | RelationKind::ManyManyThrough => {
                let mut related = Vec::new();
                for concrete in registry.descendants(&edge.to) {
                    related.extend(self.records.records_related_many(
                        &concrete,
                        &current.instance,
                        &edge.relation,
                    )?);
                }
                related
            }
        };
        debug!(
            instance = %current.instance,
            relation = %edge.relation,
            to = %edge.to,
            count = related.len(),
            "resolved edge"
        );
        Ok(related)
    }

    /// Bulk purge for types that globally care about the changed type or
    /// any of its ancestors. Coarse on purpose: every instance of a
    /// dependent type is considered stale.
    fn purge_global_dependents(&self, graph: &RelationGraph, record: &Record) -> RekeyResult<()> {
        for dependent in graph.global_dependents(&record.instance.type_name) {
            let purged = self.keys.purge_type(&dependent)?;
            debug!(
                changed = %record.instance,
                dependent = %dependent,
                purged, "global-care purge"
            );
        }
        Ok(())
    }

    pub fn graph(&self) -> &Arc<GraphCache> {
        &self.graph
    }

    pub fn keys(&self) -> &CacheKeyStore {
        &self.keys
    }
}
