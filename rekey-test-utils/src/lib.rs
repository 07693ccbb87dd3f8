//! Rekey Test Utilities
//!
//! Centralized test infrastructure for the Rekey workspace:
//! - The canonical "newsroom" registry exercising every relation kind
//! - Record builders for its types
//! - A cycle-graph registry for termination tests
//! - Proptest generators for identity types

// Re-export the types fixtures hand back, so tests depend on one crate.
pub use rekey_core::{
    new_instance_id, CacheKeyRecord, CascadeKind, InstanceRef, RekeyConfig, RekeyResult,
    RelationKind, Stage, TypeName,
};
pub use rekey_graph::{GraphCache, RelationGraph, TypeDescriptor, TypeRegistry};
pub use rekey_storage::{CacheKeyBackend, CacheKeyStore, MemoryStore, Record, RecordStore};

use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// NEWSROOM FIXTURE
// ============================================================================

/// The canonical fixture registry.
///
/// Covers every relation kind and both declaration styles:
/// - `Article.Author` (HasOne) + `cares` -> Author invalidates its Articles
/// - `Article.Tags` (ManyMany) + `cares` -> a Tag invalidates its Articles
/// - `Article.Related` (ManyManyThrough) + `cares` -> related Articles
/// - `Author.Profile` (BelongsTo) + `touches` -> an Author invalidates its Profile
/// - `Banner.Pages` (HasMany) + `touches` -> a Banner invalidates its Pages,
///   polymorphically (Article is a Page subtype)
/// - `Widget` globally cares about `SiteSettings`
pub fn newsroom_registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::new(vec![
            TypeDescriptor::new("Page")
                .relation("Banner", RelationKind::HasOne, "Banner")
                .with_cache_key(),
            TypeDescriptor::new("Author")
                .relation("Profile", RelationKind::BelongsTo, "Profile")
                .touches("Profile")
                .with_cache_key(),
            TypeDescriptor::new("Article")
                .parent("Page")
                .relation("Author", RelationKind::HasOne, "Author")
                .relation("Tags", RelationKind::ManyMany, "Tag")
                .relation("Related", RelationKind::ManyManyThrough, "Article")
                .cares("Author")
                .cares("Tags")
                .cares("Related"),
            TypeDescriptor::new("Tag").with_cache_key(),
            TypeDescriptor::new("Profile")
                .relation("Author", RelationKind::HasOne, "Author")
                .with_cache_key(),
            TypeDescriptor::new("Banner")
                .relation("Pages", RelationKind::HasMany, "Page")
                .touches("Pages")
                .with_cache_key(),
            TypeDescriptor::new("SiteSettings").with_cache_key(),
            TypeDescriptor::new("Widget")
                .global_cares("SiteSettings")
                .with_cache_key(),
        ])
        .expect("newsroom registry is valid"),
    )
}

/// Store, registry, and graph cache bundled for engine tests.
pub struct Newsroom {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<TypeRegistry>,
    pub graph: Arc<GraphCache>,
}

impl Newsroom {
    pub fn new() -> Self {
        let registry = newsroom_registry();
        Self {
            store: Arc::new(MemoryStore::new()),
            graph: Arc::new(GraphCache::new(Arc::clone(&registry))),
            registry,
        }
    }

    /// A cache-key store sharing this fixture's backend and registry.
    pub fn key_store(&self) -> CacheKeyStore {
        CacheKeyStore::new(
            Arc::clone(&self.store) as Arc<dyn CacheKeyBackend>,
            Arc::clone(&self.registry),
        )
    }
}

impl Default for Newsroom {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RECORD BUILDERS
// ============================================================================

pub fn make_author() -> Record {
    Record::new(InstanceRef::new("Author", new_instance_id()))
}

pub fn make_article(author: Option<&InstanceRef>) -> Record {
    let mut record = Record::new(InstanceRef::new("Article", new_instance_id()));
    if let Some(author) = author {
        record = record.with_foreign_key("Author", author.clone());
    }
    record
}

pub fn make_tag() -> Record {
    Record::new(InstanceRef::new("Tag", new_instance_id()))
}

pub fn make_page() -> Record {
    Record::new(InstanceRef::new("Page", new_instance_id()))
}

pub fn make_profile(author: &InstanceRef) -> Record {
    Record::new(InstanceRef::new("Profile", new_instance_id()))
        .with_foreign_key("Author", author.clone())
}

pub fn make_banner() -> Record {
    Record::new(InstanceRef::new("Banner", new_instance_id()))
}

pub fn make_settings() -> Record {
    Record::new(InstanceRef::new("SiteSettings", new_instance_id()))
}

pub fn make_widget() -> Record {
    Record::new(InstanceRef::new("Widget", new_instance_id()))
}

// ============================================================================
// CYCLE FIXTURE
// ============================================================================

/// A registry of `n` types arranged in a touch-cycle: `T0 -> T1 -> ... -> T0`,
/// each edge a HasOne foreign key named "Next".
pub fn cycle_registry(n: usize) -> Arc<TypeRegistry> {
    let descriptors = (0..n)
        .map(|i| {
            TypeDescriptor::new(format!("T{}", i))
                .relation("Next", RelationKind::HasOne, format!("T{}", (i + 1) % n))
                .touches("Next")
                .with_cache_key()
        })
        .collect();
    Arc::new(TypeRegistry::new(descriptors).expect("cycle registry is valid"))
}

/// One persisted instance per cycle type, each pointing at the next.
pub fn cycle_instances(store: &MemoryStore, n: usize) -> RekeyResult<Vec<Record>> {
    let refs: Vec<InstanceRef> = (0..n)
        .map(|i| InstanceRef::new(format!("T{}", i), new_instance_id()))
        .collect();
    let mut records = Vec::with_capacity(n);
    for (i, instance) in refs.iter().enumerate() {
        let record = Record::new(instance.clone())
            .with_foreign_key("Next", refs[(i + 1) % n].clone());
        store.record_insert(record.clone())?;
        records.push(record);
    }
    Ok(records)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub fn arb_type_name() -> impl Strategy<Value = TypeName> {
    "[A-Z][a-zA-Z]{0,12}".prop_map(TypeName::new)
}

pub fn arb_instance_id() -> impl Strategy<Value = Uuid> {
    any::<[u8; 16]>().prop_map(Uuid::from_bytes)
}

pub fn arb_instance_ref() -> impl Strategy<Value = InstanceRef> {
    (arb_type_name(), arb_instance_id())
        .prop_map(|(type_name, id)| InstanceRef { type_name, id })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newsroom_registry_builds_a_graph() {
        let fixture = Newsroom::new();
        let graph = fixture.graph.get().unwrap();
        // Author -> Article (cares) and Author -> Profile (touches).
        assert_eq!(graph.edges_from(&TypeName::new("Author")).len(), 2);
        assert_eq!(graph.edges_from(&TypeName::new("Tag")).len(), 1);
        assert_eq!(graph.edges_from(&TypeName::new("Banner")).len(), 1);
    }

    #[test]
    fn test_cycle_fixture_links_back_to_start() {
        let registry = cycle_registry(3);
        let store = MemoryStore::new();
        let records = cycle_instances(&store, 3).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[2].foreign_key("Next"),
            Some(&records[0].instance)
        );
        let graph = RelationGraph::build(registry).unwrap();
        assert_eq!(graph.edges().len(), 3);
    }

    proptest! {
        #[test]
        fn prop_instance_refs_roundtrip_token(instance in arb_instance_ref()) {
            let token = instance.token();
            prop_assert!(token.contains(':'));
            prop_assert!(token.starts_with(instance.type_name.as_str()));
        }
    }
}
