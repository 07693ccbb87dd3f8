//! Relationship-graph build and edge lookup.
//!
//! Every edge is normalized at build time so that traversal only ever has to
//! reason from the `from` side: the edge's `relation` names the physical
//! field used to resolve related instances of `to` when an instance of
//! `from` changes, and `kind` describes that field from the `from` side.

use crate::registry::{RelationRef, TypeRegistry};
use rekey_core::{GraphError, RekeyResult, RelationKind, TypeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Directed invalidation edge: when an instance of `from` changes, the
/// related instance(s) of `to` reachable via `relation` must be invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: TypeName,
    pub to: TypeName,
    /// Physical field used for resolution, interpreted from the `from` side:
    /// a foreign key on `from` for `HasOne`, a foreign key on `to` for
    /// `BelongsTo`/`HasMany`, a join-relation name for the many-many kinds.
    pub relation: String,
    pub kind: RelationKind,
}

/// The compiled graph: edge lists keyed by source type plus the global-care
/// index. Immutable once built; rebuild through [`crate::GraphCache`].
#[derive(Debug, Clone)]
pub struct RelationGraph {
    registry: Arc<TypeRegistry>,
    edges: Vec<Edge>,
    by_source: BTreeMap<TypeName, Vec<usize>>,
    global_cares: BTreeMap<TypeName, Vec<TypeName>>,
}

impl RelationGraph {
    /// Compile the registry's declarations into a graph.
    ///
    /// Fails fast on any declaration whose relation name has no matching
    /// relation metadata, and on collection declarations whose implicit
    /// reverse field cannot be resolved. No partial graph escapes a failed
    /// build.
    pub fn build(registry: Arc<TypeRegistry>) -> RekeyResult<Self> {
        let mut edges = Vec::new();
        let mut by_source: BTreeMap<TypeName, Vec<usize>> = BTreeMap::new();
        let mut global_cares: BTreeMap<TypeName, Vec<TypeName>> = BTreeMap::new();

        for descriptor in registry.iter() {
            for declaration in &descriptor.touches {
                let field = descriptor
                    .relation_field(&declaration.relation)
                    .ok_or_else(|| GraphError::UnknownRelation {
                        type_name: descriptor.name.clone(),
                        relation: declaration.relation.clone(),
                    })?;

                // Touches: edge points away from the declarer.
                let edge = match field.kind {
                    RelationKind::HasOne => Edge {
                        from: descriptor.name.clone(),
                        to: field.target.clone(),
                        relation: field.name.clone(),
                        kind: RelationKind::HasOne,
                    },
                    RelationKind::BelongsTo | RelationKind::HasMany => Edge {
                        from: descriptor.name.clone(),
                        to: field.target.clone(),
                        relation: reverse_field(
                            &registry,
                            &descriptor.name,
                            &field.target,
                            declaration,
                        )?,
                        kind: field.kind,
                    },
                    RelationKind::ManyMany | RelationKind::ManyManyThrough => Edge {
                        from: descriptor.name.clone(),
                        to: field.target.clone(),
                        relation: field.name.clone(),
                        kind: field.kind,
                    },
                };
                by_source
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edges.len());
                edges.push(edge);
            }

            for declaration in &descriptor.cares {
                let field = descriptor
                    .relation_field(&declaration.relation)
                    .ok_or_else(|| GraphError::UnknownRelation {
                        type_name: descriptor.name.clone(),
                        relation: declaration.relation.clone(),
                    })?;

                // Cares: edge points toward the declarer, so the kind and
                // field are re-expressed from the other side of the relation.
                let edge = match field.kind {
                    // FK on the declarer: from the target's side this is a
                    // collection of declarer instances carrying that FK.
                    RelationKind::HasOne => Edge {
                        from: field.target.clone(),
                        to: descriptor.name.clone(),
                        relation: field.name.clone(),
                        kind: RelationKind::HasMany,
                    },
                    // FK on the target: from the target's side this is its
                    // own single-valued field pointing back at the declarer.
                    RelationKind::BelongsTo | RelationKind::HasMany => Edge {
                        from: field.target.clone(),
                        to: descriptor.name.clone(),
                        relation: reverse_field(
                            &registry,
                            &descriptor.name,
                            &field.target,
                            declaration,
                        )?,
                        kind: RelationKind::HasOne,
                    },
                    // Join lookups are symmetric.
                    RelationKind::ManyMany | RelationKind::ManyManyThrough => Edge {
                        from: field.target.clone(),
                        to: descriptor.name.clone(),
                        relation: field.name.clone(),
                        kind: field.kind,
                    },
                };
                by_source
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edges.len());
                edges.push(edge);
            }

            for dependency in &descriptor.global_cares {
                let dependents = global_cares.entry(dependency.clone()).or_default();
                if !dependents.contains(&descriptor.name) {
                    dependents.push(descriptor.name.clone());
                }
            }
        }

        Ok(Self {
            registry,
            edges,
            by_source,
            global_cares,
        })
    }

    /// All outgoing edges for a type, in declaration order.
    ///
    /// Consults the full ancestor chain, so an edge declared from a
    /// supertype fires for subtype instances as well.
    pub fn edges_from(&self, type_name: &TypeName) -> Vec<&Edge> {
        let mut result = Vec::new();
        for ancestor in self.registry.ancestors(type_name) {
            if let Some(indices) = self.by_source.get(&ancestor) {
                result.extend(indices.iter().map(|&i| &self.edges[i]));
            }
        }
        result
    }

    /// Every edge in the graph, in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The bulk-purge index: dependency type to dependent types.
    pub fn global_cares(&self) -> &BTreeMap<TypeName, Vec<TypeName>> {
        &self.global_cares
    }

    /// Dependent types to bulk-purge when an instance of `type_name` changes.
    ///
    /// Walks the changed type's ancestor chain, unions the index hits, and
    /// deduplicates while preserving first-seen order.
    pub fn global_dependents(&self, type_name: &TypeName) -> Vec<TypeName> {
        let mut result = Vec::new();
        for ancestor in self.registry.ancestors(type_name) {
            if let Some(dependents) = self.global_cares.get(&ancestor) {
                for dependent in dependents {
                    if !result.contains(dependent) {
                        result.push(dependent.clone());
                    }
                }
            }
        }
        result
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }
}

/// Resolve the single-valued field on `target` that points back at the
/// declaring type.
///
/// An explicit via-field wins; otherwise the target's `HasOne` relations are
/// scanned for exactly one that targets the declarer or one of its
/// ancestors.
fn reverse_field(
    registry: &TypeRegistry,
    declarer: &TypeName,
    target: &TypeName,
    declaration: &RelationRef,
) -> RekeyResult<String> {
    let descriptor = registry.get(target).ok_or_else(|| GraphError::UnknownType {
        type_name: target.clone(),
    })?;

    if let Some(via) = &declaration.via_field {
        let field =
            descriptor
                .relation_field(via)
                .ok_or_else(|| GraphError::UnknownRelation {
                    type_name: target.clone(),
                    relation: via.clone(),
                })?;
        return Ok(field.name.clone());
    }

    let declarer_chain = registry.ancestors(declarer);
    let mut matches = descriptor
        .relations
        .iter()
        .filter(|f| f.kind == RelationKind::HasOne && declarer_chain.contains(&f.target));

    match (matches.next(), matches.next()) {
        (Some(field), None) => Ok(field.name.clone()),
        (Some(_), Some(_)) => Err(GraphError::AmbiguousReverseField {
            source_type: declarer.clone(),
            target: target.clone(),
            relation: declaration.relation.clone(),
        }
        .into()),
        _ => Err(GraphError::NoReverseField {
            source_type: declarer.clone(),
            target: target.clone(),
            relation: declaration.relation.clone(),
        }
        .into()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeDescriptor;
    use rekey_core::RekeyError;

    fn newsroom() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Author")
                    .relation("Articles", RelationKind::HasMany, "Article")
                    .touches("Articles")
                    .with_cache_key(),
                TypeDescriptor::new("Article")
                    .relation("Author", RelationKind::HasOne, "Author")
                    .relation("Tags", RelationKind::ManyMany, "Tag")
                    .cares("Tags")
                    .with_cache_key(),
                TypeDescriptor::new("Tag").with_cache_key(),
                TypeDescriptor::new("Widget")
                    .global_cares("SiteSettings")
                    .with_cache_key(),
                TypeDescriptor::new("SiteSettings").with_cache_key(),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_touches_collection_uses_reverse_field() {
        let graph = RelationGraph::build(newsroom()).unwrap();
        let edges = graph.edges_from(&TypeName::new("Author"));
        assert_eq!(edges.len(), 1);
        let edge = edges[0];
        assert_eq!(edge.to, TypeName::new("Article"));
        // Resolution field is the FK on Article, found by the implicit
        // reverse scan.
        assert_eq!(edge.relation, "Author");
        assert_eq!(edge.kind, RelationKind::HasMany);
    }

    #[test]
    fn test_cares_many_many_points_at_declarer() {
        let graph = RelationGraph::build(newsroom()).unwrap();
        let edges = graph.edges_from(&TypeName::new("Tag"));
        assert_eq!(edges.len(), 1);
        let edge = edges[0];
        assert_eq!(edge.from, TypeName::new("Tag"));
        assert_eq!(edge.to, TypeName::new("Article"));
        assert_eq!(edge.relation, "Tags");
        assert_eq!(edge.kind, RelationKind::ManyMany);
    }

    #[test]
    fn test_cares_has_one_inverts_to_collection() {
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Author").with_cache_key(),
                TypeDescriptor::new("Article")
                    .relation("Author", RelationKind::HasOne, "Author")
                    .cares("Author")
                    .with_cache_key(),
            ])
            .unwrap(),
        );
        let graph = RelationGraph::build(registry).unwrap();
        let edges = graph.edges_from(&TypeName::new("Author"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, TypeName::new("Article"));
        assert_eq!(edges[0].relation, "Author");
        assert_eq!(edges[0].kind, RelationKind::HasMany);
    }

    #[test]
    fn test_cares_has_many_inverts_to_single() {
        // Menu cares about its Items: when an Item changes, follow the
        // Item's own FK back to the Menu.
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Menu")
                    .relation("Items", RelationKind::HasMany, "MenuItem")
                    .cares("Items")
                    .with_cache_key(),
                TypeDescriptor::new("MenuItem")
                    .relation("Menu", RelationKind::HasOne, "Menu")
                    .with_cache_key(),
            ])
            .unwrap(),
        );
        let graph = RelationGraph::build(registry).unwrap();
        let edges = graph.edges_from(&TypeName::new("MenuItem"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, TypeName::new("Menu"));
        assert_eq!(edges[0].relation, "Menu");
        assert_eq!(edges[0].kind, RelationKind::HasOne);
    }

    #[test]
    fn test_explicit_via_field_wins() {
        // Page has two FKs to Image; the declaration disambiguates which one
        // the edge resolves through.
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Image")
                    .relation("Pages", RelationKind::HasMany, "Page")
                    .touches(RelationRef::via("Pages", "BannerImage"))
                    .with_cache_key(),
                TypeDescriptor::new("Page")
                    .relation("BannerImage", RelationKind::HasOne, "Image")
                    .relation("Thumbnail", RelationKind::HasOne, "Image")
                    .with_cache_key(),
            ])
            .unwrap(),
        );
        let graph = RelationGraph::build(registry).unwrap();
        let edges = graph.edges_from(&TypeName::new("Image"));
        assert_eq!(edges[0].relation, "BannerImage");
    }

    #[test]
    fn test_ambiguous_reverse_field_fails_fast() {
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Image")
                    .relation("Pages", RelationKind::HasMany, "Page")
                    .touches("Pages")
                    .with_cache_key(),
                TypeDescriptor::new("Page")
                    .relation("BannerImage", RelationKind::HasOne, "Image")
                    .relation("Thumbnail", RelationKind::HasOne, "Image")
                    .with_cache_key(),
            ])
            .unwrap(),
        );
        let result = RelationGraph::build(registry);
        assert!(matches!(
            result,
            Err(RekeyError::Graph(GraphError::AmbiguousReverseField { .. }))
        ));
    }

    #[test]
    fn test_unknown_relation_fails_fast() {
        let registry = Arc::new(
            TypeRegistry::new(vec![TypeDescriptor::new("Article")
                .touches("Author")
                .with_cache_key()])
            .unwrap(),
        );
        let result = RelationGraph::build(registry);
        assert!(matches!(
            result,
            Err(RekeyError::Graph(GraphError::UnknownRelation { .. }))
        ));
    }

    #[test]
    fn test_missing_reverse_field_fails_fast() {
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Author")
                    .relation("Articles", RelationKind::HasMany, "Article")
                    .touches("Articles")
                    .with_cache_key(),
                // Article has no FK back to Author.
                TypeDescriptor::new("Article").with_cache_key(),
            ])
            .unwrap(),
        );
        let result = RelationGraph::build(registry);
        assert!(matches!(
            result,
            Err(RekeyError::Graph(GraphError::NoReverseField { .. }))
        ));
    }

    #[test]
    fn test_global_cares_index() {
        let graph = RelationGraph::build(newsroom()).unwrap();
        let dependents = graph.global_dependents(&TypeName::new("SiteSettings"));
        assert_eq!(dependents, vec![TypeName::new("Widget")]);
        assert!(graph.global_dependents(&TypeName::new("Tag")).is_empty());
    }

    #[test]
    fn test_global_dependents_via_ancestor() {
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Settings").with_cache_key(),
                TypeDescriptor::new("SiteSettings")
                    .parent("Settings")
                    .with_cache_key(),
                TypeDescriptor::new("Widget")
                    .global_cares("Settings")
                    .with_cache_key(),
            ])
            .unwrap(),
        );
        let graph = RelationGraph::build(registry).unwrap();
        // Changing the subtype hits the dependency declared on the ancestor.
        let dependents = graph.global_dependents(&TypeName::new("SiteSettings"));
        assert_eq!(dependents, vec![TypeName::new("Widget")]);
    }

    #[test]
    fn test_edges_from_consults_ancestors() {
        let registry = Arc::new(
            TypeRegistry::new(vec![
                TypeDescriptor::new("Page")
                    .relation("Menu", RelationKind::HasOne, "Menu")
                    .touches("Menu")
                    .with_cache_key(),
                TypeDescriptor::new("Article").parent("Page").with_cache_key(),
                TypeDescriptor::new("Menu").with_cache_key(),
            ])
            .unwrap(),
        );
        let graph = RelationGraph::build(registry).unwrap();
        // Article inherits the edge declared from Page.
        let edges = graph.edges_from(&TypeName::new("Article"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, TypeName::new("Menu"));
    }

    #[test]
    fn test_edges_without_declarations_are_empty() {
        let graph = RelationGraph::build(newsroom()).unwrap();
        assert!(graph.edges_from(&TypeName::new("SiteSettings")).is_empty());
    }
}
