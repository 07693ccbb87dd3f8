//! Immutable table of typed relation descriptors.
//!
//! The registry replaces runtime reflection: every entity type the embedder
//! knows about is described once, up front, and the graph build reads only
//! this table.

use rekey_core::{GraphError, RekeyResult, RelationKind, TypeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One declared physical relation on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationField {
    /// Field name on the declaring type.
    pub name: String,
    pub kind: RelationKind,
    /// Target type; may be an abstract supertype for polymorphic relations.
    pub target: TypeName,
}

/// Reference to a relation inside a `touches`/`cares` declaration.
///
/// `via_field` disambiguates which physical field an edge corresponds to
/// when the relation's target type has several single-valued relations back
/// to the declaring type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub relation: String,
    pub via_field: Option<String>,
}

impl RelationRef {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            via_field: None,
        }
    }

    pub fn via(relation: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            via_field: Some(field.into()),
        }
    }
}

impl From<&str> for RelationRef {
    fn from(relation: &str) -> Self {
        Self::new(relation)
    }
}

/// Declarative description of one known entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: TypeName,
    /// Parent type for polymorphic resolution; `None` for root types.
    pub parent: Option<TypeName>,
    /// Physical relations, in declaration order.
    pub relations: Vec<RelationField>,
    /// "I change, therefore you are invalidated."
    pub touches: Vec<RelationRef>,
    /// "You change, therefore I am invalidated."
    pub cares: Vec<RelationRef>,
    /// Types whose every change purges ALL of this type's cache keys.
    pub global_cares: Vec<TypeName>,
    /// Whether instances of this type receive cache keys at all.
    pub has_cache_key: bool,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            relations: Vec::new(),
            touches: Vec::new(),
            cares: Vec::new(),
            global_cares: Vec::new(),
            has_cache_key: false,
        }
    }

    pub fn parent(mut self, parent: impl Into<TypeName>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn relation(
        mut self,
        name: impl Into<String>,
        kind: RelationKind,
        target: impl Into<TypeName>,
    ) -> Self {
        self.relations.push(RelationField {
            name: name.into(),
            kind,
            target: target.into(),
        });
        self
    }

    pub fn touches(mut self, relation: impl Into<RelationRef>) -> Self {
        self.touches.push(relation.into());
        self
    }

    pub fn cares(mut self, relation: impl Into<RelationRef>) -> Self {
        self.cares.push(relation.into());
        self
    }

    pub fn global_cares(mut self, dependency: impl Into<TypeName>) -> Self {
        self.global_cares.push(dependency.into());
        self
    }

    pub fn with_cache_key(mut self) -> Self {
        self.has_cache_key = true;
        self
    }

    /// Look up a relation field by name.
    pub fn relation_field(&self, name: &str) -> Option<&RelationField> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Immutable set of type descriptors with ancestor/descendant walks.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    /// Descriptors in declaration order (drives deterministic edge order).
    order: Vec<TypeName>,
    types: BTreeMap<TypeName, TypeDescriptor>,
}

impl TypeRegistry {
    /// Build a registry from descriptors.
    ///
    /// Fails fast on duplicate type names and on parents or relation targets
    /// that are not themselves declared.
    pub fn new(descriptors: Vec<TypeDescriptor>) -> RekeyResult<Self> {
        let mut order = Vec::with_capacity(descriptors.len());
        let mut types = BTreeMap::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if types.insert(name.clone(), descriptor).is_some() {
                return Err(GraphError::DuplicateType { type_name: name }.into());
            }
            order.push(name);
        }

        let registry = Self { order, types };
        for descriptor in registry.iter() {
            if let Some(parent) = &descriptor.parent {
                registry.require(parent)?;
            }
            for field in &descriptor.relations {
                registry.require(&field.target)?;
            }
            for dependency in &descriptor.global_cares {
                registry.require(dependency)?;
            }
        }
        Ok(registry)
    }

    fn require(&self, type_name: &TypeName) -> RekeyResult<&TypeDescriptor> {
        self.types.get(type_name).ok_or_else(|| {
            GraphError::UnknownType {
                type_name: type_name.clone(),
            }
            .into()
        })
    }

    pub fn get(&self, type_name: &TypeName) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    /// Iterate descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Ancestor chain of a type: the type itself first, then each parent.
    ///
    /// Cycles in parent declarations are cut off rather than looped over.
    pub fn ancestors(&self, type_name: &TypeName) -> Vec<TypeName> {
        let mut chain = Vec::new();
        let mut current = Some(type_name.clone());
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            current = self.types.get(&name).and_then(|d| d.parent.clone());
            chain.push(name);
        }
        chain
    }

    /// All types whose ancestor chain contains `type_name` (itself included).
    pub fn descendants(&self, type_name: &TypeName) -> Vec<TypeName> {
        self.order
            .iter()
            .filter(|candidate| self.ancestors(candidate).contains(type_name))
            .cloned()
            .collect()
    }

    /// Whether a type has opted into cache keys.
    pub fn has_cache_key(&self, type_name: &TypeName) -> bool {
        self.types
            .get(type_name)
            .map(|d| d.has_cache_key)
            .unwrap_or(false)
    }
}

// ============================================================================
// TESTS
// ============================================================================
