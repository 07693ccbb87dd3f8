//! Rekey Core - Entity and Cache-Key Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no traversal or storage logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod keyhash;

pub use config::RekeyConfig;
pub use error::{GraphError, KeyError, RekeyError, RekeyResult, StorageError};
pub use keyhash::{generate_key_hash, KeyDimensions};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Instance identifier using UUIDv7 for timestamp-sortable IDs.
pub type InstanceId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 InstanceId (timestamp-sortable).
pub fn new_instance_id() -> InstanceId {
    Uuid::now_v7()
}

/// Name of an entity *type*. Identity of a node in the relationship graph.
///
/// Types are identified by name rather than a closed enum because the set of
/// participating types is declared by the embedder, not known to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identity of one entity instance: type plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef {
    pub type_name: TypeName,
    pub id: InstanceId,
}

impl InstanceRef {
    pub fn new(type_name: impl Into<TypeName>, id: InstanceId) -> Self {
        Self {
            type_name: type_name.into(),
            id,
        }
    }

    /// Fallback uniqueness token: `type:id`.
    pub fn token(&self) -> String {
        format!("{}:{}", self.type_name, self.id)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Kind of a declared relation, as seen from the side that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Single-valued, foreign key lives on the declaring side.
    HasOne,
    /// Single-valued, foreign key lives on the other side (inverse accessor).
    BelongsTo,
    /// One-to-many collection; each member carries the foreign key.
    HasMany,
    /// Many-to-many collection through a join index.
    ManyMany,
    /// Many-to-many collection through an explicit join type.
    ManyManyThrough,
}

impl RelationKind {
    /// True for relations that resolve to zero-or-one related instance.
    pub fn is_single_valued(&self) -> bool {
        matches!(self, Self::HasOne | Self::BelongsTo)
    }

    /// True for relations that resolve to a collection.
    pub fn is_collection(&self) -> bool {
        !self.is_single_valued()
    }
}

/// Storage stage: two parallel contexts for the same logical data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Draft,
    Live,
}

/// Which cascade a propagation pass is running.
///
/// A draft cascade only touches draft-stage records. A publish cascade writes
/// the draft record and additionally copies it into the live stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeKind {
    Draft,
    Publish,
}

// ============================================================================
// RECORDS
// ============================================================================

/// Versioned cache-key record owned by exactly one entity instance.
///
/// Created lazily on first invalidation, updated in place on every subsequent
/// invalidation, removed when the owner is deleted. The same owner may hold
/// one record per stage; that drift is expected, not a defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKeyRecord {
    pub owner: InstanceRef,
    /// Opaque uniqueness hash. Changes on every regeneration; never a
    /// content hash.
    pub key_hash: String,
    pub stage: Stage,
    pub published: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl CacheKeyRecord {
    pub fn new(owner: InstanceRef, key_hash: String, stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            owner,
            key_hash,
            stage,
            published: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pass-scoped record of one already-invalidated instance.
///
/// Lives only inside a propagation pass tracker; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedUpdate {
    pub owner: InstanceRef,
    /// Whether the instance's key has been published during this pass.
    pub published: bool,
}

impl ProcessedUpdate {
    pub fn new(owner: InstanceRef) -> Self {
        Self {
            owner,
            published: false,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_ref_token() {
        let id = Uuid::nil();
        let r = InstanceRef::new("Article", id);
        assert_eq!(
            r.token(),
            "Article:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_instance_ref_display() {
        let r = InstanceRef::new("Author", Uuid::nil());
        assert_eq!(
            r.to_string(),
            "Author#00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_relation_kind_cardinality() {
        assert!(RelationKind::HasOne.is_single_valued());
        assert!(RelationKind::BelongsTo.is_single_valued());
        assert!(RelationKind::HasMany.is_collection());
        assert!(RelationKind::ManyMany.is_collection());
        assert!(RelationKind::ManyManyThrough.is_collection());
    }

    #[test]
    fn test_cache_key_record_starts_unpublished() {
        let record = CacheKeyRecord::new(
            InstanceRef::new("Page", new_instance_id()),
            "abc".to_string(),
            Stage::Draft,
        );
        assert!(!record.published);
        assert_eq!(record.stage, Stage::Draft);
    }

    #[test]
    fn test_type_name_ordering_is_stable() {
        let mut names = vec![
            TypeName::new("Widget"),
            TypeName::new("Article"),
            TypeName::new("Page"),
        ];
        names.sort();
        assert_eq!(names[0].as_str(), "Article");
        assert_eq!(names[2].as_str(), "Widget");
    }
}
