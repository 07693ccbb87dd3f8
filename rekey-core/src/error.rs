//! Error types for Rekey operations

use crate::{InstanceRef, TypeName};
use thiserror::Error;

/// Relationship-graph build errors.
///
/// All of these are configuration errors: the declarative relation sets do
/// not match the declared relation metadata. They are raised at graph build,
/// before any cache-key write, and abort the build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown type in declaration: {type_name}")]
    UnknownType { type_name: TypeName },

    #[error("Duplicate type descriptor: {type_name}")]
    DuplicateType { type_name: TypeName },

    #[error("Type {type_name} declares relation '{relation}' but no relation metadata matches")]
    UnknownRelation {
        type_name: TypeName,
        relation: String,
    },

    #[error(
        "No single-valued relation on {target} points back at {source_type} \
         (needed to resolve collection relation '{relation}')"
    )]
    NoReverseField {
        source_type: TypeName,
        target: TypeName,
        relation: String,
    },

    #[error(
        "Multiple single-valued relations on {target} point back at {source_type}; \
         declaration '{relation}' needs an explicit via-field"
    )]
    AmbiguousReverseField {
        source_type: TypeName,
        target: TypeName,
        relation: String,
    },
}

/// Storage collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {instance}")]
    NotFound { instance: InstanceRef },

    #[error("Insert failed for {instance}: {reason}")]
    InsertFailed {
        instance: InstanceRef,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache-key store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("No draft cache-key record to publish for {owner}")]
    MissingDraftRecord { owner: InstanceRef },
}

/// Master error type for all Rekey errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RekeyError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache-key error: {0}")]
    Key(#[from] KeyError),
}

/// Result type alias for Rekey operations.
pub type RekeyResult<T> = Result<T, RekeyError>;

// =============================================================================
// TESTS
// =============================================================================
