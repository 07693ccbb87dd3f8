//! Staged cache-key store.
//!
//! Policy layer over a [`CacheKeyBackend`]: key generation, the per-type
//! opt-in check, and the draft-stage lookup rule. The backend only moves
//! records; everything the engine relies on lives here.

use crate::{CacheKeyBackend, Record};
use chrono::Utc;
use rekey_core::config::PublishMode;
use rekey_core::{
    generate_key_hash, CacheKeyRecord, InstanceRef, KeyDimensions, RekeyResult, Stage, TypeName,
};
use rekey_graph::TypeRegistry;
use std::sync::Arc;

/// Per-(owner type, owner id) cache-key store with draft/live staging.
pub struct CacheKeyStore {
    backend: Arc<dyn CacheKeyBackend>,
    registry: Arc<TypeRegistry>,
    dimensions: KeyDimensions,
}

impl CacheKeyStore {
    pub fn new(backend: Arc<dyn CacheKeyBackend>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            backend,
            registry,
            dimensions: KeyDimensions::new(),
        }
    }

    /// Append extra dimensions to every generated key hash.
    pub fn with_dimensions(mut self, dimensions: KeyDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Whether instances of this type receive cache keys.
    ///
    /// The opt-in is inherited: a subtype of a keyed type is keyed.
    pub fn is_keyed(&self, type_name: &TypeName) -> bool {
        self.registry
            .ancestors(type_name)
            .iter()
            .any(|ancestor| self.registry.has_cache_key(ancestor))
    }

    /// Find the owner's record, creating one with a fresh hash if absent.
    ///
    /// The lookup always targets the draft stage: a publish cascade runs
    /// against live reads elsewhere, and a live-stage lookup here would miss
    /// the existing draft record and create a duplicate. Returns `None` for
    /// owners whose type has not opted into cache keys.
    pub fn find_or_create(&self, record: &Record) -> RekeyResult<Option<CacheKeyRecord>> {
        if !self.is_keyed(&record.instance.type_name) {
            return Ok(None);
        }
        if let Some(existing) = self.backend.key_find(&record.instance, Stage::Draft)? {
            return Ok(Some(existing));
        }
        let fresh = CacheKeyRecord::new(
            record.instance.clone(),
            generate_key_hash(&record.uniqueness_token(), &self.dimensions),
            Stage::Draft,
        );
        self.backend.key_upsert(fresh.clone())?;
        Ok(Some(fresh))
    }

    /// Like [`Self::find_or_create`], but always regenerates the hash.
    pub fn update_or_create(&self, record: &Record) -> RekeyResult<Option<CacheKeyRecord>> {
        if !self.is_keyed(&record.instance.type_name) {
            return Ok(None);
        }
        let hash = generate_key_hash(&record.uniqueness_token(), &self.dimensions);
        let updated = match self.backend.key_find(&record.instance, Stage::Draft)? {
            Some(mut existing) => {
                existing.key_hash = hash;
                existing.updated_at = Utc::now();
                existing
            }
            None => CacheKeyRecord::new(record.instance.clone(), hash, Stage::Draft),
        };
        self.backend.key_upsert(updated.clone())?;
        Ok(Some(updated))
    }

    /// Delete every record for the owner, across all stages.
    pub fn remove(&self, owner: &InstanceRef) -> RekeyResult<u64> {
        self.backend.key_delete_for_owner(owner)
    }

    /// Delete every record of a type in the draft-equivalent lookup stage.
    /// The global-care purge path.
    pub fn purge_type(&self, type_name: &TypeName) -> RekeyResult<u64> {
        self.backend.key_delete_for_type(type_name, Stage::Draft)
    }

    /// Publish the owner's draft record into the live stage.
    pub fn publish(&self, owner: &InstanceRef, mode: PublishMode) -> RekeyResult<()> {
        self.backend.key_publish(owner, mode)
    }

}

// ============================================================================
// TESTS
// ============================================================================
