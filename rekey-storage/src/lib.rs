//! Rekey Storage - Collaborator Traits and In-Memory Store
//!
//! The entity storage/ORM layer is an external collaborator; this crate
//! specifies it at its interface boundary ([`RecordStore`] for instance
//! reads, [`CacheKeyBackend`] for cache-key persistence) and ships the
//! in-memory implementation used by tests and embedders without an ORM.
//!
//! Stage is an explicit parameter on every cache-key read/write. There is no
//! ambient "current stage" to scope and restore; a cascade carries its stage
//! as a value.

pub mod keys;

pub use keys::CacheKeyStore;

use chrono::Utc;
use rekey_core::config::PublishMode;
use rekey_core::{
    CacheKeyRecord, InstanceRef, KeyError, RekeyResult, Stage, StorageError, TypeName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

// ============================================================================
// RECORD SNAPSHOT
// ============================================================================

/// Runtime snapshot of one entity instance, as handed to the engine by a
/// write/publish/delete hook.
///
/// Only the parts the engine needs are present: identity, the persisted
/// flag, foreign-key values, and an optional uniqueness-token override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub instance: InstanceRef,
    /// False for an instance that has never been written; nothing propagates
    /// from an instance with no identity.
    pub exists: bool,
    /// Foreign-key field values. An absent field is a null foreign key.
    pub foreign_keys: BTreeMap<String, InstanceRef>,
    /// Uniqueness-token override; `type:id` when absent.
    pub token: Option<String>,
}

impl Record {
    /// A persisted record with no foreign keys set.
    pub fn new(instance: InstanceRef) -> Self {
        Self {
            instance,
            exists: true,
            foreign_keys: BTreeMap::new(),
            token: None,
        }
    }

    /// A record that has not been written yet.
    pub fn unsaved(instance: InstanceRef) -> Self {
        Self {
            exists: false,
            ..Self::new(instance)
        }
    }

    pub fn with_foreign_key(
        mut self,
        field: impl Into<String>,
        target: InstanceRef,
    ) -> Self {
        self.foreign_keys.insert(field.into(), target);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read a foreign-key field; `None` is a null foreign key, not an error.
    pub fn foreign_key(&self, field: &str) -> Option<&InstanceRef> {
        self.foreign_keys.get(field)
    }

    /// The uniqueness token fed into key-hash generation.
    pub fn uniqueness_token(&self) -> String {
        self.token
            .clone()
            .unwrap_or_else(|| self.instance.token())
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Instance reads consumed from the ORM collaborator.
///
/// All queries are exact-type: polymorphic targets are expanded to concrete
/// types by the caller before querying, so implementations never need
/// type-hierarchy knowledge.
pub trait RecordStore: Send + Sync {
    /// Fetch one instance by reference.
    fn record_get(&self, instance: &InstanceRef) -> RekeyResult<Option<Record>>;

    /// All records of `type_name` whose foreign-key `field` points at
    /// `target`. Foreign keys match by id, so a key stored against a
    /// subtype still matches a supertype-declared relation.
    fn records_by_foreign_key(
        &self,
        type_name: &TypeName,
        field: &str,
        target: &InstanceRef,
    ) -> RekeyResult<Vec<Record>>;

    /// All records of `type_name` joined to `instance` under the named
    /// many-many relation.
    fn records_related_many(
        &self,
        type_name: &TypeName,
        instance: &InstanceRef,
        relation: &str,
    ) -> RekeyResult<Vec<Record>>;
}

/// Cache-key persistence consumed from the ORM collaborator.
pub trait CacheKeyBackend: Send + Sync {
    fn key_find(&self, owner: &InstanceRef, stage: Stage) -> RekeyResult<Option<CacheKeyRecord>>;

    /// Insert or update the record for (owner, stage).
    fn key_upsert(&self, record: CacheKeyRecord) -> RekeyResult<()>;

    /// Delete every record for the owner, across all stages. Returns the
    /// number removed; staging drift legitimately produces more than one.
    fn key_delete_for_owner(&self, owner: &InstanceRef) -> RekeyResult<u64>;

    /// Delete every record of a type in one stage. Returns the number
    /// removed.
    fn key_delete_for_type(&self, type_name: &TypeName, stage: Stage) -> RekeyResult<u64>;

    /// All records of a type in one stage.
    fn keys_for_type(&self, type_name: &TypeName, stage: Stage)
        -> RekeyResult<Vec<CacheKeyRecord>>;

    /// Publish the owner's draft record into the live stage.
    ///
    /// `mode` distinguishes single from recursive publication for backends
    /// whose records own further versioned objects.
    fn key_publish(&self, owner: &InstanceRef, mode: PublishMode) -> RekeyResult<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct JoinRow {
    relation: String,
    left: InstanceRef,
    right: InstanceRef,
}

/// In-memory implementation of both collaborator traits.
///
/// Backs the engine in tests and in embedders that have no ORM. Interior
/// mutability via `RwLock`; a poisoned lock surfaces as
/// [`StorageError::LockPoisoned`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<InstanceRef, Record>>,
    joins: RwLock<Vec<JoinRow>>,
    keys: RwLock<HashMap<(InstanceRef, Stage), CacheKeyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Fails if the instance already exists.
    pub fn record_insert(&self, record: Record) -> RekeyResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let instance = record.instance.clone();
        if records.contains_key(&instance) {
            return Err(StorageError::InsertFailed {
                instance,
                reason: "already exists".to_string(),
            }
            .into());
        }
        records.insert(instance, record);
        Ok(())
    }

    /// Replace a record's snapshot (upsert semantics for test fixtures).
    pub fn record_put(&self, record: Record) -> RekeyResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        records.insert(record.instance.clone(), record);
        Ok(())
    }

    /// Remove a record; join rows referencing it stay until unlinked, which
    /// mirrors an ORM where join rows are cleaned up separately.
    pub fn record_remove(&self, instance: &InstanceRef) -> RekeyResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        records.remove(instance);
        Ok(())
    }

    /// Link two instances under a named many-many relation.
    pub fn link(
        &self,
        relation: impl Into<String>,
        left: InstanceRef,
        right: InstanceRef,
    ) -> RekeyResult<()> {
        let mut joins = self.joins.write().map_err(|_| StorageError::LockPoisoned)?;
        joins.push(JoinRow {
            relation: relation.into(),
            left,
            right,
        });
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn record_get(&self, instance: &InstanceRef) -> RekeyResult<Option<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.get(instance).cloned())
    }

    fn records_by_foreign_key(
        &self,
        type_name: &TypeName,
        field: &str,
        target: &InstanceRef,
    ) -> RekeyResult<Vec<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut matches: Vec<Record> = records
            .values()
            .filter(|r| {
                r.instance.type_name == *type_name
                    && r.foreign_key(field).map(|fk| fk.id) == Some(target.id)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.instance.cmp(&b.instance));
        Ok(matches)
    }

    fn records_related_many(
        &self,
        type_name: &TypeName,
        instance: &InstanceRef,
        relation: &str,
    ) -> RekeyResult<Vec<Record>> {
        let joins = self.joins.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut partners: Vec<InstanceRef> = joins
            .iter()
            .filter(|row| row.relation == relation)
            .filter_map(|row| {
                if row.left == *instance {
                    Some(row.right.clone())
                } else if row.right == *instance {
                    Some(row.left.clone())
                } else {
                    None
                }
            })
            .filter(|partner| partner.type_name == *type_name)
            .collect();
        partners.sort();
        partners.dedup();
        drop(joins);

        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(partners
            .into_iter()
            .filter_map(|p| records.get(&p).cloned())
            .collect())
    }
}

impl CacheKeyBackend for MemoryStore {
    fn key_find(&self, owner: &InstanceRef, stage: Stage) -> RekeyResult<Option<CacheKeyRecord>> {
        let keys = self.keys.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(keys.get(&(owner.clone(), stage)).cloned())
    }

    fn key_upsert(&self, record: CacheKeyRecord) -> RekeyResult<()> {
        let mut keys = self.keys.write().map_err(|_| StorageError::LockPoisoned)?;
        keys.insert((record.owner.clone(), record.stage), record);
        Ok(())
    }

    fn key_delete_for_owner(&self, owner: &InstanceRef) -> RekeyResult<u64> {
        let mut keys = self.keys.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = keys.len();
        keys.retain(|(record_owner, _), _| record_owner != owner);
        Ok((before - keys.len()) as u64)
    }

    fn key_delete_for_type(&self, type_name: &TypeName, stage: Stage) -> RekeyResult<u64> {
        let mut keys = self.keys.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = keys.len();
        keys.retain(|(owner, record_stage), _| {
            !(owner.type_name == *type_name && *record_stage == stage)
        });
        Ok((before - keys.len()) as u64)
    }

    fn keys_for_type(
        &self,
        type_name: &TypeName,
        stage: Stage,
    ) -> RekeyResult<Vec<CacheKeyRecord>> {
        let keys = self.keys.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<CacheKeyRecord> = keys
            .values()
            .filter(|r| r.owner.type_name == *type_name && r.stage == stage)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(result)
    }

    fn key_publish(&self, owner: &InstanceRef, _mode: PublishMode) -> RekeyResult<()> {
        // In-memory records own nothing, so single and recursive publication
        // coincide; the mode matters for ORM backends with nested ownership.
        let mut keys = self.keys.write().map_err(|_| StorageError::LockPoisoned)?;
        let draft = keys
            .get_mut(&(owner.clone(), Stage::Draft))
            .ok_or_else(|| KeyError::MissingDraftRecord {
                owner: owner.clone(),
            })?;
        draft.published = true;
        let hash = draft.key_hash.clone();
        let created_at = draft.created_at;

        let live = keys
            .entry((owner.clone(), Stage::Live))
            .or_insert_with(|| {
                let mut record =
                    CacheKeyRecord::new(owner.clone(), hash.clone(), Stage::Live);
                record.created_at = created_at;
                record
            });
        live.key_hash = hash;
        live.published = true;
        live.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rekey_core::new_instance_id;

    fn article_with_author(author: &InstanceRef) -> Record {
        Record::new(InstanceRef::new("Article", new_instance_id()))
            .with_foreign_key("Author", author.clone())
    }

    #[test]
    fn test_record_insert_and_get() {
        let store = MemoryStore::new();
        let instance = InstanceRef::new("Page", new_instance_id());
        store.record_insert(Record::new(instance.clone())).unwrap();
        assert!(store.record_get(&instance).unwrap().is_some());
    }

    #[test]
    fn test_record_double_insert_fails() {
        let store = MemoryStore::new();
        let instance = InstanceRef::new("Page", new_instance_id());
        store.record_insert(Record::new(instance.clone())).unwrap();
        assert!(store.record_insert(Record::new(instance)).is_err());
    }

    #[test]
    fn test_foreign_key_query_matches_by_id() {
        let store = MemoryStore::new();
        let author = InstanceRef::new("Author", new_instance_id());
        let other = InstanceRef::new("Author", new_instance_id());
        store.record_insert(Record::new(author.clone())).unwrap();
        store.record_insert(Record::new(other.clone())).unwrap();
        let mine = article_with_author(&author);
        store.record_insert(mine.clone()).unwrap();
        store.record_insert(article_with_author(&other)).unwrap();

        let found = store
            .records_by_foreign_key(&TypeName::new("Article"), "Author", &author)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance, mine.instance);
    }

    #[test]
    fn test_related_many_is_symmetric() {
        let store = MemoryStore::new();
        let article = InstanceRef::new("Article", new_instance_id());
        let tag = InstanceRef::new("Tag", new_instance_id());
        store.record_insert(Record::new(article.clone())).unwrap();
        store.record_insert(Record::new(tag.clone())).unwrap();
        store.link("Tags", article.clone(), tag.clone()).unwrap();

        let from_tag = store
            .records_related_many(&TypeName::new("Article"), &tag, "Tags")
            .unwrap();
        assert_eq!(from_tag.len(), 1);
        assert_eq!(from_tag[0].instance, article);

        let from_article = store
            .records_related_many(&TypeName::new("Tag"), &article, "Tags")
            .unwrap();
        assert_eq!(from_article.len(), 1);
        assert_eq!(from_article[0].instance, tag);
    }

    #[test]
    fn test_key_upsert_find_delete() {
        let store = MemoryStore::new();
        let owner = InstanceRef::new("Page", new_instance_id());
        store
            .key_upsert(CacheKeyRecord::new(
                owner.clone(),
                "hash-a".to_string(),
                Stage::Draft,
            ))
            .unwrap();

        let found = store.key_find(&owner, Stage::Draft).unwrap().unwrap();
        assert_eq!(found.key_hash, "hash-a");
        assert!(store.key_find(&owner, Stage::Live).unwrap().is_none());

        assert_eq!(store.key_delete_for_owner(&owner).unwrap(), 1);
        assert!(store.key_find(&owner, Stage::Draft).unwrap().is_none());
    }

    #[test]
    fn test_key_delete_for_type_is_stage_scoped() {
        let store = MemoryStore::new();
        let owner = InstanceRef::new("Widget", new_instance_id());
        store
            .key_upsert(CacheKeyRecord::new(
                owner.clone(),
                "draft".to_string(),
                Stage::Draft,
            ))
            .unwrap();
        store
            .key_upsert(CacheKeyRecord::new(
                owner.clone(),
                "live".to_string(),
                Stage::Live,
            ))
            .unwrap();

        assert_eq!(
            store
                .key_delete_for_type(&TypeName::new("Widget"), Stage::Draft)
                .unwrap(),
            1
        );
        assert!(store.key_find(&owner, Stage::Draft).unwrap().is_none());
        assert!(store.key_find(&owner, Stage::Live).unwrap().is_some());
    }

    #[test]
    fn test_publish_copies_draft_hash_to_live() {
        let store = MemoryStore::new();
        let owner = InstanceRef::new("Page", new_instance_id());
        store
            .key_upsert(CacheKeyRecord::new(
                owner.clone(),
                "draft-hash".to_string(),
                Stage::Draft,
            ))
            .unwrap();

        store.key_publish(&owner, PublishMode::Single).unwrap();

        let draft = store.key_find(&owner, Stage::Draft).unwrap().unwrap();
        let live = store.key_find(&owner, Stage::Live).unwrap().unwrap();
        assert!(draft.published);
        assert!(live.published);
        assert_eq!(live.key_hash, "draft-hash");
    }

    #[test]
    fn test_publish_without_draft_fails() {
        let store = MemoryStore::new();
        let owner = InstanceRef::new("Page", new_instance_id());
        let result = store.key_publish(&owner, PublishMode::Single);
        assert!(matches!(
            result,
            Err(rekey_core::RekeyError::Key(
                KeyError::MissingDraftRecord { .. }
            ))
        ));
    }

    #[test]
    fn test_uniqueness_token_fallback() {
        let instance = InstanceRef::new("Page", uuid::Uuid::nil());
        let record = Record::new(instance.clone());
        assert_eq!(record.uniqueness_token(), instance.token());

        let with_token = Record::new(instance).with_token("page-home");
        assert_eq!(with_token.uniqueness_token(), "page-home");
    }
}
