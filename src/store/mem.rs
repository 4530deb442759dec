//! In-memory document store.
//!
//! Records live behind one `RwLock` so that the canonical-id uniqueness check
//! and the insert happen atomically; sets live in a sharded DashMap. All data
//! is lost on process exit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::model::{DocumentId, Record, Set};

use super::{DocumentStore, PageRequest, RECORDS, SETS, StoreResult, paginate};

#[derive(Debug, Default)]
struct RecordTables {
    by_key: BTreeMap<DocumentId, Record>,
    /// Canonical identifier → key. Unique.
    canonical: HashMap<String, DocumentId>,
    /// Every record identifier → keys carrying it.
    record_ids: HashMap<String, BTreeSet<DocumentId>>,
    last_key: u64,
}

impl RecordTables {
    fn index(&mut self, record: &Record, key: DocumentId) {
        if let Some(canonical) = record.canonical_id() {
            self.canonical.insert(canonical.to_string(), key);
        }
        for rid in &record.record_ids {
            self.record_ids.entry(rid.clone()).or_default().insert(key);
        }
    }

    fn unindex(&mut self, record: &Record, key: DocumentId) {
        if let Some(canonical) = record.canonical_id() {
            if self.canonical.get(canonical) == Some(&key) {
                self.canonical.remove(canonical);
            }
        }
        for rid in &record.record_ids {
            if let Some(keys) = self.record_ids.get_mut(rid) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.record_ids.remove(rid);
                }
            }
        }
    }
}

/// Concurrent in-memory store.
#[derive(Debug, Default)]
pub struct MemStore {
    records: RwLock<RecordTables>,
    sets: DashMap<String, Set>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, RecordTables>> {
        self.records.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, RecordTables>> {
        self.records.write().map_err(|_| StoreError::Poisoned)
    }
}

impl DocumentStore for MemStore {
    fn find_record(&self, record_id: &str) -> StoreResult<Option<Record>> {
        let tables = self.read()?;
        Ok(tables
            .record_ids
            .get(record_id)
            .and_then(|keys| keys.first())
            .and_then(|key| tables.by_key.get(key))
            .cloned())
    }

    fn find_records(&self, page: &PageRequest) -> StoreResult<Vec<Record>> {
        let tables = self.read()?;
        Ok(paginate(tables.by_key.values(), page))
    }

    fn count_records(&self, set: Option<&str>) -> StoreResult<usize> {
        let tables = self.read()?;
        Ok(match set {
            Some(spec) => tables.by_key.values().filter(|r| r.in_set(spec)).count(),
            None => tables.by_key.len(),
        })
    }

    fn insert_record(&self, record: &mut Record) -> StoreResult<DocumentId> {
        let canonical = record
            .canonical_id()
            .ok_or(StoreError::MissingIdentifier)?
            .to_string();
        let mut tables = self.write()?;
        if tables.canonical.contains_key(&canonical) {
            return Err(StoreError::Duplicate {
                collection: RECORDS,
                key: canonical,
            });
        }
        tables.last_key += 1;
        let key = DocumentId::new(tables.last_key).ok_or(StoreError::MissingKey)?;
        record.id = Some(key);
        tables.index(record, key);
        tables.by_key.insert(key, record.clone());
        Ok(key)
    }

    fn update_record(&self, record: &Record) -> StoreResult<()> {
        let key = record.id.ok_or(StoreError::MissingKey)?;
        let canonical = record.canonical_id().ok_or(StoreError::MissingIdentifier)?;
        let mut tables = self.write()?;
        if let Some(&owner) = tables.canonical.get(canonical) {
            if owner != key {
                return Err(StoreError::Duplicate {
                    collection: RECORDS,
                    key: canonical.to_string(),
                });
            }
        }
        let previous = tables.by_key.remove(&key).ok_or_else(|| StoreError::NotFound {
            collection: RECORDS,
            key: key.to_string(),
        })?;
        tables.unindex(&previous, key);
        tables.index(record, key);
        tables.by_key.insert(key, record.clone());
        Ok(())
    }

    fn delete_record(&self, id: DocumentId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        match tables.by_key.remove(&id) {
            Some(previous) => {
                tables.unindex(&previous, id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_set(&self, spec: &str) -> StoreResult<Option<Set>> {
        Ok(self.sets.get(spec).map(|s| s.value().clone()))
    }

    fn insert_set(&self, set: &Set) -> StoreResult<()> {
        match self.sets.entry(set.spec.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                collection: SETS,
                key: set.spec.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(set.clone());
                Ok(())
            }
        }
    }

    fn find_sets(&self, offset: usize, limit: usize) -> StoreResult<Vec<Set>> {
        let mut sets: Vec<Set> = self.sets.iter().map(|e| e.value().clone()).collect();
        sets.sort_by(|a, b| a.spec.cmp(&b.spec));
        Ok(sets.into_iter().skip(offset).take(limit).collect())
    }

    fn count_sets(&self) -> StoreResult<usize> {
        Ok(self.sets.len())
    }
}
