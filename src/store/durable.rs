//! ACID-durable document store backed by redb.
//!
//! Records and sets are stored as JSON documents. Three index tables keep
//! record lookups cheap: the canonical identifier index (unique), the
//! `(record id, key)` index covering every identifier a record carries and
//! the `(set spec, key)` membership index. Listings walk an index in order
//! and only decode the records on the requested page.
//! redb serializes write transactions, so a uniqueness check and the write
//! that follows it cannot interleave with another writer.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::StoreError;
use crate::model::{DocumentId, Record, Set};

use super::{DocumentStore, PageRequest, RECORDS, SETS, SortField, SortOrder, StoreResult};

/// Primary key → record JSON.
const RECORD_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
/// Canonical identifier → primary key.
const CANONICAL_TABLE: TableDefinition<&str, u64> = TableDefinition::new("record_canonical");
/// (record identifier, primary key) → ().
const RECORD_ID_TABLE: TableDefinition<(&str, u64), ()> = TableDefinition::new("record_ids");
/// (set spec, primary key) → ().
const RECORD_SET_TABLE: TableDefinition<(&str, u64), ()> = TableDefinition::new("record_sets");
/// Spec → set JSON.
const SET_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sets");
/// Counters.
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const LAST_RECORD_KEY: &str = "last_record_key";

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode_record(key: u64, bytes: &[u8]) -> StoreResult<Record> {
    let mut record: Record =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
            message: format!("record {key}: {e}"),
        })?;
    record.id = DocumentId::new(key);
    Ok(record)
}

/// Fetch and decode the record stored under `key`.
fn load<T: ReadableTable<u64, &'static [u8]>>(records: &T, key: u64) -> StoreResult<Record> {
    let bytes = records
        .get(key)
        .map_err(redb_err("get"))?
        .ok_or_else(|| StoreError::NotFound {
            collection: RECORDS,
            key: key.to_string(),
        })?;
    decode_record(key, bytes.value())
}

/// Slice one page of primary keys off an ordered index walk.
fn page_keys<'a>(
    keys: impl DoubleEndedIterator<Item = StoreResult<u64>> + 'a,
    order: SortOrder,
    page: &PageRequest,
) -> StoreResult<Vec<u64>> {
    let keys: Box<dyn Iterator<Item = StoreResult<u64>> + 'a> = match order {
        SortOrder::Asc => Box::new(keys),
        SortOrder::Desc => Box::new(keys.rev()),
    };
    keys.skip(page.offset).take(page.limit).collect()
}

fn decode_set(bytes: &[u8]) -> StoreResult<Set> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// Document store persisted in a single redb file.
///
/// All writes go through transactions. Reads use MVCC snapshots.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create the store in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("datahub.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create every table up front so read transactions can open them.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(CANONICAL_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(RECORD_ID_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(SET_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        tracing::debug!(path = %db_path.display(), "opened durable store");
        Ok(Self { db: Arc::new(db) })
    }
}

impl DocumentStore for DurableStore {
    fn find_record(&self, record_id: &str) -> StoreResult<Option<Record>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let ids = txn.open_table(RECORD_ID_TABLE).map_err(redb_err("open_table"))?;
        let first = ids
            .range((record_id, 0u64)..=(record_id, u64::MAX))
            .map_err(redb_err("range"))?
            .next();
        let key = match first {
            Some(entry) => {
                let (k, _) = entry.map_err(redb_err("range"))?;
                k.value().1
            }
            None => return Ok(None),
        };

        let records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
        let found = records.get(key).map_err(redb_err("get"))?;
        found.map(|bytes| decode_record(key, bytes.value())).transpose()
    }

    fn find_records(&self, page: &PageRequest) -> StoreResult<Vec<Record>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
        let members = txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
        let (field, order) = page
            .sort
            .map_or((SortField::Id, SortOrder::Asc), |s| (s.field, s.order));

        let keys = match (field, page.set.as_deref()) {
            (SortField::Id, None) => {
                let walk = records.iter().map_err(redb_err("iter"))?;
                page_keys(
                    walk.map(|e| e.map(|(k, _)| k.value()).map_err(redb_err("iter"))),
                    order,
                    page,
                )?
            }
            (SortField::Id, Some(spec)) => {
                let walk = members
                    .range((spec, 0u64)..=(spec, u64::MAX))
                    .map_err(redb_err("range"))?;
                page_keys(
                    walk.map(|e| e.map(|(k, _)| k.value().1).map_err(redb_err("range"))),
                    order,
                    page,
                )?
            }
            (SortField::RecordIds, set) => {
                // The canonical index is ordered by canonical identifier.
                let in_set = match set {
                    Some(spec) => {
                        let mut keys = HashSet::new();
                        for entry in members
                            .range((spec, 0u64)..=(spec, u64::MAX))
                            .map_err(redb_err("range"))?
                        {
                            keys.insert(entry.map_err(redb_err("range"))?.0.value().1);
                        }
                        Some(keys)
                    }
                    None => None,
                };
                let canonical = txn.open_table(CANONICAL_TABLE).map_err(redb_err("open_table"))?;
                let walk = canonical.iter().map_err(redb_err("iter"))?;
                page_keys(
                    walk.map(|e| e.map(|(_, v)| v.value()).map_err(redb_err("iter")))
                        .filter(|key| match (key, &in_set) {
                            (Ok(key), Some(in_set)) => in_set.contains(key),
                            _ => true,
                        }),
                    order,
                    page,
                )?
            }
        };

        keys.into_iter().map(|key| load(&records, key)).collect()
    }

    fn count_records(&self, set: Option<&str>) -> StoreResult<usize> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let Some(spec) = set else {
            let records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
            return Ok(records.len().map_err(redb_err("len"))? as usize);
        };
        let members = txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
        let mut count = 0;
        for entry in members
            .range((spec, 0u64)..=(spec, u64::MAX))
            .map_err(redb_err("range"))?
        {
            entry.map_err(redb_err("range"))?;
            count += 1;
        }
        Ok(count)
    }

    fn insert_record(&self, record: &mut Record) -> StoreResult<DocumentId> {
        let canonical = record
            .canonical_id()
            .ok_or(StoreError::MissingIdentifier)?
            .to_string();

        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let key = {
            let mut canonical_index = txn.open_table(CANONICAL_TABLE).map_err(redb_err("open_table"))?;
            let taken = canonical_index
                .get(canonical.as_str())
                .map_err(redb_err("get"))?
                .is_some();
            if taken {
                return Err(StoreError::Duplicate {
                    collection: RECORDS,
                    key: canonical,
                });
            }

            let mut meta = txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
            let last = meta
                .get(LAST_RECORD_KEY)
                .map_err(redb_err("get"))?
                .map(|g| g.value())
                .unwrap_or(0);
            let key = last + 1;
            meta.insert(LAST_RECORD_KEY, key).map_err(redb_err("insert"))?;

            let mut stored = record.clone();
            stored.id = DocumentId::new(key);
            let bytes = encode(&stored)?;
            let mut records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
            records.insert(key, bytes.as_slice()).map_err(redb_err("insert"))?;
            canonical_index
                .insert(canonical.as_str(), key)
                .map_err(redb_err("insert"))?;

            let mut ids = txn.open_table(RECORD_ID_TABLE).map_err(redb_err("open_table"))?;
            for rid in &record.record_ids {
                ids.insert((rid.as_str(), key), ()).map_err(redb_err("insert"))?;
            }
            let mut members = txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
            for spec in &record.sets {
                members.insert((spec.as_str(), key), ()).map_err(redb_err("insert"))?;
            }
            key
        };
        txn.commit().map_err(redb_err("commit"))?;

        let id = DocumentId::new(key).ok_or(StoreError::MissingKey)?;
        record.id = Some(id);
        Ok(id)
    }

    fn update_record(&self, record: &Record) -> StoreResult<()> {
        let key = record.id.ok_or(StoreError::MissingKey)?.get();
        let canonical = record.canonical_id().ok_or(StoreError::MissingIdentifier)?;

        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
            let previous = records
                .get(key)
                .map_err(redb_err("get"))?
                .map(|bytes| decode_record(key, bytes.value()))
                .transpose()?
                .ok_or_else(|| StoreError::NotFound {
                    collection: RECORDS,
                    key: key.to_string(),
                })?;

            let mut canonical_index = txn.open_table(CANONICAL_TABLE).map_err(redb_err("open_table"))?;
            let owner = canonical_index
                .get(canonical)
                .map_err(redb_err("get"))?
                .map(|g| g.value());
            if owner.is_some_and(|owner| owner != key) {
                return Err(StoreError::Duplicate {
                    collection: RECORDS,
                    key: canonical.to_string(),
                });
            }

            let mut ids = txn.open_table(RECORD_ID_TABLE).map_err(redb_err("open_table"))?;
            if let Some(old) = previous.canonical_id() {
                canonical_index.remove(old).map_err(redb_err("remove"))?;
            }
            for rid in &previous.record_ids {
                ids.remove((rid.as_str(), key)).map_err(redb_err("remove"))?;
            }
            let mut members = txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
            for spec in &previous.sets {
                members.remove((spec.as_str(), key)).map_err(redb_err("remove"))?;
            }
            canonical_index.insert(canonical, key).map_err(redb_err("insert"))?;
            for rid in &record.record_ids {
                ids.insert((rid.as_str(), key), ()).map_err(redb_err("insert"))?;
            }
            for spec in &record.sets {
                members.insert((spec.as_str(), key), ()).map_err(redb_err("insert"))?;
            }
            let bytes = encode(record)?;
            records.insert(key, bytes.as_slice()).map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    fn delete_record(&self, id: DocumentId) -> StoreResult<bool> {
        let key = id.get();
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let existed = {
            let mut records = txn.open_table(RECORD_TABLE).map_err(redb_err("open_table"))?;
            let previous = records
                .remove(key)
                .map_err(redb_err("remove"))?
                .map(|bytes| decode_record(key, bytes.value()))
                .transpose()?;
            match previous {
                Some(previous) => {
                    let mut canonical_index =
                        txn.open_table(CANONICAL_TABLE).map_err(redb_err("open_table"))?;
                    if let Some(canonical) = previous.canonical_id() {
                        canonical_index.remove(canonical).map_err(redb_err("remove"))?;
                    }
                    let mut ids = txn.open_table(RECORD_ID_TABLE).map_err(redb_err("open_table"))?;
                    for rid in &previous.record_ids {
                        ids.remove((rid.as_str(), key)).map_err(redb_err("remove"))?;
                    }
                    let mut members =
                        txn.open_table(RECORD_SET_TABLE).map_err(redb_err("open_table"))?;
                    for spec in &previous.sets {
                        members.remove((spec.as_str(), key)).map_err(redb_err("remove"))?;
                    }
                    true
                }
                None => false,
            }
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(existed)
    }

    fn find_set(&self, spec: &str) -> StoreResult<Option<Set>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let sets = txn.open_table(SET_TABLE).map_err(redb_err("open_table"))?;
        let found = sets.get(spec).map_err(redb_err("get"))?;
        found.map(|bytes| decode_set(bytes.value())).transpose()
    }

    fn insert_set(&self, set: &Set) -> StoreResult<()> {
        let bytes = encode(set)?;
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut sets = txn.open_table(SET_TABLE).map_err(redb_err("open_table"))?;
            let exists = sets
                .get(set.spec.as_str())
                .map_err(redb_err("get"))?
                .is_some();
            if exists {
                return Err(StoreError::Duplicate {
                    collection: SETS,
                    key: set.spec.clone(),
                });
            }
            sets.insert(set.spec.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    fn find_sets(&self, offset: usize, limit: usize) -> StoreResult<Vec<Set>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let sets = txn.open_table(SET_TABLE).map_err(redb_err("open_table"))?;
        let mut page = Vec::new();
        for entry in sets.iter().map_err(redb_err("iter"))?.skip(offset).take(limit) {
            let (_, v) = entry.map_err(redb_err("iter"))?;
            page.push(decode_set(v.value())?);
        }
        Ok(page)
    }

    fn count_sets(&self) -> StoreResult<usize> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let sets = txn.open_table(SET_TABLE).map_err(redb_err("open_table"))?;
        Ok(sets.len().map_err(redb_err("len"))? as usize)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}
