//! Document storage for records and sets.
//!
//! Two backends implement [`DocumentStore`]:
//!
//! - [`MemStore`](mem::MemStore): concurrent in-memory maps, lost on exit
//! - [`DurableStore`](durable::DurableStore): ACID transactions in redb
//!
//! Both enforce the same uniqueness rules, which are the authority for
//! conflict detection: one record per canonical identifier (the first
//! record id) and one set per spec. Callers may look up before inserting
//! for a friendlier error, but a racing insert still fails with
//! [`StoreError::Duplicate`].

pub mod durable;
pub mod mem;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{DocumentId, Record, Set};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub(crate) const RECORDS: &str = "records";
pub(crate) const SETS: &str = "sets";

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    Memory,
}

/// Open the configured backend. `data_dir` is only used by redb.
pub fn open(backend: Backend, data_dir: &Path) -> StoreResult<Arc<dyn DocumentStore>> {
    Ok(match backend {
        Backend::Redb => Arc::new(durable::DurableStore::open(data_dir)?),
        Backend::Memory => Arc::new(mem::MemStore::new()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    RecordIds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Sort {
    /// Parse `"<field>,<asc|desc>"`. Fields: `id`, `recordIds`.
    pub fn parse(s: &str) -> Option<Self> {
        let (field, order) = s.split_once(',')?;
        let field = match field.trim() {
            "id" => SortField::Id,
            "recordIds" | "recordIds.0" => SortField::RecordIds,
            _ => return None,
        };
        let order = match order.trim().to_ascii_lowercase().as_str() {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            _ => return None,
        };
        Some(Self { field, order })
    }
}

/// One page of a record listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    /// Defaults to primary key order.
    pub sort: Option<Sort>,
    /// Only records classified into this set.
    pub set: Option<String>,
}

/// Persistence for records and sets.
///
/// There are no transactions spanning the two collections.
pub trait DocumentStore: Send + Sync {
    /// Find the record carrying `record_id` among its record ids. If several
    /// do, the one with the lowest primary key wins.
    fn find_record(&self, record_id: &str) -> StoreResult<Option<Record>>;

    fn find_records(&self, page: &PageRequest) -> StoreResult<Vec<Record>>;

    fn count_records(&self, set: Option<&str>) -> StoreResult<usize>;

    /// Store a new record, assigning and returning its primary key.
    ///
    /// Fails with [`StoreError::Duplicate`] if a record with the same
    /// canonical identifier exists.
    fn insert_record(&self, record: &mut Record) -> StoreResult<DocumentId>;

    /// Replace a stored record's content. Fails with
    /// [`StoreError::Duplicate`] if the new canonical identifier belongs to
    /// another record.
    fn update_record(&self, record: &Record) -> StoreResult<()>;

    /// Remove a record. Returns whether it existed.
    fn delete_record(&self, id: DocumentId) -> StoreResult<bool>;

    fn find_set(&self, spec: &str) -> StoreResult<Option<Set>>;

    /// Fails with [`StoreError::Duplicate`] if a set with this spec exists.
    fn insert_set(&self, set: &Set) -> StoreResult<()>;

    /// Sets ordered by spec.
    fn find_sets(&self, offset: usize, limit: usize) -> StoreResult<Vec<Set>>;

    fn count_sets(&self) -> StoreResult<usize>;
}

/// Filter, sort and slice records already in primary key order. Only the
/// records on the page are cloned.
pub(crate) fn paginate<'a>(
    records: impl Iterator<Item = &'a Record>,
    page: &PageRequest,
) -> Vec<Record> {
    let mut records: Vec<&Record> = records
        .filter(|r| page.set.as_deref().is_none_or(|s| r.in_set(s)))
        .collect();
    if let Some(sort) = page.sort {
        match sort.field {
            SortField::Id => {}
            SortField::RecordIds => records.sort_by(|a, b| a.canonical_id().cmp(&b.canonical_id())),
        }
        if sort.order == SortOrder::Desc {
            records.reverse();
        }
    }
    records
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .cloned()
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use indexmap::IndexSet;
    use serde_json::json;

    pub(crate) fn record(ids: &[&str], sets: &[&str]) -> Record {
        Record::new(
            ids.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
            sets.iter().map(|s| s.to_string()).collect::<IndexSet<_>>(),
            format!("<r>{}</r>", ids.first().copied().unwrap_or_default()),
            &json!({"r": ids.first().copied().unwrap_or_default()}),
        )
    }

    /// Behaviour every backend must share.
    pub(crate) fn exercise_store(store: &dyn DocumentStore) {
        // Insert assigns increasing keys and indexes every record id.
        let mut a = record(&["obj-b", "alt-1"], &["arts:sculpture"]);
        let mut b = record(&["obj-a"], &["arts:painting"]);
        let id_a = store.insert_record(&mut a).unwrap();
        let id_b = store.insert_record(&mut b).unwrap();
        assert!(id_b > id_a);
        assert_eq!(a.id, Some(id_a));
        assert_eq!(store.find_record("alt-1").unwrap().unwrap().id, Some(id_a));
        assert!(store.find_record("missing").unwrap().is_none());

        // Canonical ids are unique.
        let mut dup = record(&["obj-a"], &[]);
        assert!(matches!(
            store.insert_record(&mut dup),
            Err(StoreError::Duplicate { .. })
        ));

        // Listing, filtering and sorting.
        assert_eq!(store.count_records(None).unwrap(), 2);
        assert_eq!(store.count_records(Some("arts:painting")).unwrap(), 1);
        let all = store
            .find_records(&PageRequest {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all[0].id, Some(id_a));
        let sorted = store
            .find_records(&PageRequest {
                limit: 10,
                sort: Sort::parse("recordIds,asc"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sorted[0].canonical_id(), Some("obj-a"));
        let page = store
            .find_records(&PageRequest {
                offset: 1,
                limit: 1,
                sort: Sort::parse("id,desc"),
                set: None,
            })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, Some(id_a));

        // Updates re-index and keep the key.
        let mut changed = store.find_record("obj-b").unwrap().unwrap();
        changed.record_ids = vec!["obj-b".into(), "alt-2".into()];
        changed.sets = IndexSet::from(["arts:painting".to_string()]);
        store.update_record(&changed).unwrap();
        assert!(store.find_record("alt-1").unwrap().is_none());
        assert_eq!(store.find_record("alt-2").unwrap().unwrap().id, Some(id_a));
        assert_eq!(store.count_records(Some("arts:painting")).unwrap(), 2);

        let mut clash = changed.clone();
        clash.record_ids = vec!["obj-a".into()];
        assert!(matches!(
            store.update_record(&clash),
            Err(StoreError::Duplicate { .. })
        ));

        // Delete.
        assert!(store.delete_record(id_b).unwrap());
        assert!(!store.delete_record(id_b).unwrap());
        assert!(store.find_record("obj-a").unwrap().is_none());
        assert_eq!(store.count_records(None).unwrap(), 1);

        // Sets.
        store.insert_set(&Set::new("arts:sculpture", "Sculpture")).unwrap();
        store.insert_set(&Set::new("arts:bust", "Bust")).unwrap();
        assert!(matches!(
            store.insert_set(&Set::new("arts:sculpture", "Other")),
            Err(StoreError::Duplicate { .. })
        ));
        assert_eq!(store.find_set("arts:sculpture").unwrap().unwrap().name, "Sculpture");
        assert_eq!(store.count_sets().unwrap(), 2);
        let sets = store.find_sets(0, 10).unwrap();
        assert_eq!(sets[0].spec, "arts:bust");
        assert_eq!(store.find_sets(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn sort_parses_field_and_direction() {
        assert_eq!(
            Sort::parse("recordIds,DESC"),
            Some(Sort {
                field: SortField::RecordIds,
                order: SortOrder::Desc
            })
        );
        assert_eq!(Sort::parse("id,asc").map(|s| s.field), Some(SortField::Id));
        assert!(Sort::parse("raw,asc").is_none());
        assert!(Sort::parse("id").is_none());
        assert!(Sort::parse("id,sideways").is_none());
    }

    #[test]
    fn paginate_filters_before_slicing() {
        let records = vec![
            record(&["a"], &["s:x"]),
            record(&["b"], &[]),
            record(&["c"], &["s:x"]),
        ];
        let page = paginate(
            records.iter(),
            &PageRequest {
                offset: 1,
                limit: 5,
                sort: None,
                set: Some("s:x".into()),
            },
        );
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].canonical_id(), Some("c"));
    }
}
