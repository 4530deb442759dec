//! Record resolution: create, create-or-replace, delete.
//!
//! [`RecordResolver`] ties decoding, identifier extraction, classification
//! and storage together. Per request:
//!
//! - **create**: the body's canonical identifier must be unused; the record
//!   is classified and inserted.
//! - **put**: the identifier in the request target decides; an absent record
//!   is created, a present one has its content replaced under the same key.
//! - **delete**: removes the record found under the target identifier.
//!
//! The pre-insert lookup only produces the friendly conflict error. The
//! store's unique index on the canonical identifier is the authority; a
//! racing insert that loses surfaces as the same conflict.
//!
//! Sets created during classification are written immediately and are not
//! rolled back if the record write then fails.

use std::sync::Arc;

use crate::classify::SetClassifier;
use crate::datatype::IdentifierExtractor;
use crate::error::{ResolveError, StoreError};
use crate::model::Record;
use crate::store::{DocumentStore, PageRequest};
use crate::xml::decode::{Decoded, decode};

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// How a put was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Created(Record),
    Replaced(Record),
}

impl PutOutcome {
    pub fn record(&self) -> &Record {
        match self {
            PutOutcome::Created(r) | PutOutcome::Replaced(r) => r,
        }
    }
}

/// Resolves record requests against the store.
#[derive(Clone)]
pub struct RecordResolver {
    store: Arc<dyn DocumentStore>,
    classifier: Arc<SetClassifier>,
    extractor: Arc<dyn IdentifierExtractor>,
}

impl RecordResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        classifier: Arc<SetClassifier>,
        extractor: Arc<dyn IdentifierExtractor>,
    ) -> Self {
        Self {
            store,
            classifier,
            extractor,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn classifier(&self) -> &SetClassifier {
        &self.classifier
    }

    /// Look up a record by any of its identifiers.
    pub fn get(&self, record_id: &str) -> ResolveResult<Record> {
        self.store
            .find_record(record_id)?
            .ok_or_else(|| ResolveError::NotFound {
                record_id: record_id.to_string(),
            })
    }

    /// One page of records and the total matching the page's set filter.
    pub fn list(&self, page: &PageRequest) -> ResolveResult<(Vec<Record>, usize)> {
        let records = self.store.find_records(page)?;
        let total = self.store.count_records(page.set.as_deref())?;
        Ok((records, total))
    }

    /// Create a record from a request body. Fails with
    /// [`ResolveError::IdentifierConflict`] if its canonical identifier is
    /// already in use.
    pub fn create(&self, body: &[u8]) -> ResolveResult<Record> {
        let decoded = decode(body)?;
        let (record_ids, object_ids) = self.identifiers(&decoded)?;
        let canonical = record_ids[0].clone();

        if self.store.find_record(&canonical)?.is_some() {
            return Err(ResolveError::IdentifierConflict {
                record_id: canonical,
            });
        }

        let record = self.build(decoded, record_ids, object_ids)?;
        let record = self.insert(record)?;
        tracing::info!(
            record_id = %canonical,
            key = ?record.id,
            sets = record.sets.len(),
            "created record"
        );
        Ok(record)
    }

    /// Create or replace the record addressed by `target`.
    ///
    /// The target identifier governs the lookup, not the identifiers in the
    /// body. A replaced record keeps its primary key.
    pub fn put(&self, target: &str, body: &[u8]) -> ResolveResult<PutOutcome> {
        let decoded = decode(body)?;
        let (record_ids, object_ids) = self.identifiers(&decoded)?;
        let existing = self.store.find_record(target)?;
        let fresh = self.build(decoded, record_ids, object_ids)?;

        match existing {
            None => {
                let record = self.insert(fresh)?;
                tracing::info!(
                    record_id = target,
                    key = ?record.id,
                    sets = record.sets.len(),
                    "created record"
                );
                Ok(PutOutcome::Created(record))
            }
            Some(mut stored) => {
                stored.replace_content(fresh);
                self.store
                    .update_record(&stored)
                    .map_err(|e| conflict_or_storage(e, &stored))?;
                tracing::info!(
                    record_id = target,
                    key = ?stored.id,
                    sets = stored.sets.len(),
                    "replaced record"
                );
                Ok(PutOutcome::Replaced(stored))
            }
        }
    }

    /// Delete the record addressed by `target`.
    ///
    /// A record that vanishes between lookup and removal (a concurrent
    /// delete) counts as deleted.
    pub fn delete(&self, target: &str) -> ResolveResult<()> {
        let record = self.get(target)?;
        let key = record.id.ok_or_else(|| ResolveError::StorageWriteFailure {
            message: "stored record has no primary key".into(),
        })?;
        if self.store.delete_record(key)? {
            tracing::info!(record_id = target, key = %key, "deleted record");
        } else {
            tracing::warn!(record_id = target, key = %key, "record removed concurrently");
        }
        Ok(())
    }

    fn identifiers(&self, decoded: &Decoded) -> ResolveResult<(Vec<String>, Vec<String>)> {
        let record_ids = self.extractor.record_ids(&decoded.json)?;
        if record_ids.is_empty() {
            return Err(ResolveError::MalformedInput {
                message: "record carries no identifier".into(),
            });
        }
        let object_ids = self.extractor.object_ids(&decoded.json)?;
        Ok((record_ids, object_ids))
    }

    fn build(
        &self,
        decoded: Decoded,
        record_ids: Vec<String>,
        object_ids: Vec<String>,
    ) -> ResolveResult<Record> {
        let sets = self
            .classifier
            .classify_document(&decoded.document, self.store.as_ref())?;
        Ok(Record::new(
            record_ids,
            object_ids,
            sets,
            decoded.raw,
            &decoded.json,
        ))
    }

    fn insert(&self, mut record: Record) -> ResolveResult<Record> {
        self.store
            .insert_record(&mut record)
            .map_err(|e| conflict_or_storage(e, &record))?;
        if record.id.is_none() {
            return Err(ResolveError::StorageWriteFailure {
                message: "the store assigned no primary key".into(),
            });
        }
        Ok(record)
    }
}

/// A unique-index violation is an identifier conflict; anything else is a
/// storage failure.
fn conflict_or_storage(err: StoreError, record: &Record) -> ResolveError {
    match err {
        StoreError::Duplicate { .. } => ResolveError::IdentifierConflict {
            record_id: record.canonical_id().unwrap_or_default().to_string(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RuleTable;
    use crate::datatype::Lido;
    use crate::store::mem::MemStore;

    const LIDO_NS: &str = "http://www.lido-schema.org";

    fn body(id: &str, work_type: &str) -> Vec<u8> {
        format!(
            r#"<lido:lido xmlns:lido="{LIDO_NS}">
  <lido:lidoRecID lido:pref="preferred">{id}</lido:lidoRecID>
  <lido:objectWorkType><lido:term>{work_type}</lido:term></lido:objectWorkType>
</lido:lido>"#
        )
        .into_bytes()
    }

    fn resolver() -> RecordResolver {
        let table: RuleTable = toml::from_str(r#"object_name = "objectWorkType/term""#).unwrap();
        RecordResolver::new(
            Arc::new(MemStore::new()),
            Arc::new(SetClassifier::new(&table, "lido", LIDO_NS, None).unwrap()),
            Arc::new(Lido),
        )
    }

    #[test]
    fn create_then_conflict() {
        let r = resolver();
        let created = r.create(&body("obj-1", "Sculpture")).unwrap();
        assert_eq!(created.canonical_id(), Some("obj-1"));
        assert!(created.sets.contains("object_name:sculpture"));

        let err = r.create(&body("obj-1", "Painting")).unwrap_err();
        assert!(matches!(err, ResolveError::IdentifierConflict { ref record_id } if record_id == "obj-1"));
        // The conflicting body was never classified.
        assert!(r.store().find_set("object_name:painting").unwrap().is_none());
    }

    #[test]
    fn put_creates_then_replaces_in_place() {
        let r = resolver();
        let created = match r.put("obj-2", &body("obj-2", "Sculpture")).unwrap() {
            PutOutcome::Created(rec) => rec,
            other => panic!("expected creation, got {other:?}"),
        };

        let replaced = match r.put("obj-2", &body("obj-2", "Painting")).unwrap() {
            PutOutcome::Replaced(rec) => rec,
            other => panic!("expected replacement, got {other:?}"),
        };
        assert_eq!(replaced.id, created.id);
        assert_eq!(
            replaced.sets.iter().collect::<Vec<_>>(),
            vec!["object_name:painting"]
        );

        let stored = r.get("obj-2").unwrap();
        assert!(stored.raw.contains("Painting"));
        assert_eq!(stored.json_value().unwrap()["lido"]["objectWorkType"]["term"], "Painting");
        assert_eq!(r.store().count_records(None).unwrap(), 1);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let r = resolver();
        r.create(&body("obj-3", "Bust")).unwrap();
        r.delete("obj-3").unwrap();
        assert!(matches!(r.get("obj-3"), Err(ResolveError::NotFound { .. })));
        assert!(matches!(r.delete("obj-3"), Err(ResolveError::NotFound { .. })));
        // Sets outlive their records.
        assert!(r.store().find_set("object_name:bust").unwrap().is_some());
    }

    #[test]
    fn bad_bodies_are_rejected_before_any_write() {
        let r = resolver();
        assert!(matches!(r.create(b""), Err(ResolveError::MissingBody)));
        assert!(matches!(
            r.create(b"<lido:lido"),
            Err(ResolveError::MalformedInput { .. })
        ));
        assert!(matches!(
            r.create(b"<lido><title>x</title></lido>"),
            Err(ResolveError::MalformedInput { .. })
        ));
        assert_eq!(r.store().count_records(None).unwrap(), 0);
        assert_eq!(r.store().count_sets().unwrap(), 0);
    }

    #[test]
    fn shared_labels_share_one_set() {
        let r = resolver();
        r.create(&body("obj-4", "Sculpture")).unwrap();
        r.create(&body("obj-5", "sculpture")).unwrap();
        assert_eq!(r.store().count_sets().unwrap(), 1);
        let (records, total) = r
            .list(&PageRequest {
                limit: 10,
                set: Some("object_name:sculpture".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn put_under_a_new_target_cannot_take_a_stored_identifier() {
        let r = resolver();
        r.create(&body("obj-1", "Sculpture")).unwrap();

        // The lookup by target finds nothing, so the store's unique index
        // rejects the insert.
        let err = r.put("absent-target", &body("obj-1", "Painting")).unwrap_err();
        assert!(matches!(err, ResolveError::IdentifierConflict { ref record_id } if record_id == "obj-1"));
        assert_eq!(r.store().count_records(None).unwrap(), 1);
        assert!(r.get("obj-1").unwrap().raw.contains("Sculpture"));
    }

    #[test]
    fn replacement_cannot_take_another_records_identifier() {
        let r = resolver();
        r.create(&body("obj-1", "Sculpture")).unwrap();
        let second = r.create(&body("obj-2", "Bust")).unwrap();

        let err = r.put("obj-2", &body("obj-1", "Painting")).unwrap_err();
        assert!(matches!(err, ResolveError::IdentifierConflict { ref record_id } if record_id == "obj-1"));
        assert_eq!(r.store().count_records(None).unwrap(), 2);
        // Neither record changed.
        assert_eq!(r.get("obj-2").unwrap(), second);
        assert!(r.get("obj-1").unwrap().raw.contains("Sculpture"));
    }
}
