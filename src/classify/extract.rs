//! Set extraction: one compiled rule query against one record.

use indexmap::IndexSet;

use crate::error::{ClassifyError, StoreError};
use crate::model::Set;
use crate::store::DocumentStore;
use crate::xml::query::Query;
use crate::xml::{Namespaces, XmlDocument};

use super::normalize::normalize;

/// Matched values equal to this never produce a set.
pub const NOT_APPLICABLE: &str = "n/a";

/// Evaluate `query` for rule `rule_key`, adding `"<rule_key>:<normalized>"`
/// labels to `labels` and making sure a [`Set`] exists for each new label.
///
/// Returns whether any usable value matched. `false` (nothing matched, or
/// only `n/a` did) tells the caller to try the rule's next alternative.
pub fn extract(
    doc: &XmlDocument,
    namespaces: &Namespaces,
    query: &Query,
    rule_key: &str,
    store: &dyn DocumentStore,
    labels: &mut IndexSet<String>,
) -> Result<bool, ClassifyError> {
    let nodes = query
        .select(doc, namespaces)
        .map_err(|source| ClassifyError::Rule {
            rule: rule_key.to_string(),
            source,
        })?;

    let mut matched_any = false;
    for node in nodes {
        let value = node.string_value(doc);
        if value == NOT_APPLICABLE {
            continue;
        }
        matched_any = true;
        let spec = format!("{rule_key}:{}", normalize(&value));
        if labels.insert(spec.clone()) {
            ensure_set(store, &spec, &value)?;
        }
    }
    Ok(matched_any)
}

/// Create the set for `spec` unless it already exists. An existing set's
/// name is never overwritten.
fn ensure_set(store: &dyn DocumentStore, spec: &str, name: &str) -> Result<(), ClassifyError> {
    if store.find_set(spec)?.is_some() {
        return Ok(());
    }
    match store.insert_set(&Set::new(spec, name)) {
        Ok(()) => {
            tracing::debug!(spec, name, "created set");
            Ok(())
        }
        // Another request created it between our lookup and insert.
        Err(StoreError::Duplicate { .. }) => {
            tracing::debug!(spec, "set already created concurrently");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
