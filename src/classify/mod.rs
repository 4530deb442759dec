//! Record classification into sets.
//!
//! The rule table maps a rule key to one pattern or to an ordered list of
//! alternative patterns. [`SetClassifier`] compiles every pattern once at
//! startup and then, per record:
//!
//! 1. parses the record once,
//! 2. walks the rules in table order,
//! 3. for a list of alternatives, stops at the first one that matched a
//!    usable value, so a rule contributes labels from exactly one pattern.
//!
//! Labels have the form `"<rule key>:<normalized value>"`; the set store is
//! updated as a side effect (see [`extract::extract`]).

pub mod compile;
pub mod extract;
pub mod normalize;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifyError, ConfigError};
use crate::store::DocumentStore;
use crate::xml::decode::sanitize;
use crate::xml::query::Query;
use crate::xml::{Namespaces, XmlDocument};

pub use compile::compile;
pub use normalize::normalize;

/// Patterns for one rule: a single pattern or prioritized alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulePatterns {
    Single(String),
    Alternatives(Vec<String>),
}

impl RulePatterns {
    pub fn patterns(&self) -> &[String] {
        match self {
            RulePatterns::Single(p) => std::slice::from_ref(p),
            RulePatterns::Alternatives(ps) => ps,
        }
    }
}

/// Ordered rule key → patterns mapping.
pub type RuleTable = IndexMap<String, RulePatterns>;

#[derive(Debug, Clone)]
struct CompiledRule {
    key: String,
    alternatives: Vec<Query>,
}

/// Immutable, pre-compiled rule table. Shared across requests behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SetClassifier {
    namespaces: Namespaces,
    rules: Vec<CompiledRule>,
}

impl SetClassifier {
    /// Compile every pattern of `table`.
    ///
    /// `namespace` is the prefix rule names are qualified with and
    /// `namespace_uri` the namespace it is bound to. Patterns that do not
    /// compile to a valid query (including a `{language}` placeholder with no
    /// `language` configured) are rejected here rather than per record.
    pub fn new(
        table: &RuleTable,
        namespace: &str,
        namespace_uri: &str,
        language: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(table.len());
        for (key, patterns) in table {
            if patterns.patterns().is_empty() {
                return Err(ConfigError::InvalidRule {
                    rule: key.clone(),
                    message: "alternative list is empty".into(),
                });
            }
            let mut alternatives = Vec::new();
            for pattern in patterns.patterns() {
                let compiled = compile(pattern, namespace, language);
                if compiled.contains(compile::LANGUAGE_PLACEHOLDER) {
                    return Err(ConfigError::InvalidRule {
                        rule: key.clone(),
                        message: format!(
                            "pattern \"{pattern}\" uses {{language}} but no classification language is configured"
                        ),
                    });
                }
                let query = Query::parse(&compiled).map_err(|e| ConfigError::InvalidRule {
                    rule: key.clone(),
                    message: e.to_string(),
                })?;
                alternatives.push(query);
            }
            rules.push(CompiledRule {
                key: key.clone(),
                alternatives,
            });
        }

        let mut namespaces = Namespaces::new();
        namespaces.bind(namespace, namespace_uri);
        Ok(Self { namespaces, rules })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Compiled queries per rule, in table order.
    pub fn rules(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.rules
            .iter()
            .map(|r| (r.key.as_str(), r.alternatives.iter().map(Query::as_str).collect()))
    }

    /// Classify a raw XML record.
    pub fn classify(
        &self,
        raw: &str,
        store: &dyn DocumentStore,
    ) -> Result<IndexSet<String>, ClassifyError> {
        let doc = XmlDocument::parse(&sanitize(raw))?;
        self.classify_document(&doc, store)
    }

    /// Classify an already parsed record.
    pub fn classify_document(
        &self,
        doc: &XmlDocument,
        store: &dyn DocumentStore,
    ) -> Result<IndexSet<String>, ClassifyError> {
        let namespaces = self.namespaces.for_document(doc);
        let mut labels = IndexSet::new();
        for rule in &self.rules {
            for (i, query) in rule.alternatives.iter().enumerate() {
                if extract::extract(doc, &namespaces, query, &rule.key, store, &mut labels)? {
                    tracing::debug!(rule = %rule.key, alternative = i, "rule matched");
                    break;
                }
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    const LIDO_NS: &str = "http://www.lido-schema.org";

    fn record(work_types: &str) -> String {
        format!(
            r#"<lido:lido xmlns:lido="{LIDO_NS}">
  <lido:lidoRecID>obj-1</lido:lidoRecID>
  <lido:descriptiveMetadata>
    <lido:objectWorkType>{work_types}</lido:objectWorkType>
    <lido:classification><lido:term>Fine Art -- Dutch</lido:term></lido:classification>
  </lido:descriptiveMetadata>
</lido:lido>"#
        )
    }

    fn table(toml_src: &str) -> RuleTable {
        toml::from_str(toml_src).unwrap()
    }

    fn classifier(toml_src: &str) -> SetClassifier {
        SetClassifier::new(&table(toml_src), "lido", LIDO_NS, None).unwrap()
    }

    #[test]
    fn single_patterns_always_contribute() {
        let c = classifier(
            r#"
classification = "descriptiveMetadata/classification/term"
object_name = "objectWorkType/term"
"#,
        );
        let store = MemStore::new();
        let labels = c
            .classify(&record("<lido:term>Painting</lido:term>"), &store)
            .unwrap();
        assert_eq!(
            labels.into_iter().collect::<Vec<_>>(),
            vec!["classification:fine_art_dutch", "object_name:painting"]
        );
        assert_eq!(store.count_sets().unwrap(), 2);
    }

    #[test]
    fn first_matching_alternative_wins() {
        let c = classifier(
            r#"
object_name = [
  "objectWorkType/term[@pref='preferred']",
  "objectWorkType/term",
]
"#,
        );
        let store = MemStore::new();
        // Both alternatives find nodes, but the first only finds "n/a".
        let labels = c
            .classify(
                &record(
                    r#"<lido:term lido:pref="preferred">n/a</lido:term><lido:term>Statue</lido:term>"#,
                ),
                &store,
            )
            .unwrap();
        assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec!["object_name:statue"]);

        let labels = c
            .classify(
                &record(
                    r#"<lido:term lido:pref="preferred">Bust</lido:term><lido:term>Statue</lido:term>"#,
                ),
                &store,
            )
            .unwrap();
        assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec!["object_name:bust"]);
        assert!(store.find_set("object_name:statue").unwrap().is_some());
        assert!(store.find_set("object_name:bust").unwrap().is_some());
    }

    #[test]
    fn unmatched_rules_contribute_nothing() {
        let c = classifier(r#"creator = "eventActor/name""#);
        let labels = c.classify(&record(""), &MemStore::new()).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn language_placeholder_requires_a_language() {
        let t = table(r#"object_name = "term[@xml:lang='{language}']""#);
        assert!(matches!(
            SetClassifier::new(&t, "lido", LIDO_NS, None),
            Err(ConfigError::InvalidRule { .. })
        ));
        let c = SetClassifier::new(&t, "lido", LIDO_NS, Some("en")).unwrap();
        assert_eq!(
            c.rules().next().unwrap().1,
            vec!["descendant::lido:term[@xml:lang='en']"]
        );
    }

    #[test]
    fn invalid_rules_are_rejected_at_build() {
        for src in [r#"a = []"#, r#"a = "/absolute/path""#, r#"a = "term[""#] {
            assert!(
                SetClassifier::new(&table(src), "lido", LIDO_NS, None).is_err(),
                "{src}"
            );
        }
    }

    #[test]
    fn malformed_xml_fails_the_whole_run() {
        let c = classifier(r#"a = "term""#);
        assert!(matches!(
            c.classify("<lido:lido>", &MemStore::new()),
            Err(ClassifyError::Xml(_))
        ));
    }

    #[test]
    fn rule_table_keeps_file_order() {
        let t = table("z = \"a\"\na = \"b\"\nm = [\"c\", \"d\"]\n");
        let keys: Vec<_> = t.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(t["m"].patterns().len(), 2);
    }
}
