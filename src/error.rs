//! Rich diagnostic error types for the datahub.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so operators know exactly what went wrong
//! with a record, a rule or the store.

use miette::Diagnostic;
use thiserror::Error;

pub use crate::paths::PathError;

/// Top-level error type for the datahub.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the CLI.
#[derive(Debug, Error, Diagnostic)]
pub enum HubError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),
}

/// Convenience alias used by the CLI and library entry points.
pub type HubResult<T> = std::result::Result<T, HubError>;

// ---------------------------------------------------------------------------
// XML errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum XmlError {
    #[error("malformed XML at byte {position}: {message}")]
    #[diagnostic(
        code(datahub::xml::malformed),
        help("The document is not well-formed XML. Validate it against its schema before submitting.")
    )]
    Malformed { position: u64, message: String },

    #[error("document has no root element")]
    #[diagnostic(
        code(datahub::xml::no_root),
        help("Submit a complete XML document with a single root element.")
    )]
    NoRoot,

    #[error("element <{name}> is never closed")]
    #[diagnostic(
        code(datahub::xml::unclosed),
        help("The document ended before all elements were closed; it may have been truncated.")
    )]
    Unclosed { name: String },
}

// ---------------------------------------------------------------------------
// Structural query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum QueryError {
    #[error("invalid query \"{query}\" at offset {offset}: {message}")]
    #[diagnostic(
        code(datahub::query::syntax),
        help(
            "Check the rule pattern in the [sets] table. Patterns are relative location \
             paths such as `descriptiveMetadata/objectClassificationWrap/.../term[@pref=\"preferred\"]`. \
             A leftover `{{language}}` placeholder means no language is configured."
        )
    )]
    Syntax {
        query: String,
        offset: usize,
        message: String,
    },

    #[error("query prefix \"{prefix}\" is not bound to a namespace")]
    #[diagnostic(
        code(datahub::query::unbound_prefix),
        help(
            "Bind the prefix through [classification] namespace/namespace_uri, \
             or declare it on the document's root element."
        )
    )]
    UnboundPrefix { prefix: String },

    #[error("unknown function {name}()")]
    #[diagnostic(
        code(datahub::query::unknown_function),
        help("Supported functions: not, contains, starts-with, normalize-space, string, count, position, last, text, node.")
    )]
    UnknownFunction { name: String },

    #[error("{name}() expects {} argument(s), got {actual}", arity_range(.min, .max))]
    #[diagnostic(code(datahub::query::arity))]
    Arity {
        name: String,
        min: usize,
        max: usize,
        actual: usize,
    },
}

fn arity_range(min: &usize, max: &usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{min}..={max}")
    }
}

// ---------------------------------------------------------------------------
// Body decoding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("no record was provided")]
    #[diagnostic(
        code(datahub::decode::empty),
        help("Send the record's XML as the request body.")
    )]
    Empty,

    #[error("request body is not valid UTF-8")]
    #[diagnostic(
        code(datahub::decode::encoding),
        help("Records must be submitted as UTF-8 encoded XML.")
    )]
    Encoding,

    #[error("invalid XML: {0}")]
    #[diagnostic(code(datahub::decode::xml))]
    Xml(#[from] XmlError),
}

// ---------------------------------------------------------------------------
// Identifier extraction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IdentifierError {
    #[error("not a {data_type} record: expected a <{expected}> element")]
    #[diagnostic(
        code(datahub::identifier::wrong_schema),
        help("The configured data type does not match the submitted document. Check [records] data_type.")
    )]
    WrongSchema {
        data_type: &'static str,
        expected: &'static str,
    },

    #[error("{data_type} record carries no record identifier")]
    #[diagnostic(
        code(datahub::identifier::missing),
        help("Every record needs at least one non-empty record identifier (e.g. lido:lidoRecID).")
    )]
    MissingRecordId { data_type: &'static str },

    #[error("unknown data type \"{name}\"")]
    #[diagnostic(
        code(datahub::identifier::unknown_data_type),
        help("Supported data types: lido, oai_dc.")
    )]
    UnknownDataType { name: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(datahub::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(datahub::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             If the problem persists, restore the data directory from a backup."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(datahub::store::serde),
        help("A stored document could not be encoded or decoded.")
    )]
    Serialization { message: String },

    #[error("duplicate key in {collection}: {key}")]
    #[diagnostic(
        code(datahub::store::duplicate),
        help("A document with this unique key already exists.")
    )]
    Duplicate {
        collection: &'static str,
        key: String,
    },

    #[error("document has no primary key")]
    #[diagnostic(
        code(datahub::store::no_key),
        help("Only documents returned by the store can be updated or deleted.")
    )]
    MissingKey,

    #[error("record has no identifier")]
    #[diagnostic(
        code(datahub::store::no_identifier),
        help("Records are indexed by their first record identifier; it must be present.")
    )]
    MissingIdentifier,

    #[error("store lock poisoned")]
    #[diagnostic(
        code(datahub::store::poisoned),
        help("A thread panicked while writing to the in-memory store. Restart the process.")
    )]
    Poisoned,

    #[error("no {collection} document with key {key}")]
    #[diagnostic(
        code(datahub::store::not_found),
        help("The document was removed, possibly by a concurrent request.")
    )]
    NotFound {
        collection: &'static str,
        key: String,
    },
}

// ---------------------------------------------------------------------------
// Classification errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ClassifyError {
    #[error("cannot classify record: {0}")]
    #[diagnostic(code(datahub::classify::xml))]
    Xml(#[from] XmlError),

    #[error("rule \"{rule}\": {source}")]
    #[diagnostic(
        code(datahub::classify::rule),
        help("The rule's pattern compiled to a query that cannot be evaluated. Fix it in the [sets] table.")
    )]
    Rule {
        rule: String,
        #[source]
        source: QueryError,
    },

    #[error("cannot persist set: {0}")]
    #[diagnostic(code(datahub::classify::store))]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Record resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("malformed input: {message}")]
    #[diagnostic(
        code(datahub::resolve::malformed_input),
        help("The record body is missing, is not well-formed XML, or carries no identifier.")
    )]
    MalformedInput { message: String },

    #[error("no record was provided")]
    #[diagnostic(
        code(datahub::resolve::missing_body),
        help("Send the record's XML as the request body.")
    )]
    MissingBody,

    #[error("record with id \"{record_id}\" already exists")]
    #[diagnostic(
        code(datahub::resolve::conflict),
        help("Use PUT /data/{record_id} to replace an existing record.")
    )]
    IdentifierConflict { record_id: String },

    #[error("could not store record: {message}")]
    #[diagnostic(
        code(datahub::resolve::storage),
        help("Set documents written before the failure are kept; retrying the request is safe.")
    )]
    StorageWriteFailure { message: String },

    #[error("record \"{record_id}\" not found")]
    #[diagnostic(code(datahub::resolve::not_found))]
    NotFound { record_id: String },

    #[error("classification rule failed: {message}")]
    #[diagnostic(
        code(datahub::resolve::configuration),
        help("A rule in the [sets] table cannot be evaluated. This is a configuration error.")
    )]
    Configuration { message: String },
}

impl From<DecodeError> for ResolveError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Empty => ResolveError::MissingBody,
            other => ResolveError::MalformedInput {
                message: other.to_string(),
            },
        }
    }
}

impl From<IdentifierError> for ResolveError {
    fn from(err: IdentifierError) -> Self {
        ResolveError::MalformedInput {
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for ResolveError {
    fn from(err: StoreError) -> Self {
        ResolveError::StorageWriteFailure {
            message: err.to_string(),
        }
    }
}

impl From<ClassifyError> for ResolveError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::Xml(e) => ResolveError::MalformedInput {
                message: format!("invalid XML: {e}"),
            },
            ClassifyError::Rule { .. } => ResolveError::Configuration {
                message: err.to_string(),
            },
            ClassifyError::Store(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(datahub::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(datahub::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid rule \"{rule}\": {message}")]
    #[diagnostic(
        code(datahub::config::rule),
        help("Each entry in [sets] is either a pattern string or a non-empty list of pattern strings.")
    )]
    InvalidRule { rule: String, message: String },

    #[error("invalid setting {key}: {message}")]
    #[diagnostic(code(datahub::config::invalid))]
    Invalid { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_map_to_resolve_taxonomy() {
        assert!(matches!(
            ResolveError::from(DecodeError::Empty),
            ResolveError::MissingBody
        ));
        let err = ResolveError::from(DecodeError::Xml(XmlError::NoRoot));
        assert!(matches!(err, ResolveError::MalformedInput { .. }));
    }

    #[test]
    fn classify_errors_map_to_resolve_taxonomy() {
        let err = ResolveError::from(ClassifyError::Xml(XmlError::NoRoot));
        assert!(matches!(err, ResolveError::MalformedInput { .. }));

        let err = ResolveError::from(ClassifyError::Rule {
            rule: "creator".into(),
            source: QueryError::UnboundPrefix {
                prefix: "foo".into(),
            },
        });
        assert!(matches!(err, ResolveError::Configuration { .. }));

        let err = ResolveError::from(ClassifyError::Store(StoreError::MissingKey));
        assert!(matches!(err, ResolveError::StorageWriteFailure { .. }));
    }

    #[test]
    fn conflict_message_names_the_identifier() {
        let err = ResolveError::IdentifierConflict {
            record_id: "obj-1".into(),
        };
        assert_eq!(err.to_string(), "record with id \"obj-1\" already exists");
    }
}
