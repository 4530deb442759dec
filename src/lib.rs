// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # datahub
//!
//! A metadata aggregation hub. XML records (LIDO or Dublin Core) are
//! accepted over a REST API, keyed by the identifiers they carry, sorted
//! into sets by a configurable rule table and kept in a document store.
//!
//! ## Architecture
//!
//! - **XML** (`xml`): document tree, a path-query language and the
//!   XML → JSON mapping of stored records
//! - **Classification** (`classify`): rule patterns compiled to namespaced
//!   queries, value extraction and spec normalization
//! - **Identifiers** (`datatype`): one extractor per record schema
//! - **Storage** (`store`): in-memory or redb-backed records and sets
//! - **Resolution** (`resolver`): create, create-or-replace and delete
//! - **HTTP** (`server`, feature `server`): axum routes over the resolver
//!
//! ## Library usage
//!
//! ```no_run
//! use datahub::config::HubConfig;
//!
//! let config = HubConfig::bundled().unwrap();
//! let resolver = config.resolver(None).unwrap();
//! let record = resolver
//!     .create(br#"<lido:lido xmlns:lido="http://www.lido-schema.org">
//!         <lido:lidoRecID>obj-1</lido:lidoRecID>
//!     </lido:lido>"#)
//!     .unwrap();
//! println!("{:?} in sets {:?}", record.canonical_id(), record.sets);
//! ```

pub mod classify;
pub mod config;
pub mod datatype;
pub mod error;
pub mod model;
pub mod paths;
pub mod resolver;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod xml;
