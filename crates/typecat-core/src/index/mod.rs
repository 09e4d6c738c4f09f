//! Catalog store: schema, extraction, re-index control and queries.
//!
//! Uses rusqlite (WAL mode) to keep one SQLite file per catalog. The extractor
//! writes a module's type graph inside the controller's transaction; the query
//! family only ever reads.

pub mod extractor;
pub mod indexer;
pub mod query;
pub mod schema;

pub use extractor::{MemberKind, MemberRecord, PassStats, TypeHook, TypeKind};
pub use indexer::{
    CatalogOptions, CatalogSummary, PassStatus, catalog_module, catalog_module_with_hook,
    content_hash, remove_module,
};
pub use query::{
    ChainLink, DocHit, EnumValueRow, MemberQuery, MemberRow, ModuleRow, NamespaceRow,
    ParameterRow, ProductRow, Query, TypeQuery, TypeRow,
};
pub use schema::{SCHEMA_VERSION, open_db, schema_version};
