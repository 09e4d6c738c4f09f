//! typecat-core: reflection-only cataloging of CLI assembly metadata
//!
//! Reads managed modules (`.dll`, `.exe`, `.winmd`) straight from their bytes,
//! never loading or executing them, and records their public type surface in
//! a SQLite catalog that can be queried afterwards.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use typecat_core::{Catalog, CatalogOptions, TypeQuery};
//!
//! fn main() -> Result<(), typecat_core::CatalogError> {
//!     let mut catalog = Catalog::open_default()?;
//!     let summary = catalog.catalog(Path::new("lib/Newtonsoft.Json.dll"), &CatalogOptions::default())?;
//!     println!("{summary}");
//!
//!     let types = catalog.query().search_types(&TypeQuery {
//!         pattern: Some("JsonConvert".into()),
//!         ..Default::default()
//!     })?;
//!     for row in types {
//!         println!("{row}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For lower-level access, use the individual modules directly.

mod catalog;
pub mod config;
pub mod deps;
pub mod error;
pub mod index;
pub mod metadata;

#[cfg(any(test, feature = "fixtures"))]
pub mod test_support;

pub use catalog::Catalog;
pub use config::{CatalogConfig, ConfigDefaults, typecat_home};
pub use error::CatalogError;
pub use index::{
    CatalogOptions, CatalogSummary, MemberKind, MemberQuery, PassStatus, Query, TypeKind,
    TypeQuery,
};
pub use metadata::{LoadError, ModuleView, ResolutionGap};
