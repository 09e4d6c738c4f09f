//! Reflection-only reading of CLI module metadata.
//!
//! The loader decodes the PE container, the metadata root and the `#~` tables
//! straight from the file bytes and produces an owned [`ModuleView`]. Type
//! references that leave the module are checked against a
//! [`DependencySet`](crate::deps::DependencySet); misses become
//! [`ResolutionGap`]s rather than errors unless strict mode is on.

mod heaps;
mod loader;
mod model;
mod pe;
mod reader;
mod signature;
pub(crate) mod tables;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use loader::{load_bytes, load_module};
pub use model::{
    AccessorInfo, AssemblyIdentity, EventDefinition, FieldDefinition, GapReason,
    MethodDefinition, ModuleView, ParameterDefinition, PassMode, PropertyDefinition,
    ResolutionGap, TypeDefinition, TypeReference, Version, Visibility,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    /// Fail the load when an assembly reference has no candidate file.
    pub strict_dependencies: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unexpected end of data at offset {offset:#x}")]
    UnexpectedEof { offset: usize },

    #[error("missing MZ header")]
    InvalidDosHeader,

    #[error("missing PE signature")]
    InvalidPeSignature,

    #[error("unsupported optional header magic {0:#06x}")]
    UnsupportedOptionalHeader(u16),

    #[error("image has no CLI header (not a managed module)")]
    NotManaged,

    #[error("RVA {0:#x} is outside every section")]
    RvaOutOfRange(u32),

    #[error("bad metadata signature {0:#010x}")]
    InvalidMetadataSignature(u32),

    #[error("metadata stream {0} not found")]
    MissingStream(&'static str),

    #[error("unsupported metadata table {0:#04x}")]
    UnsupportedTable(u8),

    #[error("invalid {table} index {index}")]
    InvalidIndex { table: &'static str, index: u32 },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid UTF-8 in metadata: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("referenced assembly cannot be resolved: {0}")]
    UnresolvedDependency(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
