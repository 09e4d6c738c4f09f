//! Errors surfaced by catalog passes and queries.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::LoadError;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The module path does not exist. Nothing was read or written.
    #[error("module not found: {path}")]
    NotFound { path: PathBuf },

    /// The module could not be opened as metadata. Nothing was written.
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    /// A write inside a catalog pass failed; the pass was rolled back.
    #[error("catalog write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("schema migration to version {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another writer holds the catalog lock.
    #[error("catalog {path} is being written by another process")]
    Busy { path: PathBuf },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no cataloged module matches '{0}'")]
    UnknownModule(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
