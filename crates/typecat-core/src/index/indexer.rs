//! Incremental re-index controller.
//!
//! Hashes the module file on every call and compares it with the catalog. Unchanged modules
//! are skipped without loading; new or changed ones are loaded first (so parse errors never
//! reach the store) and then replaced wholesale inside one transaction.

use crate::config::CatalogConfig;
use crate::deps::DependencySet;
use crate::error::{CatalogError, Result};
use crate::index::extractor::{
    PassStats, TypeHook, extract, relink_base_types, relink_interfaces,
};
use crate::metadata::{ModuleView, ResolutionGap, load_bytes};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use strum::AsRefStr;

/// Options controlling a catalog pass.
#[derive(Debug, Default, Clone)]
pub struct CatalogOptions {
    /// Re-catalog even when the content hash matches.
    pub force: bool,
    /// Product group to attach the module to, created on first use.
    pub group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Created,
    Replaced,
    Unchanged,
}

/// Outcome of one `catalog_module` call.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub module: String,
    pub version: String,
    pub full_name: String,
    pub type_count: u32,
    pub status: PassStatus,
    pub stats: PassStats,
    pub resolution_gaps: Vec<ResolutionGap>,
}

impl fmt::Display for CatalogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} ({} types",
            self.module,
            self.version,
            self.status.as_ref(),
            self.type_count
        )?;
        if self.status != PassStatus::Unchanged {
            write!(
                f,
                ", {} members, {} unresolved references",
                self.stats.members,
                self.resolution_gaps.len()
            )?;
        }
        write!(f, ")")
    }
}

/// Catalog the module at `path`, skipping it when its bytes are already cataloged.
pub fn catalog_module(
    conn: &mut Connection,
    path: &Path,
    options: &CatalogOptions,
    config: &CatalogConfig,
) -> Result<CatalogSummary> {
    run_pass(conn, path, options, config, None)
}

/// Like [`catalog_module`], calling `hook` after each type is written. A hook error rolls
/// the pass back.
pub fn catalog_module_with_hook(
    conn: &mut Connection,
    path: &Path,
    options: &CatalogOptions,
    config: &CatalogConfig,
    hook: TypeHook<'_>,
) -> Result<CatalogSummary> {
    run_pass(conn, path, options, config, Some(hook))
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The key a module file is stored under: its canonical path when it resolves.
pub fn path_key(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

struct Existing {
    id: i64,
    content_hash: String,
    name: String,
    version: String,
    full_name: String,
    type_count: u32,
}

fn run_pass(
    conn: &mut Connection,
    path: &Path,
    options: &CatalogOptions,
    config: &CatalogConfig,
    hook: Option<TypeHook<'_>>,
) -> Result<CatalogSummary> {
    if !path.exists() {
        return Err(CatalogError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let hash = content_hash(&bytes);
    let file_path = path_key(path);

    let existing = conn
        .query_row(
            "SELECT id, content_hash, name, version, full_name, type_count
             FROM modules WHERE file_path = ?1",
            [&file_path],
            |row| {
                Ok(Existing {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    name: row.get(2)?,
                    version: row.get(3)?,
                    full_name: row.get(4)?,
                    type_count: row.get(5)?,
                })
            },
        )
        .optional()?;

    if let Some(existing) = existing
        && existing.content_hash == hash
        && !options.force
    {
        log::info!("{} unchanged, skipping", path.display());
        if let Some(group) = &options.group {
            attach_group(conn, existing.id, group).map_err(|source| CatalogError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        return Ok(CatalogSummary {
            module: existing.name,
            version: existing.version,
            full_name: existing.full_name,
            type_count: existing.type_count,
            status: PassStatus::Unchanged,
            stats: PassStats::default(),
            resolution_gaps: Vec::new(),
        });
    }

    let deps = DependencySet::for_module(path, config);
    let view = load_bytes(&bytes, &deps, &config.loader_options()).map_err(|source| {
        CatalogError::Load {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let write_error = |source| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    };
    let tx = conn.transaction().map_err(write_error)?;
    let (status, stats) = write_pass(&tx, &view, &file_path, &hash, options, hook)
        .map_err(write_error)?;
    tx.commit().map_err(write_error)?;

    let summary = CatalogSummary {
        module: view.identity.name.clone(),
        version: view.identity.version.to_string(),
        full_name: view.identity.display_name(),
        type_count: stats.types,
        status,
        stats,
        resolution_gaps: view.gaps,
    };
    log::info!("cataloged {}: {}", path.display(), summary.stats);
    Ok(summary)
}

/// Everything that touches the store for one pass. Runs on the pass transaction.
fn write_pass(
    conn: &Connection,
    view: &ModuleView,
    file_path: &str,
    hash: &str,
    options: &CatalogOptions,
    hook: Option<TypeHook<'_>>,
) -> SqlResult<(PassStatus, PassStats)> {
    let identity = &view.identity;
    let full_name = identity.display_name();
    let version = identity.version.to_string();

    // Any row sharing the file, the identity or (name, version) is superseded.
    let removed = conn.execute(
        "DELETE FROM modules
         WHERE file_path = ?1 OR full_name = ?2 OR (name = ?3 AND version = ?4)",
        params![file_path, full_name, identity.name, version],
    )?;
    let status = if removed > 0 {
        PassStatus::Replaced
    } else {
        PassStatus::Created
    };

    let product_id = match &options.group {
        Some(group) => Some(product_id(conn, group)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO modules (name, full_name, version, file_path, platform, runtime_version,
                              indexed_at, content_hash, product_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            identity.name,
            full_name,
            version,
            file_path,
            view.platform,
            view.runtime_version,
            Utc::now().to_rfc3339(),
            hash,
            product_id,
        ],
    )?;
    let module_id = conn.last_insert_rowid();

    let stats = extract(conn, module_id, view, hook)?;
    conn.execute(
        "UPDATE modules SET type_count = ?1 WHERE id = ?2",
        params![stats.types, module_id],
    )?;

    let relinked = relink_base_types(conn)?;
    if relinked > 0 {
        log::debug!("re-linked {relinked} base type references");
    }
    let edges = relink_interfaces(conn)?;
    if edges > 0 {
        log::debug!("re-linked {edges} interface edges");
    }
    Ok((status, stats))
}

/// Point an already cataloged module at a group without re-indexing it.
fn attach_group(conn: &mut Connection, module_id: i64, group: &str) -> SqlResult<()> {
    let tx = conn.transaction()?;
    let product = product_id(&tx, group)?;
    tx.execute(
        "UPDATE modules SET product_id = ?1 WHERE id = ?2",
        params![product, module_id],
    )?;
    tx.commit()?;
    log::debug!("attached module {module_id} to group {group}");
    Ok(())
}

/// Create-or-reuse a product group by name.
fn product_id(conn: &Connection, name: &str) -> SqlResult<i64> {
    conn.execute("INSERT OR IGNORE INTO products (name) VALUES (?1)", [name])?;
    conn.query_row("SELECT id FROM products WHERE name = ?1", [name], |row| {
        row.get(0)
    })
}

/// Delete a module, matched by file path, simple name or identity string.
/// Returns the number of module rows removed.
pub fn remove_module(conn: &Connection, name_or_path: &str) -> Result<usize> {
    let key = path_key(Path::new(name_or_path));
    let removed = conn.execute(
        "DELETE FROM modules WHERE file_path = ?1 OR file_path = ?2 OR name = ?1 OR full_name = ?1",
        params![name_or_path, key],
    )?;
    if removed == 0 {
        return Err(CatalogError::UnknownModule(name_or_path.to_string()));
    }
    log::info!("removed {removed} module(s) matching {name_or_path}");
    Ok(removed)
}
