//! Read side of the catalog.
//!
//! Every query is read-only and returns rows in a deterministic order, so two
//! stores built from the same modules answer identically.

use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, Row, params};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::index::extractor::{MemberKind, TypeKind};
use crate::index::schema::schema_version;

const DEFAULT_LIMIT: u32 = 50;

const TYPE_COLUMNS: &str = "v.id, v.name, v.full_name, v.kind, v.namespace, v.module,
    v.module_version, v.product, v.is_abstract, v.is_sealed, v.is_static, v.is_generic,
    v.generic_params, v.base_type_name";

const MEMBER_COLUMNS: &str = "vm.id, vm.name, vm.kind, vm.return_type, vm.visibility,
    vm.is_static, vm.is_virtual, vm.is_abstract, vm.is_override, vm.type_full_name, vm.module";

/// A cataloged type.
#[derive(Debug, Clone, Serialize)]
pub struct TypeRow {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub kind: String,
    pub namespace: String,
    pub module: String,
    pub module_version: String,
    pub product: Option<String>,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_static: bool,
    pub is_generic: bool,
    pub generic_params: String,
    pub base_type_name: Option<String>,
}

impl TypeRow {
    fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            full_name: row.get(2)?,
            kind: row.get(3)?,
            namespace: row.get(4)?,
            module: row.get(5)?,
            module_version: row.get(6)?,
            product: row.get(7)?,
            is_abstract: row.get(8)?,
            is_sealed: row.get(9)?,
            is_static: row.get(10)?,
            is_generic: row.get(11)?,
            generic_params: row.get(12)?,
            base_type_name: row.get(13)?,
        })
    }
}

impl fmt::Display for TypeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modifier = if self.is_static {
            "static "
        } else if self.is_abstract && self.kind != TypeKind::Interface.as_ref() {
            "abstract "
        } else if self.is_sealed && self.kind == TypeKind::Class.as_ref() {
            "sealed "
        } else {
            ""
        };
        write!(
            f,
            "{modifier}{} {}",
            self.kind.to_lowercase(),
            self.full_name
        )?;
        if self.is_generic {
            write!(f, "<{}>", self.generic_params)?;
        }
        if let Some(base) = &self.base_type_name {
            write!(f, " : {base}")?;
        }
        write!(f, " [{} {}]", self.module, self.module_version)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceRow {
    pub name: String,
    pub module: String,
    pub type_count: u32,
}

impl fmt::Display for NamespaceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            "<global>"
        } else {
            &self.name
        };
        write!(f, "{name} [{}] ({} types)", self.module, self.type_count)
    }
}

/// A member with its declaring type.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub return_type: Option<String>,
    pub visibility: String,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_override: bool,
    pub type_full_name: String,
    pub module: String,
}

impl MemberRow {
    fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            return_type: row.get(3)?,
            visibility: row.get(4)?,
            is_static: row.get(5)?,
            is_virtual: row.get(6)?,
            is_abstract: row.get(7)?,
            is_override: row.get(8)?,
            type_full_name: row.get(9)?,
            module: row.get(10)?,
        })
    }
}

impl fmt::Display for MemberRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.visibility.to_lowercase())?;
        if self.is_static {
            write!(f, "static ")?;
        }
        if self.is_abstract {
            write!(f, "abstract ")?;
        } else if self.is_override {
            write!(f, "override ")?;
        } else if self.is_virtual {
            write!(f, "virtual ")?;
        }
        write!(
            f,
            "{} {}.{}",
            self.kind.to_lowercase(),
            self.type_full_name,
            self.name
        )?;
        if let Some(ret) = &self.return_type {
            write!(f, " : {ret}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterRow {
    pub position: u32,
    pub name: Option<String>,
    pub type_name: String,
    pub is_optional: bool,
    pub default_value: Option<String>,
    pub pass_mode: String,
}

impl fmt::Display for ParameterRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pass_mode != "value" {
            write!(f, "{} ", self.pass_mode)?;
        }
        write!(
            f,
            "{} {}",
            self.type_name,
            self.name.as_deref().unwrap_or("_")
        )?;
        match (&self.default_value, self.is_optional) {
            (Some(value), _) => write!(f, " = {value}"),
            (None, true) => write!(f, " (optional)"),
            (None, false) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumValueRow {
    pub name: String,
    pub value: String,
}

impl fmt::Display for EnumValueRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// One step of an inheritance walk. `module` is `None` for the trailing base
/// that is not in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ChainLink {
    pub full_name: String,
    pub module: Option<String>,
}

impl fmt::Display for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{} [{module}]", self.full_name),
            None => write!(f, "{} (not cataloged)", self.full_name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocHit {
    pub member_id: i64,
    pub name: String,
    pub kind: String,
    pub type_full_name: String,
    pub summary: Option<String>,
}

impl fmt::Display for DocHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}",
            self.kind.to_lowercase(),
            self.type_full_name,
            self.name
        )?;
        if let Some(summary) = &self.summary {
            write!(f, " - {summary}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleRow {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub full_name: String,
    pub file_path: String,
    pub platform: String,
    pub indexed_at: String,
    pub type_count: u32,
    pub product: Option<String>,
}

impl fmt::Display for ModuleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}, {} types) {}",
            self.name, self.version, self.platform, self.type_count, self.file_path
        )?;
        if let Some(product) = &self.product {
            write!(f, " [{product}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub name: String,
    pub created_at: String,
    pub module_count: u32,
}

impl fmt::Display for ProductRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} modules)", self.name, self.module_count)
    }
}

/// Options for searching types.
#[derive(Debug, Default)]
pub struct TypeQuery {
    /// Name pattern. `*` and `?` are wildcards; without them the pattern is a
    /// case-insensitive substring. A pattern containing `.` matches full names.
    pub pattern: Option<String>,
    pub kind: Option<TypeKind>,
    /// Exact namespace.
    pub namespace: Option<String>,
    /// Module simple name.
    pub module: Option<String>,
    /// Maximum results to return (0 means the default of 50).
    pub limit: u32,
}

/// Options for searching members.
#[derive(Debug, Default)]
pub struct MemberQuery {
    /// Member name pattern, same rules as [`TypeQuery::pattern`].
    pub pattern: Option<String>,
    pub kind: Option<MemberKind>,
    /// Declaring type, by full name or simple name.
    pub declaring_type: Option<String>,
    pub limit: u32,
}

/// The query family over one catalog connection.
#[derive(Clone, Copy)]
pub struct Query<'c> {
    conn: &'c Connection,
}

impl<'c> Query<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn search_types(&self, opts: &TypeQuery) -> Result<Vec<TypeRow>> {
        let mut sql = format!("SELECT {TYPE_COLUMNS} FROM v_types v WHERE 1=1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(pattern) = &opts.pattern {
            let column = if pattern.contains('.') {
                "v.full_name"
            } else {
                "v.name"
            };
            sql.push_str(&format!(" AND {column} LIKE ? ESCAPE '\\'"));
            params.push(Box::new(like_pattern(pattern)));
        }
        if let Some(kind) = opts.kind {
            sql.push_str(" AND v.kind = ?");
            params.push(Box::new(kind.as_ref().to_string()));
        }
        if let Some(namespace) = &opts.namespace {
            sql.push_str(" AND v.namespace = ?");
            params.push(Box::new(namespace.clone()));
        }
        if let Some(module) = &opts.module {
            sql.push_str(" AND v.module = ?");
            params.push(Box::new(module.clone()));
        }
        sql.push_str(&format!(
            " ORDER BY v.full_name, v.module, v.id LIMIT {}",
            limit_or_default(opts.limit)
        ));

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        self.rows(&sql, param_refs.as_slice(), TypeRow::from_row)
    }

    /// Types declared in `namespace`, optionally within one module.
    pub fn namespace_types(&self, namespace: &str, module: Option<&str>) -> Result<Vec<TypeRow>> {
        let sql = format!(
            "SELECT {TYPE_COLUMNS} FROM v_types v
             WHERE v.namespace = ?1 AND (?2 IS NULL OR v.module = ?2)
             ORDER BY v.full_name, v.module, v.id"
        );
        self.rows(&sql, params![namespace, module], TypeRow::from_row)
    }

    pub fn list_namespaces(&self, module: Option<&str>) -> Result<Vec<NamespaceRow>> {
        self.rows(
            "SELECT n.name, m.name, COUNT(t.id)
             FROM namespaces n
             JOIN modules m ON n.module_id = m.id
             LEFT JOIN types t ON t.namespace_id = n.id
             WHERE ?1 IS NULL OR m.name = ?1
             GROUP BY n.id
             ORDER BY n.name, m.name",
            params![module],
            |row| {
                Ok(NamespaceRow {
                    name: row.get(0)?,
                    module: row.get(1)?,
                    type_count: row.get(2)?,
                })
            },
        )
    }

    pub fn search_members(&self, opts: &MemberQuery) -> Result<Vec<MemberRow>> {
        let mut sql = format!("SELECT {MEMBER_COLUMNS} FROM v_members vm WHERE 1=1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(pattern) = &opts.pattern {
            sql.push_str(" AND vm.name LIKE ? ESCAPE '\\'");
            params.push(Box::new(like_pattern(pattern)));
        }
        if let Some(kind) = opts.kind {
            sql.push_str(" AND vm.kind = ?");
            params.push(Box::new(kind.as_ref().to_string()));
        }
        if let Some(ty) = &opts.declaring_type {
            sql.push_str(" AND (vm.type_full_name = ? OR vm.type_full_name LIKE ? ESCAPE '\\')");
            params.push(Box::new(ty.clone()));
            params.push(Box::new(format!("%.{}", escape_like(ty))));
        }
        sql.push_str(&format!(
            " ORDER BY vm.type_full_name, vm.id LIMIT {}",
            limit_or_default(opts.limit)
        ));

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        self.rows(&sql, param_refs.as_slice(), MemberRow::from_row)
    }

    /// Members of one type in declaration-kind order.
    pub fn type_members(&self, type_full_name: &str) -> Result<Vec<MemberRow>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM v_members vm
             WHERE vm.type_full_name = ?1
             ORDER BY vm.module, vm.id"
        );
        self.rows(&sql, [type_full_name], MemberRow::from_row)
    }

    pub fn member_parameters(&self, member_id: i64) -> Result<Vec<ParameterRow>> {
        self.rows(
            "SELECT position, name, type_name, is_optional, default_value, pass_mode
             FROM parameters WHERE member_id = ?1 ORDER BY position",
            [member_id],
            |row| {
                Ok(ParameterRow {
                    position: row.get(0)?,
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                    is_optional: row.get(3)?,
                    default_value: row.get(4)?,
                    pass_mode: row.get(5)?,
                })
            },
        )
    }

    pub fn enum_values(&self, type_full_name: &str) -> Result<Vec<EnumValueRow>> {
        self.rows(
            "SELECT ev.name, ev.value
             FROM enum_values ev JOIN types t ON ev.type_id = t.id
             WHERE t.full_name = ?1
             ORDER BY t.id, ev.id",
            [type_full_name],
            |row| {
                Ok(EnumValueRow {
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            },
        )
    }

    /// The type followed by its bases, nearest first. When the walk leaves the
    /// catalog the recorded base name closes the chain. Empty if the type is
    /// not cataloged.
    pub fn inheritance_chain(&self, type_full_name: &str) -> Result<Vec<ChainLink>> {
        let start: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM types WHERE full_name = ?1 ORDER BY id LIMIT 1",
                [type_full_name],
                |row| row.get(0),
            )
            .optional()?;

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = start;
        while let Some(id) = next {
            if !seen.insert(id) {
                log::warn!("inheritance cycle at type id {id}");
                break;
            }
            let (full_name, module, base_id, base_name): (String, String, Option<i64>, Option<String>) =
                self.conn.query_row(
                    "SELECT t.full_name, m.name, t.base_type_id, t.base_type_name
                     FROM types t JOIN modules m ON t.module_id = m.id
                     WHERE t.id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;
            chain.push(ChainLink {
                full_name,
                module: Some(module),
            });
            next = base_id;
            if base_id.is_none()
                && let Some(base_name) = base_name
            {
                chain.push(ChainLink {
                    full_name: base_name,
                    module: None,
                });
            }
        }
        Ok(chain)
    }

    /// Types with a recorded edge to the interface.
    pub fn implementations(&self, interface_full_name: &str) -> Result<Vec<TypeRow>> {
        let sql = format!(
            "SELECT {TYPE_COLUMNS}
             FROM type_interfaces e
             JOIN types i ON e.interface_id = i.id
             JOIN v_types v ON v.id = e.type_id
             WHERE i.full_name = ?1
             ORDER BY v.full_name, v.module, v.id"
        );
        self.rows(&sql, [interface_full_name], TypeRow::from_row)
    }

    pub fn interfaces_of(&self, type_full_name: &str) -> Result<Vec<TypeRow>> {
        let sql = format!(
            "SELECT {TYPE_COLUMNS}
             FROM type_interfaces e
             JOIN types t ON e.type_id = t.id
             JOIN v_types v ON v.id = e.interface_id
             WHERE t.full_name = ?1
             ORDER BY v.full_name, v.module, v.id"
        );
        self.rows(&sql, [type_full_name], TypeRow::from_row)
    }

    /// Direct subclasses, matched by recorded base name so that types whose
    /// base link is dangling still show up.
    pub fn derived_types(&self, type_full_name: &str) -> Result<Vec<TypeRow>> {
        let sql = format!(
            "SELECT {TYPE_COLUMNS} FROM v_types v
             WHERE v.base_type_name = ?1
             ORDER BY v.full_name, v.module, v.id"
        );
        self.rows(&sql, [type_full_name], TypeRow::from_row)
    }

    /// Full-text match over member names and summaries. Each word is matched
    /// as a prefix.
    pub fn search_docs(&self, text: &str, limit: u32) -> Result<Vec<DocHit>> {
        let Some(expr) = fts_expression(text) else {
            return Ok(Vec::new());
        };
        self.rows(
            "SELECT mb.id, mb.name, mb.kind, t.full_name, mb.summary
             FROM members_fts f
             JOIN members mb ON mb.id = f.rowid
             JOIN types t ON mb.type_id = t.id
             WHERE members_fts MATCH ?1
             ORDER BY f.rank, t.full_name, mb.id
             LIMIT ?2",
            params![expr, limit_or_default(limit)],
            |row| {
                Ok(DocHit {
                    member_id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    type_full_name: row.get(3)?,
                    summary: row.get(4)?,
                })
            },
        )
    }

    /// Cataloged modules, optionally only those in one product group.
    pub fn list_modules(&self, product: Option<&str>) -> Result<Vec<ModuleRow>> {
        self.rows(
            "SELECT m.id, m.name, m.version, m.full_name, m.file_path, m.platform,
                    m.indexed_at, m.type_count, p.name
             FROM modules m LEFT JOIN products p ON m.product_id = p.id
             WHERE ?1 IS NULL OR p.name = ?1
             ORDER BY m.name, m.version, m.id",
            params![product],
            |row| {
                Ok(ModuleRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    full_name: row.get(3)?,
                    file_path: row.get(4)?,
                    platform: row.get(5)?,
                    indexed_at: row.get(6)?,
                    type_count: row.get(7)?,
                    product: row.get(8)?,
                })
            },
        )
    }

    pub fn list_products(&self) -> Result<Vec<ProductRow>> {
        self.rows(
            "SELECT p.name, p.created_at, COUNT(m.id)
             FROM products p LEFT JOIN modules m ON m.product_id = p.id
             GROUP BY p.id
             ORDER BY p.name",
            [],
            |row| {
                Ok(ProductRow {
                    name: row.get(0)?,
                    created_at: row.get(1)?,
                    module_count: row.get(2)?,
                })
            },
        )
    }

    /// Human-readable summary of the catalog at `db_path`.
    pub fn catalog_status(&self, db_path: &Path) -> Result<String> {
        let count = |table: &str| -> SqlResult<u32> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
        };
        let modules = count("modules")?;

        let mut out = format!(
            "Catalog: {} ({}, schema v{})\n  modules: {}, types: {}, members: {}, parameters: {}, enum values: {}",
            db_path.display(),
            if modules == 0 { "empty" } else { "active" },
            schema_version(self.conn)?,
            modules,
            count("types")?,
            count("members")?,
            count("parameters")?,
            count("enum_values")?,
        );

        let products = self.list_products()?;
        if !products.is_empty() {
            out.push_str("\n  groups: ");
            let parts: Vec<String> = products
                .iter()
                .map(|p| format!("{} ({})", p.name, p.module_count))
                .collect();
            out.push_str(&parts.join(", "));
        }

        Ok(out)
    }

    fn rows<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> SqlResult<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?.collect::<SqlResult<Vec<T>>>()?;
        Ok(rows)
    }
}

fn limit_or_default(limit: u32) -> u32 {
    if limit == 0 { DEFAULT_LIMIT } else { limit }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translate a user pattern to a LIKE pattern (escape `\`).
fn like_pattern(pattern: &str) -> String {
    if !pattern.contains(['*', '?']) {
        return format!("%{}%", escape_like(pattern));
    }
    pattern
        .chars()
        .map(|c| match c {
            '*' => "%".to_string(),
            '?' => "_".to_string(),
            c => escape_like(&c.to_string()),
        })
        .collect()
}

/// Quote each word so FTS5 syntax in user input is taken literally.
fn fts_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|word| format!("\"{}\"*", word.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}
