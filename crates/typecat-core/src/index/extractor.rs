//! Type graph walker: writes one module's exported surface into the catalog.
//!
//! Extraction runs in two phases on the caller's transaction. Phase 1 inserts
//! namespaces, types and their members while building a `full_name → id` map.
//! Phase 2 resolves base types and interfaces against that map, then against
//! types already cataloged for other modules. Nothing in phase 2 depends on
//! insertion order, so types may reference each other freely.

use std::collections::HashMap;
use std::fmt;

use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use serde::Serialize;
use strum::{AsRefStr, EnumString};

use crate::metadata::{
    EventDefinition, FieldDefinition, MethodDefinition, ModuleView, PropertyDefinition,
    TypeDefinition, Visibility,
};

/// Invoked after each type (with its members) is written, with the number of
/// types written so far. An error aborts the pass.
pub type TypeHook<'h> = &'h mut dyn FnMut(usize) -> SqlResult<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Struct,
    Delegate,
}

impl TypeKind {
    /// Enum, then interface, then value type, then delegate; anything else is a class.
    pub fn classify(ty: &TypeDefinition) -> Self {
        let base = ty.base_type.as_ref().map(|b| b.full_name.as_str());
        if base == Some("System.Enum") {
            TypeKind::Enum
        } else if ty.is_interface {
            TypeKind::Interface
        } else if base == Some("System.ValueType") {
            TypeKind::Struct
        } else if matches!(base, Some("System.MulticastDelegate" | "System.Delegate")) {
            TypeKind::Delegate
        } else {
            TypeKind::Class
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum MemberKind {
    Constructor,
    Method,
    Property,
    Field,
    Event,
}

/// One row of the `members` table, derived from a loaded definition.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub name: String,
    pub kind: MemberKind,
    /// `None` for constructors.
    pub return_type: Option<String>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_sealed: bool,
    /// Heuristic: set when the member is virtual and reuses an inherited
    /// vtable slot (not `newslot`). Reflection-only reading cannot look up the
    /// base definition across modules, so this is approximate: interface
    /// re-implementations and slots introduced by unusual compilers can be
    /// misreported in either direction.
    pub is_override: bool,
    pub visibility: Visibility,
    pub generic_params: Vec<String>,
}

impl MemberRecord {
    fn constructor(m: &MethodDefinition) -> Self {
        Self {
            kind: MemberKind::Constructor,
            return_type: None,
            ..Self::method(m)
        }
    }

    fn method(m: &MethodDefinition) -> Self {
        Self {
            name: m.name.clone(),
            kind: MemberKind::Method,
            return_type: Some(m.return_type.clone()),
            is_static: m.is_static,
            is_virtual: m.is_virtual,
            is_abstract: m.is_abstract,
            is_sealed: m.is_virtual && m.is_final,
            is_override: m.is_virtual && !m.is_new_slot,
            visibility: m.visibility,
            generic_params: m.generic_params.clone(),
        }
    }

    fn property(p: &PropertyDefinition) -> Self {
        let accessor = p.primary_accessor();
        let is_virtual = accessor.is_some_and(|a| a.is_virtual);
        Self {
            name: p.name.clone(),
            kind: MemberKind::Property,
            return_type: Some(p.type_name.clone()),
            is_static: accessor.is_some_and(|a| a.is_static),
            is_virtual,
            is_abstract: accessor.is_some_and(|a| a.is_abstract),
            is_sealed: is_virtual && accessor.is_some_and(|a| a.is_final),
            is_override: is_virtual && !accessor.is_some_and(|a| a.is_new_slot),
            visibility: p.visibility(),
            generic_params: Vec::new(),
        }
    }

    fn field(f: &FieldDefinition) -> Self {
        Self {
            name: f.name.clone(),
            kind: MemberKind::Field,
            return_type: Some(f.type_name.clone()),
            is_static: f.is_static,
            is_virtual: false,
            is_abstract: false,
            is_sealed: false,
            is_override: false,
            visibility: f.visibility,
            generic_params: Vec::new(),
        }
    }

    fn event(e: &EventDefinition) -> Self {
        let accessor = e.primary_accessor();
        let is_virtual = accessor.is_some_and(|a| a.is_virtual);
        Self {
            name: e.name.clone(),
            kind: MemberKind::Event,
            return_type: Some(e.handler_type.clone()),
            is_static: accessor.is_some_and(|a| a.is_static),
            is_virtual,
            is_abstract: accessor.is_some_and(|a| a.is_abstract),
            is_sealed: is_virtual && accessor.is_some_and(|a| a.is_final),
            is_override: is_virtual && !accessor.is_some_and(|a| a.is_new_slot),
            visibility: e.visibility(),
            generic_params: Vec::new(),
        }
    }
}

/// Row counts written by one extraction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub types: u32,
    pub members: u32,
    pub parameters: u32,
    pub enum_values: u32,
    pub interface_edges: u32,
    /// Interfaces that matched no cataloged type and were not recorded.
    pub interfaces_dropped: u32,
    pub base_types_linked: u32,
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "types: {}, members: {}, parameters: {}, enum values: {}, interface edges: {} ({} dropped), base links: {}",
            self.types,
            self.members,
            self.parameters,
            self.enum_values,
            self.interface_edges,
            self.interfaces_dropped,
            self.base_types_linked,
        )
    }
}

/// Write every exported type of `view` under `module_id`.
///
/// `conn` is expected to be inside the pass transaction; any error leaves the
/// caller to roll back.
pub fn extract(
    conn: &Connection,
    module_id: i64,
    view: &ModuleView,
    mut hook: Option<TypeHook<'_>>,
) -> SqlResult<PassStats> {
    let mut stats = PassStats::default();
    let mut namespaces: HashMap<&str, i64> = HashMap::new();
    let mut ids: HashMap<&str, i64> = HashMap::new();
    let mut written = Vec::new();

    // Phase 1: types and members.
    for (index, ty) in view.exported_types().into_iter().enumerate() {
        let namespace_id = match namespaces.get(ty.namespace.as_str()) {
            Some(id) => *id,
            None => {
                let id = insert_namespace(conn, module_id, &ty.namespace)?;
                namespaces.insert(&ty.namespace, id);
                id
            }
        };
        let kind = TypeKind::classify(ty);
        let type_id = insert_type(conn, module_id, namespace_id, ty, kind)?;
        ids.insert(&ty.full_name, type_id);
        stats.types += 1;

        if kind == TypeKind::Enum {
            write_enum_values(conn, type_id, ty, &mut stats)?;
        } else {
            write_members(conn, type_id, ty, &mut stats)?;
        }
        written.push((type_id, ty));

        if let Some(hook) = hook.as_deref_mut() {
            hook(index + 1)?;
        }
    }

    // Phase 2: base types and interface edges.
    for (type_id, ty) in &written {
        if let Some(base) = &ty.base_type {
            if let Some(base_id) = lookup_type(conn, &ids, &base.full_name, module_id)? {
                conn.execute(
                    "UPDATE types SET base_type_id = ?1 WHERE id = ?2",
                    params![base_id, type_id],
                )?;
                stats.base_types_linked += 1;
            }
        }
        for interface in &ty.interfaces {
            conn.execute(
                "INSERT OR IGNORE INTO type_interface_names (type_id, interface_name) VALUES (?1, ?2)",
                params![type_id, interface.full_name],
            )?;
            match lookup_type(conn, &ids, &interface.full_name, module_id)? {
                Some(interface_id) => {
                    stats.interface_edges += conn.execute(
                        "INSERT OR IGNORE INTO type_interfaces (type_id, interface_id) VALUES (?1, ?2)",
                        params![type_id, interface_id],
                    )? as u32;
                }
                None => {
                    log::debug!(
                        "dropping interface edge {} -> {}",
                        ty.full_name,
                        interface.full_name
                    );
                    stats.interfaces_dropped += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Point dangling base-type links at any cataloged type with the recorded
/// name. Links are nulled when the module defining a base is replaced; this
/// repairs them once the base is back. Returns the number of rows updated.
pub fn relink_base_types(conn: &Connection) -> SqlResult<usize> {
    conn.execute(
        "UPDATE types SET base_type_id = (
             SELECT b.id FROM types b
             WHERE b.full_name = types.base_type_name AND b.id != types.id
             ORDER BY b.id LIMIT 1
         )
         WHERE base_type_id IS NULL
           AND base_type_name IS NOT NULL
           AND EXISTS (
             SELECT 1 FROM types b
             WHERE b.full_name = types.base_type_name AND b.id != types.id
           )",
        [],
    )
}

/// Add interface edges whose target is now cataloged: interfaces from modules
/// cataloged after the implementor, or re-cataloged after a replace dropped the
/// edge. Returns the number of edges added.
pub fn relink_interfaces(conn: &Connection) -> SqlResult<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO type_interfaces (type_id, interface_id)
         SELECT n.type_id, (
             SELECT i.id FROM types i
             WHERE i.full_name = n.interface_name AND i.id != n.type_id
             ORDER BY i.id LIMIT 1
         )
         FROM type_interface_names n
         WHERE EXISTS (
             SELECT 1 FROM types i
             WHERE i.full_name = n.interface_name AND i.id != n.type_id
         )
           AND NOT EXISTS (
             SELECT 1 FROM type_interfaces e JOIN types i ON e.interface_id = i.id
             WHERE e.type_id = n.type_id AND i.full_name = n.interface_name
         )",
        [],
    )
}

fn insert_namespace(conn: &Connection, module_id: i64, name: &str) -> SqlResult<i64> {
    conn.execute(
        "INSERT INTO namespaces (module_id, name) VALUES (?1, ?2)",
        params![module_id, name],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_type(
    conn: &Connection,
    module_id: i64,
    namespace_id: i64,
    ty: &TypeDefinition,
    kind: TypeKind,
) -> SqlResult<i64> {
    conn.execute(
        "INSERT INTO types (module_id, namespace_id, name, full_name, kind, is_abstract, is_sealed,
                            is_public, is_static, is_generic, generic_params, base_type_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            module_id,
            namespace_id,
            ty.name,
            ty.full_name,
            kind.as_ref(),
            ty.is_abstract,
            ty.is_sealed,
            ty.is_public,
            ty.is_abstract && ty.is_sealed,
            !ty.generic_params.is_empty(),
            ty.generic_params.join(","),
            ty.base_type.as_ref().map(|b| b.full_name.as_str()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Resolve a full name: this pass first, then other cataloged modules.
fn lookup_type(
    conn: &Connection,
    ids: &HashMap<&str, i64>,
    full_name: &str,
    module_id: i64,
) -> SqlResult<Option<i64>> {
    if let Some(id) = ids.get(full_name) {
        return Ok(Some(*id));
    }
    conn.query_row(
        "SELECT id FROM types WHERE full_name = ?1 AND module_id != ?2 ORDER BY id LIMIT 1",
        params![full_name, module_id],
        |row| row.get(0),
    )
    .optional()
}

fn write_enum_values(
    conn: &Connection,
    type_id: i64,
    ty: &TypeDefinition,
    stats: &mut PassStats,
) -> SqlResult<()> {
    for field in ty.fields.iter().filter(|f| f.is_literal && f.is_static) {
        conn.execute(
            "INSERT INTO enum_values (type_id, name, value) VALUES (?1, ?2, ?3)",
            params![type_id, field.name, field.constant.as_deref().unwrap_or("")],
        )?;
        stats.enum_values += 1;
    }
    Ok(())
}

/// Constructors, properties, methods, fields, events: public and declared here.
fn write_members(
    conn: &Connection,
    type_id: i64,
    ty: &TypeDefinition,
    stats: &mut PassStats,
) -> SqlResult<()> {
    let public = |v: Visibility| v == Visibility::Public;

    for ctor in ty
        .methods
        .iter()
        .filter(|m| m.is_constructor() && public(m.visibility))
    {
        let id = insert_member(conn, type_id, &MemberRecord::constructor(ctor), stats)?;
        write_parameters(conn, id, ctor, stats)?;
    }
    for property in ty.properties.iter().filter(|p| public(p.visibility())) {
        let id = insert_member(conn, type_id, &MemberRecord::property(property), stats)?;
        insert_accessors(conn, id, property)?;
    }
    for method in ty
        .methods
        .iter()
        .filter(|m| !m.is_constructor() && !m.is_accessor && public(m.visibility))
    {
        let id = insert_member(conn, type_id, &MemberRecord::method(method), stats)?;
        write_parameters(conn, id, method, stats)?;
    }
    for field in ty.fields.iter().filter(|f| public(f.visibility)) {
        insert_member(conn, type_id, &MemberRecord::field(field), stats)?;
    }
    for event in ty.events.iter().filter(|e| public(e.visibility())) {
        insert_member(conn, type_id, &MemberRecord::event(event), stats)?;
    }
    Ok(())
}

fn insert_member(
    conn: &Connection,
    type_id: i64,
    record: &MemberRecord,
    stats: &mut PassStats,
) -> SqlResult<i64> {
    conn.execute(
        "INSERT INTO members (type_id, name, kind, return_type, is_static, is_virtual, is_abstract,
                              is_sealed, is_override, visibility, is_generic, generic_params)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            type_id,
            record.name,
            record.kind.as_ref(),
            record.return_type,
            record.is_static,
            record.is_virtual,
            record.is_abstract,
            record.is_sealed,
            record.is_override,
            record.visibility.as_ref(),
            !record.generic_params.is_empty(),
            record.generic_params.join(","),
        ],
    )?;
    stats.members += 1;
    Ok(conn.last_insert_rowid())
}

fn write_parameters(
    conn: &Connection,
    member_id: i64,
    method: &MethodDefinition,
    stats: &mut PassStats,
) -> SqlResult<()> {
    for p in &method.parameters {
        conn.execute(
            "INSERT INTO parameters (member_id, name, type_name, position, is_optional, default_value, pass_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                member_id,
                p.name,
                p.type_name,
                p.position,
                p.is_optional,
                p.default_value,
                p.pass_mode.as_ref(),
            ],
        )?;
        stats.parameters += 1;
    }
    Ok(())
}

fn insert_accessors(conn: &Connection, member_id: i64, property: &PropertyDefinition) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO property_accessors (member_id, has_getter, has_setter, getter_visibility, setter_visibility)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            member_id,
            property.getter.is_some(),
            property.setter.is_some(),
            property.getter.as_ref().map(|a| a.visibility.as_ref()),
            property.setter.as_ref().map(|a| a.visibility.as_ref()),
        ],
    )?;
    Ok(())
}
