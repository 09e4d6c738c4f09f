//! Builds a [`ModuleView`] from raw module bytes.
//!
//! Reading stops at the metadata: method bodies, resources and native code
//! are never touched, and nothing from the module is executed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::ops::Range;
use std::path::Path;

use super::heaps::{BlobHeap, StringHeap};
use super::model::{
    AccessorInfo, AssemblyIdentity, EventDefinition, FieldDefinition, GapReason,
    MethodDefinition, ModuleView, ParameterDefinition, PassMode, PropertyDefinition,
    ResolutionGap, TypeDefinition, TypeReference, Version, Visibility,
};
use super::pe::PeImage;
use super::reader::ByteReader;
use super::signature::{self as sig, TypeSig};
use super::tables::{self as t, CodedRef, Tables};
use super::{LoadError, LoaderOptions};
use crate::deps::DependencySet;

const METADATA_SIGNATURE: u32 = 0x424a_5342;
const MAX_NESTING: usize = 64;

const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
const TYPE_PUBLIC: u32 = 0x0000_0001;
const TYPE_NESTED_PUBLIC: u32 = 0x0000_0002;
const TYPE_INTERFACE: u32 = 0x0000_0020;
const TYPE_ABSTRACT: u32 = 0x0000_0080;
const TYPE_SEALED: u32 = 0x0000_0100;

const FIELD_STATIC: u16 = 0x0010;
const FIELD_INIT_ONLY: u16 = 0x0020;
const FIELD_LITERAL: u16 = 0x0040;

const METHOD_STATIC: u16 = 0x0010;
const METHOD_FINAL: u16 = 0x0020;
const METHOD_VIRTUAL: u16 = 0x0040;
const METHOD_NEW_SLOT: u16 = 0x0100;
const METHOD_ABSTRACT: u16 = 0x0400;
const METHOD_SPECIAL_NAME: u16 = 0x0800;

const PARAM_IN: u16 = 0x0001;
const PARAM_OUT: u16 = 0x0002;
const PARAM_OPTIONAL: u16 = 0x0010;

const SEMANTICS_SETTER: u16 = 0x0001;
const SEMANTICS_GETTER: u16 = 0x0002;
const SEMANTICS_ADD_ON: u16 = 0x0008;
const SEMANTICS_REMOVE_ON: u16 = 0x0010;

const ASSEMBLY_REF_FULL_KEY: u32 = 0x0001;

/// Decoded metadata root of one image.
pub(crate) struct Metadata<'a> {
    pub(crate) runtime_version: &'a str,
    pub(crate) platform: &'static str,
    pub(crate) tables: Tables<'a>,
}

impl<'a> Metadata<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self, LoadError> {
        let image = PeImage::parse(bytes)?;
        let cli = image.cli_header()?;
        let root = image.slice_at_rva(cli.metadata_rva, cli.metadata_size)?;

        let mut r = ByteReader::new(root);
        let signature = r.read_u32()?;
        if signature != METADATA_SIGNATURE {
            return Err(LoadError::InvalidMetadataSignature(signature));
        }
        r.skip(8)?; // major, minor, reserved
        let version_len = r.read_u32()? as usize;
        let runtime_version = std::str::from_utf8(r.read_slice(version_len)?)?
            .trim_end_matches('\0');
        r.skip(2)?; // flags
        let stream_count = r.read_u16()?;

        let mut table_stream = None;
        let mut strings = None;
        let mut blobs = None;
        for _ in 0..stream_count {
            let offset = r.read_u32()? as usize;
            let size = r.read_u32()? as usize;
            let name = r.read_padded_name()?;
            let data = offset
                .checked_add(size)
                .and_then(|end| root.get(offset..end))
                .ok_or(LoadError::UnexpectedEof { offset })?;
            match name {
                "#~" | "#-" => table_stream = Some(data),
                "#Strings" => strings = Some(data),
                "#Blob" => blobs = Some(data),
                _ => {}
            }
        }

        let tables = Tables::parse(
            table_stream.ok_or(LoadError::MissingStream("#~"))?,
            StringHeap::new(strings.ok_or(LoadError::MissingStream("#Strings"))?),
            BlobHeap::new(blobs.unwrap_or(&[])),
        )?;

        Ok(Self {
            runtime_version,
            platform: image.platform(cli.flags),
            tables,
        })
    }
}

/// Read and decode a module file.
pub fn load_module(
    path: &Path,
    deps: &DependencySet,
    options: &LoaderOptions,
) -> Result<ModuleView, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_bytes(&bytes, deps, options)
}

/// Decode a module already in memory.
pub fn load_bytes(
    bytes: &[u8],
    deps: &DependencySet,
    options: &LoaderOptions,
) -> Result<ModuleView, LoadError> {
    let md = Metadata::parse(bytes)?;
    let builder = ViewBuilder::new(&md)?;
    let identity = builder.identity()?;
    let references = builder.references()?;

    if options.strict_dependencies {
        if let Some(missing) = references.iter().find(|r| deps.find(&r.name).is_none()) {
            return Err(LoadError::UnresolvedDependency(missing.display_name()));
        }
    }

    let mut resolver = Resolver::new(deps);
    let mut types = Vec::new();
    let mut gaps = Vec::new();
    for row in 1..=md.tables.row_count(t::TYPE_DEF) {
        if !builder.is_exported(row)? {
            continue;
        }
        types.push(builder.build_type(row, &mut resolver, &mut gaps)?);
    }
    for gap in &gaps {
        log::debug!("resolution gap: {gap}");
    }

    Ok(ModuleView {
        identity,
        platform: md.platform.to_string(),
        runtime_version: md.runtime_version.to_string(),
        references,
        types,
        gaps,
    })
}

/// A TypeDef or TypeRef name, plus the assembly that defines it when it
/// lives outside the module being read.
struct NamedType {
    namespace: String,
    name: String,
    assembly: Option<String>,
}

impl NamedType {
    fn full_name(&self) -> String {
        join_full_name(&self.namespace, &self.name)
    }

    /// Surface rendering: keyword for built-ins, otherwise the unqualified
    /// name with arity suffixes dropped and nesting shown with dots.
    fn display(&self) -> String {
        if self.namespace == "System" {
            if let Some(keyword) = system_keyword(&self.name) {
                return keyword.to_string();
            }
        }
        self.name
            .split('+')
            .map(strip_arity)
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[derive(Default)]
struct GenericContext<'g> {
    type_params: &'g [String],
    method_params: &'g [String],
}

struct ViewBuilder<'m, 'a> {
    tables: &'m Tables<'a>,
    enclosing: HashMap<u32, u32>,
    generic_params: HashMap<CodedRef, Vec<(u16, String)>>,
    interfaces: HashMap<u32, Vec<CodedRef>>,
    constants: HashMap<CodedRef, String>,
    semantics: HashMap<CodedRef, Vec<(u16, u32)>>,
    accessors: HashSet<u32>,
    property_ranges: HashMap<u32, Range<u32>>,
    event_ranges: HashMap<u32, Range<u32>>,
}

impl<'m, 'a> ViewBuilder<'m, 'a> {
    fn new(md: &'m Metadata<'a>) -> Result<Self, LoadError> {
        let tables = &md.tables;

        let mut generic_params: HashMap<CodedRef, Vec<(u16, String)>> = HashMap::new();
        for row in 1..=tables.row_count(t::GENERIC_PARAM) {
            let r = tables.row(t::GENERIC_PARAM, row)?;
            generic_params
                .entry(r.coded(2)?)
                .or_default()
                .push((r.u16(0)?, r.str(3)?.to_string()));
        }
        for params in generic_params.values_mut() {
            params.sort_by_key(|(number, _)| *number);
        }

        let mut interfaces: HashMap<u32, Vec<CodedRef>> = HashMap::new();
        for row in 1..=tables.row_count(t::INTERFACE_IMPL) {
            let r = tables.row(t::INTERFACE_IMPL, row)?;
            interfaces.entry(r.index(0)?).or_default().push(r.coded(1)?);
        }

        let mut constants = HashMap::new();
        for row in 1..=tables.row_count(t::CONSTANT) {
            let r = tables.row(t::CONSTANT, row)?;
            if let Some(text) = format_constant(r.u16(0)? as u8, r.blob(2)?) {
                constants.insert(r.coded(1)?, text);
            }
        }

        let mut semantics: HashMap<CodedRef, Vec<(u16, u32)>> = HashMap::new();
        let mut accessors = HashSet::new();
        for row in 1..=tables.row_count(t::METHOD_SEMANTICS) {
            let r = tables.row(t::METHOD_SEMANTICS, row)?;
            let method = r.index(1)?;
            accessors.insert(method);
            semantics
                .entry(r.coded(2)?)
                .or_default()
                .push((r.u16(0)?, method));
        }

        Ok(Self {
            tables,
            enclosing: enclosing_map(tables)?,
            generic_params,
            interfaces,
            constants,
            semantics,
            accessors,
            property_ranges: owner_ranges(tables, t::PROPERTY_MAP, t::PROPERTY)?,
            event_ranges: owner_ranges(tables, t::EVENT_MAP, t::EVENT)?,
        })
    }

    fn identity(&self) -> Result<AssemblyIdentity, LoadError> {
        if self.tables.row_count(t::ASSEMBLY) == 0 {
            // Netmodules have no manifest; fall back to the module name.
            let name = self.tables.row(t::MODULE, 1)?.str(1)?;
            let stem = Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name);
            return Ok(AssemblyIdentity {
                name: stem.to_string(),
                version: Version::default(),
                culture: None,
                public_key_token: None,
            });
        }
        let r = self.tables.row(t::ASSEMBLY, 1)?;
        Ok(AssemblyIdentity {
            name: r.str(7)?.to_string(),
            version: Version {
                major: r.u16(1)?,
                minor: r.u16(2)?,
                build: r.u16(3)?,
                revision: r.u16(4)?,
            },
            culture: non_empty(r.str(8)?),
            public_key_token: None,
        })
    }

    fn references(&self) -> Result<Vec<AssemblyIdentity>, LoadError> {
        (1..=self.tables.row_count(t::ASSEMBLY_REF))
            .map(|row| {
                let r = self.tables.row(t::ASSEMBLY_REF, row)?;
                let key = r.blob(5)?;
                let token = if r.u32(4)? & ASSEMBLY_REF_FULL_KEY == 0 && !key.is_empty() {
                    Some(key.iter().map(|b| format!("{b:02x}")).collect())
                } else {
                    None
                };
                Ok(AssemblyIdentity {
                    name: r.str(6)?.to_string(),
                    version: Version {
                        major: r.u16(0)?,
                        minor: r.u16(1)?,
                        build: r.u16(2)?,
                        revision: r.u16(3)?,
                    },
                    culture: non_empty(r.str(7)?),
                    public_key_token: token,
                })
            })
            .collect()
    }

    fn is_exported(&self, row: u32) -> Result<bool, LoadError> {
        let mut current = row;
        for _ in 0..MAX_NESTING {
            let r = self.tables.row(t::TYPE_DEF, current)?;
            let visibility = r.u32(0)? & TYPE_VISIBILITY_MASK;
            match self.enclosing.get(&current) {
                None => {
                    let module_type = r.str(1)? == "<Module>" && r.str(2)?.is_empty();
                    return Ok(visibility == TYPE_PUBLIC && !module_type);
                }
                Some(outer) if visibility == TYPE_NESTED_PUBLIC => current = *outer,
                Some(_) => return Ok(false),
            }
        }
        Ok(false)
    }

    fn named(&self, r: CodedRef) -> Result<NamedType, LoadError> {
        match r.table {
            t::TYPE_DEF => {
                let (namespace, name) = typedef_names(self.tables, &self.enclosing, r.row)?;
                Ok(NamedType {
                    namespace,
                    name,
                    assembly: None,
                })
            }
            t::TYPE_REF => typeref_names(self.tables, r.row),
            other => Err(LoadError::InvalidIndex {
                table: t::table_name(other),
                index: r.row,
            }),
        }
    }

    fn type_spec(&self, row: u32) -> Result<TypeSig, LoadError> {
        sig::parse_type_spec(self.tables.row(t::TYPE_SPEC, row)?.blob(0)?)
    }

    fn render_coded(&self, r: CodedRef, ctx: &GenericContext<'_>) -> Result<String, LoadError> {
        if r.table == t::TYPE_SPEC {
            let spec = self.type_spec(r.row)?;
            return self.render(&spec, ctx);
        }
        Ok(self.named(r)?.display())
    }

    fn render(&self, ty: &TypeSig, ctx: &GenericContext<'_>) -> Result<String, LoadError> {
        Ok(match ty {
            TypeSig::Primitive(element) => primitive_keyword(*element).to_string(),
            TypeSig::Class(r) | TypeSig::ValueType(r) => self.render_coded(*r, ctx)?,
            TypeSig::GenericInst { definition, args } => {
                let named = self.named(*definition)?;
                let args = args
                    .iter()
                    .map(|arg| self.render(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                if named.full_name() == "System.Nullable`1" && args.len() == 1 {
                    format!("{}?", args[0])
                } else {
                    format!("{}<{}>", named.display(), args.join(", "))
                }
            }
            TypeSig::Var(n) => ctx
                .type_params
                .get(*n as usize)
                .cloned()
                .unwrap_or_else(|| format!("!{n}")),
            TypeSig::MVar(n) => ctx
                .method_params
                .get(*n as usize)
                .cloned()
                .unwrap_or_else(|| format!("!!{n}")),
            TypeSig::SzArray(element) => format!("{}[]", self.render(element, ctx)?),
            TypeSig::Array { element, rank } => format!(
                "{}[{}]",
                self.render(element, ctx)?,
                ",".repeat(rank.saturating_sub(1) as usize)
            ),
            TypeSig::Ptr(inner) => format!("{}*", self.render(inner, ctx)?),
            TypeSig::ByRef(inner) => format!("ref {}", self.render(inner, ctx)?),
            TypeSig::FnPtr(method) => {
                let mut parts = method
                    .params
                    .iter()
                    .map(|p| self.render(p, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                parts.push(self.render(&method.ret, ctx)?);
                format!("delegate*<{}>", parts.join(", "))
            }
        })
    }

    /// Resolve a base type or interface reference. Generic instantiations are
    /// recorded under their definition's name; the display keeps the arguments.
    fn reference(
        &self,
        r: CodedRef,
        ctx: &GenericContext<'_>,
    ) -> Result<(TypeReference, Option<String>), LoadError> {
        if r.table == t::TYPE_SPEC {
            let spec = self.type_spec(r.row)?;
            let display = self.render(&spec, ctx)?;
            return Ok(match spec {
                TypeSig::GenericInst { definition, .. } => {
                    let named = self.named(definition)?;
                    let full_name = named.full_name();
                    (TypeReference { full_name, display }, named.assembly)
                }
                _ => (
                    TypeReference {
                        full_name: display.clone(),
                        display,
                    },
                    None,
                ),
            });
        }
        let named = self.named(r)?;
        let reference = TypeReference {
            full_name: named.full_name(),
            display: named.display(),
        };
        Ok((reference, named.assembly))
    }

    fn generic_names(&self, owner: CodedRef) -> Vec<String> {
        self.generic_params
            .get(&owner)
            .map(|params| params.iter().map(|(_, name)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn build_type(
        &self,
        row: u32,
        resolver: &mut Resolver<'_>,
        gaps: &mut Vec<ResolutionGap>,
    ) -> Result<TypeDefinition, LoadError> {
        let r = self.tables.row(t::TYPE_DEF, row)?;
        let flags = r.u32(0)?;
        let (namespace, name) = typedef_names(self.tables, &self.enclosing, row)?;
        let full_name = join_full_name(&namespace, &name);
        let generic_params = self.generic_names(CodedRef {
            table: t::TYPE_DEF,
            row,
        });
        let ctx = GenericContext {
            type_params: &generic_params,
            ..GenericContext::default()
        };

        let mut resolve = |coded: CodedRef| -> Result<TypeReference, LoadError> {
            let (reference, assembly) = self.reference(coded, &ctx)?;
            if let Some(assembly) = assembly {
                if let Some(reason) = resolver.check(&assembly, &reference.full_name) {
                    gaps.push(ResolutionGap {
                        referenced_from: full_name.clone(),
                        reference: reference.full_name.clone(),
                        assembly,
                        reason,
                    });
                }
            }
            Ok(reference)
        };

        let extends = r.coded(3)?;
        let base_type = if extends.is_null() {
            None
        } else {
            Some(resolve(extends)?)
        };
        let interfaces = self
            .interfaces
            .get(&row)
            .into_iter()
            .flatten()
            .map(|coded| resolve(*coded))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::new();
        for index in self.tables.list_range(t::TYPE_DEF, row, 4, t::FIELD)? {
            let field = self.tables.indirect(t::FIELD_PTR, index)?;
            fields.push(self.build_field(field, &ctx)?);
        }
        let mut methods = Vec::new();
        for index in self.tables.list_range(t::TYPE_DEF, row, 5, t::METHOD_DEF)? {
            let method = self.tables.indirect(t::METHOD_PTR, index)?;
            methods.push(self.build_method(method, &generic_params)?);
        }
        let mut properties = Vec::new();
        for index in self.property_ranges.get(&row).cloned().unwrap_or(0..0) {
            let property = self.tables.indirect(t::PROPERTY_PTR, index)?;
            properties.push(self.build_property(property, &ctx)?);
        }
        let mut events = Vec::new();
        for index in self.event_ranges.get(&row).cloned().unwrap_or(0..0) {
            let event = self.tables.indirect(t::EVENT_PTR, index)?;
            events.push(self.build_event(event, &ctx)?);
        }

        let visibility = flags & TYPE_VISIBILITY_MASK;
        Ok(TypeDefinition {
            namespace,
            name,
            full_name,
            is_public: visibility == TYPE_PUBLIC || visibility == TYPE_NESTED_PUBLIC,
            is_interface: flags & TYPE_INTERFACE != 0,
            is_abstract: flags & TYPE_ABSTRACT != 0,
            is_sealed: flags & TYPE_SEALED != 0,
            base_type,
            interfaces,
            generic_params,
            methods,
            fields,
            properties,
            events,
        })
    }

    fn build_field(
        &self,
        row: u32,
        ctx: &GenericContext<'_>,
    ) -> Result<FieldDefinition, LoadError> {
        let r = self.tables.row(t::FIELD, row)?;
        let flags = r.u16(0)?;
        let ty = sig::parse_field_sig(r.blob(2)?)?;
        Ok(FieldDefinition {
            name: r.str(1)?.to_string(),
            visibility: Visibility::from_access(flags),
            is_static: flags & FIELD_STATIC != 0,
            is_literal: flags & FIELD_LITERAL != 0,
            is_init_only: flags & FIELD_INIT_ONLY != 0,
            type_name: self.render(&ty, ctx)?,
            constant: self
                .constants
                .get(&CodedRef {
                    table: t::FIELD,
                    row,
                })
                .cloned(),
        })
    }

    fn build_method(
        &self,
        row: u32,
        type_params: &[String],
    ) -> Result<MethodDefinition, LoadError> {
        let r = self.tables.row(t::METHOD_DEF, row)?;
        let flags = r.u16(2)?;
        let signature = sig::parse_method_sig(r.blob(4)?)?;
        let mut generic_params = self.generic_names(CodedRef {
            table: t::METHOD_DEF,
            row,
        });
        if generic_params.is_empty() {
            generic_params = (0..signature.generic_count)
                .map(|i| format!("!!{i}"))
                .collect();
        }
        let ctx = GenericContext {
            type_params,
            method_params: &generic_params,
        };

        // Param rows are keyed by sequence; 0 describes the return value.
        let mut param_rows = HashMap::new();
        for index in self.tables.list_range(t::METHOD_DEF, row, 5, t::PARAM)? {
            let param = self.tables.indirect(t::PARAM_PTR, index)?;
            let p = self.tables.row(t::PARAM, param)?;
            let sequence = p.u16(1)?;
            if sequence > 0 {
                param_rows.insert(sequence, (param, p.u16(0)?, p.str(2)?));
            }
        }

        let mut parameters = Vec::with_capacity(signature.params.len());
        for (position, ty) in signature.params.iter().enumerate() {
            let (param_row, param_flags, name) = param_rows
                .get(&((position + 1) as u16))
                .copied()
                .unwrap_or((0, 0, ""));
            let (ty, by_ref) = match ty {
                TypeSig::ByRef(inner) => (inner.as_ref(), true),
                other => (other, false),
            };
            let pass_mode = match (by_ref, param_flags & PARAM_IN != 0, param_flags & PARAM_OUT != 0) {
                (false, _, _) => PassMode::Value,
                (true, false, true) => PassMode::Out,
                (true, true, _) => PassMode::In,
                (true, false, false) => PassMode::Ref,
            };
            let is_optional = param_flags & PARAM_OPTIONAL != 0;
            let default_value = if is_optional && param_row > 0 {
                self.constants
                    .get(&CodedRef {
                        table: t::PARAM,
                        row: param_row,
                    })
                    .cloned()
            } else {
                None
            };
            parameters.push(ParameterDefinition {
                name: non_empty(name),
                type_name: self.render(ty, &ctx)?,
                position: position as u32,
                is_optional,
                default_value,
                pass_mode,
            });
        }

        Ok(MethodDefinition {
            name: r.str(3)?.to_string(),
            visibility: Visibility::from_access(flags),
            is_static: flags & METHOD_STATIC != 0,
            is_virtual: flags & METHOD_VIRTUAL != 0,
            is_abstract: flags & METHOD_ABSTRACT != 0,
            is_final: flags & METHOD_FINAL != 0,
            is_new_slot: flags & METHOD_NEW_SLOT != 0,
            is_special_name: flags & METHOD_SPECIAL_NAME != 0,
            is_accessor: self.accessors.contains(&row),
            return_type: self.render(&signature.ret, &ctx)?,
            generic_params,
            parameters,
        })
    }

    fn accessor(&self, method: u32) -> Result<AccessorInfo, LoadError> {
        let flags = self.tables.row(t::METHOD_DEF, method)?.u16(2)?;
        Ok(AccessorInfo {
            visibility: Visibility::from_access(flags),
            is_static: flags & METHOD_STATIC != 0,
            is_virtual: flags & METHOD_VIRTUAL != 0,
            is_abstract: flags & METHOD_ABSTRACT != 0,
            is_final: flags & METHOD_FINAL != 0,
            is_new_slot: flags & METHOD_NEW_SLOT != 0,
        })
    }

    /// Accessors bound to `owner` whose semantics include `flag`.
    fn bound_accessor(&self, owner: CodedRef, flag: u16) -> Result<Option<AccessorInfo>, LoadError> {
        self.semantics
            .get(&owner)
            .into_iter()
            .flatten()
            .find(|(semantics, _)| semantics & flag != 0)
            .map(|(_, method)| self.accessor(*method))
            .transpose()
    }

    fn build_property(
        &self,
        row: u32,
        ctx: &GenericContext<'_>,
    ) -> Result<PropertyDefinition, LoadError> {
        let r = self.tables.row(t::PROPERTY, row)?;
        let ty = sig::parse_property_sig(r.blob(2)?)?;
        let owner = CodedRef {
            table: t::PROPERTY,
            row,
        };
        Ok(PropertyDefinition {
            name: r.str(1)?.to_string(),
            type_name: self.render(&ty, ctx)?,
            getter: self.bound_accessor(owner, SEMANTICS_GETTER)?,
            setter: self.bound_accessor(owner, SEMANTICS_SETTER)?,
        })
    }

    fn build_event(
        &self,
        row: u32,
        ctx: &GenericContext<'_>,
    ) -> Result<EventDefinition, LoadError> {
        let r = self.tables.row(t::EVENT, row)?;
        let handler = r.coded(2)?;
        let handler_type = if handler.is_null() {
            String::new()
        } else {
            self.render_coded(handler, ctx)?
        };
        let owner = CodedRef {
            table: t::EVENT,
            row,
        };
        Ok(EventDefinition {
            name: r.str(1)?.to_string(),
            handler_type,
            add: self.bound_accessor(owner, SEMANTICS_ADD_ON)?,
            remove: self.bound_accessor(owner, SEMANTICS_REMOVE_ON)?,
        })
    }
}

/// Looks reference targets up in the dependency set. Each dependency is
/// decoded at most once per pass, and only its type names are kept.
struct Resolver<'d> {
    deps: &'d DependencySet,
    loaded: HashMap<String, Option<HashSet<String>>>,
}

impl<'d> Resolver<'d> {
    fn new(deps: &'d DependencySet) -> Self {
        Self {
            deps,
            loaded: HashMap::new(),
        }
    }

    fn check(&mut self, assembly: &str, full_name: &str) -> Option<GapReason> {
        let deps = self.deps;
        let names = self
            .loaded
            .entry(assembly.to_ascii_lowercase())
            .or_insert_with(|| {
                let path = deps.find(assembly)?;
                match type_names_in(path) {
                    Ok(names) => Some(names),
                    Err(err) => {
                        log::debug!("skipping dependency {}: {err}", path.display());
                        None
                    }
                }
            });
        match names {
            Some(names) if names.contains(full_name) => None,
            Some(_) => Some(GapReason::TypeNotFound),
            None => Some(GapReason::AssemblyNotFound),
        }
    }
}

/// Every type name a dependency defines or forwards.
fn type_names_in(path: &Path) -> Result<HashSet<String>, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let md = Metadata::parse(&bytes)?;
    let tables = &md.tables;
    let enclosing = enclosing_map(tables)?;

    let mut names = HashSet::new();
    for row in 1..=tables.row_count(t::TYPE_DEF) {
        let (namespace, name) = typedef_names(tables, &enclosing, row)?;
        names.insert(join_full_name(&namespace, &name));
    }
    for row in 1..=tables.row_count(t::EXPORTED_TYPE) {
        let r = tables.row(t::EXPORTED_TYPE, row)?;
        names.insert(join_full_name(r.str(3)?, r.str(2)?));
    }
    Ok(names)
}

fn enclosing_map(tables: &Tables<'_>) -> Result<HashMap<u32, u32>, LoadError> {
    (1..=tables.row_count(t::NESTED_CLASS))
        .map(|row| {
            let r = tables.row(t::NESTED_CLASS, row)?;
            Ok((r.index(0)?, r.index(1)?))
        })
        .collect()
}

/// Map each owner row of a PropertyMap/EventMap table to its child range.
fn owner_ranges(
    tables: &Tables<'_>,
    map_table: usize,
    child_table: usize,
) -> Result<HashMap<u32, Range<u32>>, LoadError> {
    (1..=tables.row_count(map_table))
        .map(|row| {
            let parent = tables.row(map_table, row)?.index(0)?;
            Ok((parent, tables.list_range(map_table, row, 1, child_table)?))
        })
        .collect()
}

/// Namespace and nesting-qualified name of a TypeDef row.
fn typedef_names(
    tables: &Tables<'_>,
    enclosing: &HashMap<u32, u32>,
    row: u32,
) -> Result<(String, String), LoadError> {
    let mut chain = Vec::new();
    let mut current = row;
    for _ in 0..MAX_NESTING {
        let r = tables.row(t::TYPE_DEF, current)?;
        chain.push(r.str(1)?);
        match enclosing.get(&current) {
            Some(outer) => current = *outer,
            None => {
                chain.reverse();
                return Ok((r.str(2)?.to_string(), chain.join("+")));
            }
        }
    }
    Err(LoadError::InvalidIndex {
        table: "NestedClass",
        index: row,
    })
}

fn typeref_names(tables: &Tables<'_>, row: u32) -> Result<NamedType, LoadError> {
    let mut chain = Vec::new();
    let mut current = row;
    for _ in 0..MAX_NESTING {
        let r = tables.row(t::TYPE_REF, current)?;
        chain.push(r.str(1)?);
        let scope = r.coded(0)?;
        if scope.table == t::TYPE_REF && !scope.is_null() {
            current = scope.row;
            continue;
        }
        let assembly = if scope.table == t::ASSEMBLY_REF && !scope.is_null() {
            Some(tables.row(t::ASSEMBLY_REF, scope.row)?.str(6)?.to_string())
        } else {
            None
        };
        chain.reverse();
        return Ok(NamedType {
            namespace: r.str(2)?.to_string(),
            name: chain.join("+"),
            assembly,
        });
    }
    Err(LoadError::InvalidIndex {
        table: "TypeRef",
        index: row,
    })
}

fn join_full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

fn strip_arity(name: &str) -> &str {
    name.split_once('`').map_or(name, |(base, _)| base)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn primitive_keyword(element: u8) -> &'static str {
    match element {
        sig::ELEMENT_VOID => "void",
        sig::ELEMENT_BOOLEAN => "bool",
        sig::ELEMENT_CHAR => "char",
        sig::ELEMENT_I1 => "sbyte",
        sig::ELEMENT_U1 => "byte",
        sig::ELEMENT_I2 => "short",
        sig::ELEMENT_U2 => "ushort",
        sig::ELEMENT_I4 => "int",
        sig::ELEMENT_U4 => "uint",
        sig::ELEMENT_I8 => "long",
        sig::ELEMENT_U8 => "ulong",
        sig::ELEMENT_R4 => "float",
        sig::ELEMENT_R8 => "double",
        sig::ELEMENT_STRING => "string",
        sig::ELEMENT_TYPEDBYREF => "TypedReference",
        sig::ELEMENT_I => "nint",
        sig::ELEMENT_U => "nuint",
        sig::ELEMENT_OBJECT => "object",
        _ => "?",
    }
}

fn system_keyword(name: &str) -> Option<&'static str> {
    Some(match name {
        "Void" => "void",
        "Boolean" => "bool",
        "Char" => "char",
        "SByte" => "sbyte",
        "Byte" => "byte",
        "Int16" => "short",
        "UInt16" => "ushort",
        "Int32" => "int",
        "UInt32" => "uint",
        "Int64" => "long",
        "UInt64" => "ulong",
        "Single" => "float",
        "Double" => "double",
        "Decimal" => "decimal",
        "String" => "string",
        "Object" => "object",
        _ => return None,
    })
}

fn fixed<const N: usize>(blob: &[u8]) -> Option<[u8; N]> {
    blob.get(..N)?.try_into().ok()
}

/// Render a Constant table value the way it would appear in source.
fn format_constant(element: u8, blob: &[u8]) -> Option<String> {
    Some(match element {
        sig::ELEMENT_BOOLEAN => (*blob.first()? != 0).to_string(),
        sig::ELEMENT_CHAR => {
            let c = char::from_u32(u16::from_le_bytes(fixed(blob)?) as u32)?;
            format!("'{c}'")
        }
        sig::ELEMENT_I1 => i8::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_U1 => u8::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_I2 => i16::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_U2 => u16::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_I4 => i32::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_U4 => u32::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_I8 => i64::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_U8 => u64::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_R4 => f32::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_R8 => f64::from_le_bytes(fixed(blob)?).to_string(),
        sig::ELEMENT_STRING => {
            let units: Vec<u16> = blob
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            format!("\"{}\"", String::from_utf16_lossy(&units))
        }
        sig::ELEMENT_CLASS => "null".to_string(),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AssemblyBuilder, ConstValue, Sig};

    fn no_deps() -> DependencySet {
        DependencySet::default()
    }

    fn load(bytes: &[u8]) -> ModuleView {
        load_bytes(bytes, &no_deps(), &LoaderOptions::default()).unwrap()
    }

    #[test]
    fn constants_render_as_source_literals() {
        assert_eq!(format_constant(sig::ELEMENT_I4, &[0xff, 0xff, 0xff, 0xff]).unwrap(), "-1");
        assert_eq!(format_constant(sig::ELEMENT_BOOLEAN, &[1]).unwrap(), "true");
        assert_eq!(format_constant(sig::ELEMENT_CHAR, &[0x41, 0x00]).unwrap(), "'A'");
        assert_eq!(
            format_constant(sig::ELEMENT_STRING, &[0x68, 0x00, 0x69, 0x00]).unwrap(),
            "\"hi\""
        );
        assert_eq!(format_constant(sig::ELEMENT_CLASS, &[0, 0, 0, 0]).unwrap(), "null");
        assert!(format_constant(sig::ELEMENT_I4, &[1, 2]).is_none());
    }

    #[test]
    fn arity_and_nesting_are_hidden_in_display() {
        let named = NamedType {
            namespace: "System.Collections.Generic".into(),
            name: "Dictionary`2+Enumerator".into(),
            assembly: None,
        };
        assert_eq!(named.display(), "Dictionary.Enumerator");
        assert_eq!(
            named.full_name(),
            "System.Collections.Generic.Dictionary`2+Enumerator"
        );
    }

    #[test]
    fn reads_identity_and_platform() {
        let bytes = AssemblyBuilder::new("Sample", (1, 2, 3, 4)).build();
        let view = load(&bytes);
        assert_eq!(view.identity.name, "Sample");
        assert_eq!(view.identity.version.to_string(), "1.2.3.4");
        assert_eq!(view.platform, "AnyCPU");
        assert_eq!(view.runtime_version, "v4.0.30319");
        assert!(view.types.is_empty());
    }

    #[test]
    fn load_module_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Sample.dll");
        crate::test_support::sample_module().save(&path);

        let view = load_module(&path, &no_deps(), &LoaderOptions::default()).unwrap();
        assert_eq!(view.identity.name, "Sample");
        let names: Vec<&str> = view.types.iter().map(|t| t.full_name.as_str()).collect();
        assert!(names.contains(&"Sample.Widget"));
        assert!(names.contains(&"Sample.Color"));
    }

    #[test]
    fn load_module_reports_missing_file_as_io() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Missing.dll");

        match load_module(&path, &no_deps(), &LoaderOptions::default()) {
            Err(LoadError::Io { path: reported, source }) => {
                assert_eq!(reported, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[test]
    fn only_exported_types_are_returned() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        let object = b.type_ref("System.Runtime", "System", "Object");
        let outer = b.add_type("Lib", "Outer", 0x0010_0001, Some(object));
        let inner = b.add_type("", "Inner", 0x0010_0002, Some(object));
        b.nest(inner, outer);
        let hidden = b.add_type("", "Hidden", 0x0010_0003, Some(object));
        b.nest(hidden, outer);
        b.add_type("Lib", "Internal", 0x0010_0000, Some(object));
        let view = load(&b.build());

        let names: Vec<_> = view.types.iter().map(|t| t.full_name.as_str()).collect();
        assert_eq!(names, vec!["Lib.Outer", "Lib.Outer+Inner"]);
        assert_eq!(view.types[1].namespace, "Lib");
        assert_eq!(view.types[1].name, "Outer+Inner");
    }

    #[test]
    fn method_signatures_render_in_surface_syntax() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        let object = b.type_ref("System.Runtime", "System", "Object");
        let list = b.type_ref("System.Runtime", "System.Collections.Generic", "List`1");
        let ty = b.add_type("Lib", "Box`1", 0x0010_0001, Some(object));
        b.generic_param(ty, 0, "T");
        let m = b.method(
            ty,
            "Fill",
            0x0086,
            Sig::Void,
            vec![
                ("items", Sig::GenericInst(list, vec![Sig::I4])),
                ("seed", Sig::Var(0)),
                ("result", Sig::ByRef(Box::new(Sig::String))),
                ("buffer", Sig::SzArray(Box::new(Sig::U1))),
            ],
        );
        b.param_flags(m, 3, 0x0002);
        let view = load(&b.build());

        let method = &view.types[0].methods[0];
        assert_eq!(view.types[0].generic_params, vec!["T"]);
        assert_eq!(method.return_type, "void");
        let rendered: Vec<_> = method
            .parameters
            .iter()
            .map(|p| (p.name.as_deref().unwrap_or(""), p.type_name.as_str(), p.pass_mode))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("items", "List<int>", PassMode::Value),
                ("seed", "T", PassMode::Value),
                ("result", "string", PassMode::Out),
                ("buffer", "byte[]", PassMode::Value),
            ]
        );
    }

    #[test]
    fn optional_parameter_carries_default() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        let object = b.type_ref("System.Runtime", "System", "Object");
        let ty = b.add_type("Lib", "Api", 0x0010_0001, Some(object));
        let m = b.method(ty, "Run", 0x0096, Sig::Void, vec![("retries", Sig::I4)]);
        b.param_flags(m, 1, 0x1010);
        b.param_constant(m, 1, ConstValue::I4(3));
        let view = load(&b.build());

        let p = &view.types[0].methods[0].parameters[0];
        assert!(p.is_optional);
        assert_eq!(p.default_value.as_deref(), Some("3"));
    }

    #[test]
    fn properties_bind_accessors() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        let object = b.type_ref("System.Runtime", "System", "Object");
        let ty = b.add_type("Lib", "Widget", 0x0010_0001, Some(object));
        b.property(ty, "Size", Sig::I4, true, false);
        let view = load(&b.build());

        let widget = &view.types[0];
        assert_eq!(widget.properties.len(), 1);
        let size = &widget.properties[0];
        assert_eq!(size.type_name, "int");
        assert!(size.getter.is_some());
        assert!(size.setter.is_none());
        assert!(widget.methods.iter().any(|m| m.name == "get_Size" && m.is_accessor));
    }

    #[test]
    fn unmatched_references_become_gaps() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        let object = b.type_ref("System.Runtime", "System", "Object");
        b.add_type("Lib", "Widget", 0x0010_0001, Some(object));
        let view = load(&b.build());

        assert_eq!(view.gaps.len(), 1);
        assert_eq!(view.gaps[0].reference, "System.Object");
        assert_eq!(view.gaps[0].reason, GapReason::AssemblyNotFound);
        assert_eq!(
            view.types[0].base_type.as_ref().map(|b| b.display.as_str()),
            Some("object")
        );
    }

    #[test]
    fn strict_mode_rejects_missing_dependencies() {
        let mut b = AssemblyBuilder::new("Lib", (1, 0, 0, 0));
        b.type_ref("Missing.Assembly", "Missing", "Thing");
        let options = LoaderOptions {
            strict_dependencies: true,
        };
        let err = load_bytes(&b.build(), &no_deps(), &options).unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedDependency(name) if name.starts_with("Missing.Assembly")));
    }

    #[test]
    fn non_managed_image_is_rejected() {
        let mut bytes = AssemblyBuilder::new("Lib", (1, 0, 0, 0)).build();
        AssemblyBuilder::clear_cli_directory(&mut bytes);
        assert!(matches!(
            load_bytes(&bytes, &no_deps(), &LoaderOptions::default()),
            Err(LoadError::NotManaged)
        ));
    }

    #[test]
    fn corrupt_metadata_root_is_rejected() {
        let mut bytes = AssemblyBuilder::new("Lib", (1, 0, 0, 0)).build();
        AssemblyBuilder::corrupt_metadata_signature(&mut bytes);
        assert!(matches!(
            load_bytes(&bytes, &no_deps(), &LoaderOptions::default()),
            Err(LoadError::InvalidMetadataSignature(_))
        ));
    }

    #[test]
    fn truncated_image_is_an_error() {
        let bytes = AssemblyBuilder::new("Lib", (1, 0, 0, 0)).build();
        assert!(load_bytes(&bytes[..0x250], &no_deps(), &LoaderOptions::default()).is_err());
    }
}
