//! Writes small, well-formed CLI modules for tests.
//!
//! The builder emits a PE32 image with one `.text` section holding the CLI
//! header and a metadata root. Heaps stay narrow (2-byte indexes), which is
//! plenty for fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::metadata::tables::{self as t, CodedIndex, CodedRef, Layout, SCHEMAS, TABLE_COUNT};

const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER: usize = PE_OFFSET + 24;
const OPTIONAL_HEADER_SIZE: usize = 224;
const CLI_DIRECTORY: usize = OPTIONAL_HEADER + 96 + 14 * 8;
const SECTION_RAW: usize = 0x200;
const SECTION_RVA: u32 = 0x2000;
const CLI_HEADER_SIZE: usize = 72;
const METADATA_OFFSET: usize = SECTION_RAW + CLI_HEADER_SIZE;
const RUNTIME_VERSION: &[u8] = b"v4.0.30319\0\0";
const FRAMEWORK_TOKEN: [u8; 8] = [0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a];

pub(crate) const TYPE_PUBLIC_CLASS: u32 = 0x0010_0001;
pub(crate) const TYPE_PUBLIC_SEALED: u32 = 0x0000_0101;
pub(crate) const TYPE_PUBLIC_INTERFACE: u32 = 0x0000_00a1;
pub(crate) const TYPE_PUBLIC_STATIC: u32 = 0x0010_0181;
pub(crate) const TYPE_PUBLIC_ABSTRACT: u32 = 0x0010_0081;
pub(crate) const METHOD_PUBLIC: u16 = 0x0086;
pub(crate) const METHOD_PUBLIC_CTOR: u16 = 0x1886;
pub(crate) const METHOD_PUBLIC_VIRTUAL: u16 = 0x01c6;
pub(crate) const METHOD_PUBLIC_OVERRIDE: u16 = 0x00c6;
pub(crate) const METHOD_PUBLIC_ABSTRACT: u16 = 0x05c6;
pub(crate) const METHOD_PUBLIC_STATIC: u16 = 0x0096;
pub(crate) const METHOD_PRIVATE: u16 = 0x0081;
pub(crate) const FIELD_PUBLIC: u16 = 0x0006;
const FIELD_ENUM_LITERAL: u16 = 0x8056;
const FIELD_ENUM_VALUE: u16 = 0x0606;
const ACCESSOR: u16 = 0x0886;

/// Signature element as written into a blob.
#[derive(Debug, Clone)]
pub(crate) enum Sig {
    Void,
    Bool,
    I4,
    U1,
    String,
    Object,
    Class(CodedRef),
    ValueType(CodedRef),
    GenericInst(CodedRef, Vec<Sig>),
    Var(u32),
    MVar(u32),
    ByRef(Box<Sig>),
    SzArray(Box<Sig>),
}

impl Sig {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Sig::Void => out.push(0x01),
            Sig::Bool => out.push(0x02),
            Sig::U1 => out.push(0x05),
            Sig::I4 => out.push(0x08),
            Sig::String => out.push(0x0e),
            Sig::Object => out.push(0x1c),
            Sig::Class(r) => {
                out.push(0x12);
                type_def_or_ref(out, *r);
            }
            Sig::ValueType(r) => {
                out.push(0x11);
                type_def_or_ref(out, *r);
            }
            Sig::GenericInst(definition, args) => {
                out.push(0x15);
                out.push(0x12);
                type_def_or_ref(out, *definition);
                write_compressed(out, args.len() as u32);
                for arg in args {
                    arg.encode(out);
                }
            }
            Sig::Var(n) => {
                out.push(0x13);
                write_compressed(out, *n);
            }
            Sig::MVar(n) => {
                out.push(0x1e);
                write_compressed(out, *n);
            }
            Sig::ByRef(inner) => {
                out.push(0x10);
                inner.encode(out);
            }
            Sig::SzArray(inner) => {
                out.push(0x1d);
                inner.encode(out);
            }
        }
    }
}

/// Constant table value.
#[derive(Debug, Clone)]
pub(crate) enum ConstValue {
    I4(i32),
    Bool(bool),
    String(String),
    Null,
}

impl ConstValue {
    fn encode(&self) -> (u8, Vec<u8>) {
        match self {
            ConstValue::I4(v) => (0x08, v.to_le_bytes().to_vec()),
            ConstValue::Bool(v) => (0x02, vec![u8::from(*v)]),
            ConstValue::String(s) => (0x0e, s.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            ConstValue::Null => (0x12, vec![0; 4]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodHandle(usize);

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldHandle(usize);

struct TypeDraft {
    namespace: String,
    name: String,
    flags: u32,
    extends: Option<CodedRef>,
}

struct TypeRefDraft {
    assembly: u32,
    namespace: String,
    name: String,
}

struct ParamDraft {
    name: String,
    sig: Sig,
    flags: u16,
}

struct MethodDraft {
    owner: u32,
    name: String,
    flags: u16,
    ret: Sig,
    params: Vec<ParamDraft>,
}

struct FieldDraft {
    owner: u32,
    name: String,
    flags: u16,
    sig: Sig,
}

struct PropertyDraft {
    owner: u32,
    name: String,
    sig: Sig,
    accessors: Vec<(u16, MethodHandle)>,
}

struct EventDraft {
    owner: u32,
    name: String,
    handler: CodedRef,
    accessors: Vec<(u16, MethodHandle)>,
}

enum ConstTarget {
    Field(FieldHandle),
    Param(MethodHandle, u16),
}

pub struct AssemblyBuilder {
    name: String,
    version: (u16, u16, u16, u16),
    assembly_refs: Vec<String>,
    type_refs: Vec<TypeRefDraft>,
    types: Vec<TypeDraft>,
    nested: Vec<(u32, u32)>,
    generic_params: Vec<(u32, u16, String)>,
    type_specs: Vec<Sig>,
    interface_impls: Vec<(u32, CodedRef)>,
    methods: Vec<MethodDraft>,
    fields: Vec<FieldDraft>,
    properties: Vec<PropertyDraft>,
    events: Vec<EventDraft>,
    constants: Vec<(ConstTarget, ConstValue)>,
}

impl AssemblyBuilder {
    pub(crate) fn new(name: &str, version: (u16, u16, u16, u16)) -> Self {
        Self {
            name: name.to_string(),
            version,
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            types: vec![TypeDraft {
                namespace: String::new(),
                name: "<Module>".into(),
                flags: 0,
                extends: None,
            }],
            nested: Vec::new(),
            generic_params: Vec::new(),
            type_specs: Vec::new(),
            interface_impls: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Coded reference to a TypeDef row of this module.
    pub(crate) fn type_def(row: u32) -> CodedRef {
        CodedRef {
            table: t::TYPE_DEF,
            row,
        }
    }

    /// Reference a type in another assembly; the AssemblyRef is added on first use.
    pub(crate) fn type_ref(&mut self, assembly: &str, namespace: &str, name: &str) -> CodedRef {
        let assembly_row = match self.assembly_refs.iter().position(|a| a == assembly) {
            Some(index) => index as u32 + 1,
            None => {
                self.assembly_refs.push(assembly.to_string());
                self.assembly_refs.len() as u32
            }
        };
        let existing = self.type_refs.iter().position(|r| {
            r.assembly == assembly_row && r.namespace == namespace && r.name == name
        });
        let row = match existing {
            Some(index) => index as u32 + 1,
            None => {
                self.type_refs.push(TypeRefDraft {
                    assembly: assembly_row,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
                self.type_refs.len() as u32
            }
        };
        CodedRef {
            table: t::TYPE_REF,
            row,
        }
    }

    /// Add a TypeDef and return its row. Row 1 is always `<Module>`.
    pub(crate) fn add_type(
        &mut self,
        namespace: &str,
        name: &str,
        flags: u32,
        extends: Option<CodedRef>,
    ) -> u32 {
        self.types.push(TypeDraft {
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags,
            extends,
        });
        self.types.len() as u32
    }

    pub(crate) fn nest(&mut self, inner: u32, outer: u32) {
        self.nested.push((inner, outer));
    }

    pub(crate) fn generic_param(&mut self, owner: u32, number: u16, name: &str) {
        self.generic_params.push((owner, number, name.to_string()));
    }

    /// A TypeSpec instantiating `definition`, usable as a base or interface.
    pub(crate) fn generic_instance(&mut self, definition: CodedRef, args: Vec<Sig>) -> CodedRef {
        self.type_specs.push(Sig::GenericInst(definition, args));
        CodedRef {
            table: t::TYPE_SPEC,
            row: self.type_specs.len() as u32,
        }
    }

    pub(crate) fn implements(&mut self, ty: u32, interface: CodedRef) {
        self.interface_impls.push((ty, interface));
    }

    pub(crate) fn method(
        &mut self,
        ty: u32,
        name: &str,
        flags: u16,
        ret: Sig,
        params: Vec<(&str, Sig)>,
    ) -> MethodHandle {
        self.methods.push(MethodDraft {
            owner: ty,
            name: name.to_string(),
            flags,
            ret,
            params: params
                .into_iter()
                .map(|(name, sig)| ParamDraft {
                    name: name.to_string(),
                    sig,
                    flags: 0,
                })
                .collect(),
        });
        MethodHandle(self.methods.len() - 1)
    }

    /// Set Param flags for the 1-based `sequence` of `method`.
    pub(crate) fn param_flags(&mut self, method: MethodHandle, sequence: u16, flags: u16) {
        self.methods[method.0].params[sequence as usize - 1].flags = flags;
    }

    pub(crate) fn param_constant(&mut self, method: MethodHandle, sequence: u16, value: ConstValue) {
        self.constants
            .push((ConstTarget::Param(method, sequence), value));
    }

    pub(crate) fn field(&mut self, ty: u32, name: &str, flags: u16, sig: Sig) -> FieldHandle {
        self.fields.push(FieldDraft {
            owner: ty,
            name: name.to_string(),
            flags,
            sig,
        });
        FieldHandle(self.fields.len() - 1)
    }

    pub(crate) fn field_constant(&mut self, field: FieldHandle, value: ConstValue) {
        self.constants.push((ConstTarget::Field(field), value));
    }

    /// An enum type deriving from `System.Enum` with its `value__` backing field.
    pub(crate) fn add_enum(&mut self, namespace: &str, name: &str) -> u32 {
        let base = self.type_ref("System.Runtime", "System", "Enum");
        let row = self.add_type(namespace, name, TYPE_PUBLIC_SEALED, Some(base));
        self.field(row, "value__", FIELD_ENUM_VALUE, Sig::I4);
        row
    }

    pub(crate) fn enum_literal(&mut self, ty: u32, name: &str, value: i32) {
        let field = self.field(ty, name, FIELD_ENUM_LITERAL, Sig::ValueType(Self::type_def(ty)));
        self.field_constant(field, ConstValue::I4(value));
    }

    /// A property with `get_`/`set_` accessors bound through MethodSemantics.
    pub(crate) fn property(&mut self, ty: u32, name: &str, sig: Sig, getter: bool, setter: bool) {
        let mut accessors = Vec::new();
        if getter {
            let m = self.method(ty, &format!("get_{name}"), ACCESSOR, sig.clone(), vec![]);
            accessors.push((0x0002, m));
        }
        if setter {
            let m = self.method(
                ty,
                &format!("set_{name}"),
                ACCESSOR,
                Sig::Void,
                vec![("value", sig.clone())],
            );
            accessors.push((0x0001, m));
        }
        self.properties.push(PropertyDraft {
            owner: ty,
            name: name.to_string(),
            sig,
            accessors,
        });
    }

    pub(crate) fn event(&mut self, ty: u32, name: &str, handler: CodedRef) {
        let add = self.method(
            ty,
            &format!("add_{name}"),
            ACCESSOR,
            Sig::Void,
            vec![("value", Sig::Class(handler))],
        );
        let remove = self.method(
            ty,
            &format!("remove_{name}"),
            ACCESSOR,
            Sig::Void,
            vec![("value", Sig::Class(handler))],
        );
        self.events.push(EventDraft {
            owner: ty,
            name: name.to_string(),
            handler,
            accessors: vec![(0x0008, add), (0x0010, remove)],
        });
    }

    pub fn build(&self) -> Vec<u8> {
        pe_image(&self.metadata())
    }

    pub fn save(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, self.build()).unwrap();
    }

    /// Zero the CLI header data directory so the image reads as native.
    pub(crate) fn clear_cli_directory(bytes: &mut [u8]) {
        bytes[CLI_DIRECTORY..CLI_DIRECTORY + 8].fill(0);
    }

    pub(crate) fn corrupt_metadata_signature(bytes: &mut [u8]) {
        bytes[METADATA_OFFSET..METADATA_OFFSET + 4].copy_from_slice(b"XXXX");
    }

    fn metadata(&self) -> Vec<u8> {
        let mut heaps = Heaps::new();
        let mut rows: Vec<Vec<Vec<u32>>> = vec![Vec::new(); TABLE_COUNT];

        let module_name = heaps.string(&format!("{}.dll", self.name));
        rows[t::MODULE].push(vec![0, module_name, 1, 0, 0]);

        for r in &self.type_refs {
            rows[t::TYPE_REF].push(vec![
                CodedIndex::ResolutionScope.encode(t::ASSEMBLY_REF, r.assembly),
                heaps.string(&r.name),
                heaps.string(&r.namespace),
            ]);
        }

        let field_order = order_by_owner(self.fields.iter().map(|f| f.owner));
        let method_order = order_by_owner(self.methods.iter().map(|m| m.owner));

        let mut field_cursor = 1;
        let mut method_cursor = 1;
        for (index, ty) in self.types.iter().enumerate() {
            let row = index as u32 + 1;
            let extends = ty
                .extends
                .map_or(0, |r| CodedIndex::TypeDefOrRef.encode(r.table, r.row));
            rows[t::TYPE_DEF].push(vec![
                ty.flags,
                heaps.string(&ty.name),
                heaps.string(&ty.namespace),
                extends,
                field_cursor,
                method_cursor,
            ]);
            field_cursor += self.fields.iter().filter(|f| f.owner == row).count() as u32;
            method_cursor += self.methods.iter().filter(|m| m.owner == row).count() as u32;
        }

        let mut field_rows = vec![0u32; self.fields.len()];
        for (position, index) in field_order.iter().enumerate() {
            let f = &self.fields[*index];
            field_rows[*index] = position as u32 + 1;
            let mut sig = vec![0x06];
            f.sig.encode(&mut sig);
            rows[t::FIELD].push(vec![u32::from(f.flags), heaps.string(&f.name), heaps.blob(&sig)]);
        }

        let mut method_rows = vec![0u32; self.methods.len()];
        let mut param_rows = HashMap::new();
        let mut param_cursor = 1;
        for (position, index) in method_order.iter().enumerate() {
            let m = &self.methods[*index];
            method_rows[*index] = position as u32 + 1;
            let mut sig = vec![if m.flags & 0x0010 == 0 { 0x20 } else { 0x00 }];
            write_compressed(&mut sig, m.params.len() as u32);
            m.ret.encode(&mut sig);
            for p in &m.params {
                p.sig.encode(&mut sig);
            }
            rows[t::METHOD_DEF].push(vec![
                0,
                0,
                u32::from(m.flags),
                heaps.string(&m.name),
                heaps.blob(&sig),
                param_cursor,
            ]);
            for (i, p) in m.params.iter().enumerate() {
                let sequence = i as u16 + 1;
                rows[t::PARAM].push(vec![
                    u32::from(p.flags),
                    u32::from(sequence),
                    heaps.string(&p.name),
                ]);
                param_rows.insert((*index, sequence), param_cursor);
                param_cursor += 1;
            }
        }

        let mut impls = self.interface_impls.clone();
        impls.sort_by_key(|(ty, _)| *ty);
        for (ty, interface) in impls {
            rows[t::INTERFACE_IMPL].push(vec![
                ty,
                CodedIndex::TypeDefOrRef.encode(interface.table, interface.row),
            ]);
        }

        for (target, value) in &self.constants {
            let parent = match target {
                ConstTarget::Field(f) => CodedIndex::HasConstant.encode(t::FIELD, field_rows[f.0]),
                ConstTarget::Param(m, sequence) => {
                    CodedIndex::HasConstant.encode(t::PARAM, param_rows[&(m.0, *sequence)])
                }
            };
            let (element, blob) = value.encode();
            rows[t::CONSTANT].push(vec![u32::from(element), parent, heaps.blob(&blob)]);
        }

        let mut semantics = Vec::new();
        let mut owner = 0;
        for index in order_by_owner(self.events.iter().map(|e| e.owner)) {
            let e = &self.events[index];
            let row = rows[t::EVENT].len() as u32 + 1;
            if e.owner != owner {
                owner = e.owner;
                rows[t::EVENT_MAP].push(vec![owner, row]);
            }
            rows[t::EVENT].push(vec![
                0,
                heaps.string(&e.name),
                CodedIndex::TypeDefOrRef.encode(e.handler.table, e.handler.row),
            ]);
            for (flags, m) in &e.accessors {
                semantics.push(vec![
                    u32::from(*flags),
                    method_rows[m.0],
                    CodedIndex::HasSemantics.encode(t::EVENT, row),
                ]);
            }
        }

        owner = 0;
        for index in order_by_owner(self.properties.iter().map(|p| p.owner)) {
            let p = &self.properties[index];
            let row = rows[t::PROPERTY].len() as u32 + 1;
            if p.owner != owner {
                owner = p.owner;
                rows[t::PROPERTY_MAP].push(vec![owner, row]);
            }
            let mut sig = vec![0x28, 0x00];
            p.sig.encode(&mut sig);
            rows[t::PROPERTY].push(vec![0, heaps.string(&p.name), heaps.blob(&sig)]);
            for (flags, m) in &p.accessors {
                semantics.push(vec![
                    u32::from(*flags),
                    method_rows[m.0],
                    CodedIndex::HasSemantics.encode(t::PROPERTY, row),
                ]);
            }
        }
        rows[t::METHOD_SEMANTICS] = semantics;

        for spec in &self.type_specs {
            let mut blob = Vec::new();
            spec.encode(&mut blob);
            rows[t::TYPE_SPEC].push(vec![heaps.blob(&blob)]);
        }

        let (major, minor, build, revision) = self.version;
        rows[t::ASSEMBLY].push(vec![
            0x8004,
            u32::from(major),
            u32::from(minor),
            u32::from(build),
            u32::from(revision),
            0,
            0,
            heaps.string(&self.name),
            0,
        ]);
        for name in &self.assembly_refs {
            rows[t::ASSEMBLY_REF].push(vec![
                4,
                0,
                0,
                0,
                0,
                heaps.blob(&FRAMEWORK_TOKEN),
                heaps.string(name),
                0,
                0,
            ]);
        }

        for (inner, outer) in &self.nested {
            rows[t::NESTED_CLASS].push(vec![*inner, *outer]);
        }
        for (owner, number, name) in &self.generic_params {
            rows[t::GENERIC_PARAM].push(vec![
                u32::from(*number),
                0,
                CodedIndex::TypeOrMethodDef.encode(t::TYPE_DEF, *owner),
                heaps.string(name),
            ]);
        }

        let table_stream = table_stream(&rows);
        metadata_root(&[
            ("#~", table_stream),
            ("#Strings", padded(heaps.strings)),
            ("#US", vec![0; 4]),
            ("#GUID", vec![0x11; 16]),
            ("#Blob", padded(heaps.blobs)),
        ])
    }
}

/// The Sample module: enum `Color {Red, Green, Blue}` and class `Widget`
/// with a public constructor and `int GetSize()`.
pub fn sample_module() -> AssemblyBuilder {
    let mut b = AssemblyBuilder::new("Sample", (1, 0, 0, 0));
    let object = b.type_ref("System.Runtime", "System", "Object");
    let color = b.add_enum("Sample", "Color");
    b.enum_literal(color, "Red", 0);
    b.enum_literal(color, "Green", 1);
    b.enum_literal(color, "Blue", 2);
    let widget = b.add_type("Sample", "Widget", TYPE_PUBLIC_CLASS, Some(object));
    b.method(widget, ".ctor", METHOD_PUBLIC_CTOR, Sig::Void, vec![]);
    b.method(widget, "GetSize", METHOD_PUBLIC, Sig::I4, vec![]);
    b
}

/// The Shapes module: `IShape`, abstract `Shape : IShape`, and two
/// subclasses, one of them in a second namespace.
pub fn shapes_module() -> AssemblyBuilder {
    let mut b = AssemblyBuilder::new("Shapes", (2, 0, 0, 0));
    let object = b.type_ref("System.Runtime", "System", "Object");
    let ishape = b.add_type("Shapes", "IShape", TYPE_PUBLIC_INTERFACE, None);
    b.method(ishape, "Area", METHOD_PUBLIC_ABSTRACT, Sig::I4, vec![]);
    let shape = b.add_type("Shapes", "Shape", TYPE_PUBLIC_ABSTRACT, Some(object));
    b.implements(shape, AssemblyBuilder::type_def(ishape));
    b.method(shape, "Area", METHOD_PUBLIC_ABSTRACT, Sig::I4, vec![]);
    let circle = b.add_type(
        "Shapes",
        "Circle",
        TYPE_PUBLIC_CLASS,
        Some(AssemblyBuilder::type_def(shape)),
    );
    b.method(circle, ".ctor", METHOD_PUBLIC_CTOR, Sig::Void, vec![("radius", Sig::I4)]);
    b.method(circle, "Area", METHOD_PUBLIC_OVERRIDE, Sig::I4, vec![]);
    b.property(circle, "Radius", Sig::I4, true, false);
    let square = b.add_type(
        "Shapes.Extra",
        "Square",
        TYPE_PUBLIC_CLASS,
        Some(AssemblyBuilder::type_def(shape)),
    );
    b.method(
        square,
        "Resize",
        METHOD_PUBLIC,
        Sig::Void,
        vec![("side", Sig::I4), ("label", Sig::String)],
    );
    b
}

#[derive(Default)]
struct Heaps {
    strings: Vec<u8>,
    string_index: HashMap<String, u32>,
    blobs: Vec<u8>,
}

impl Heaps {
    fn new() -> Self {
        Self {
            strings: vec![0],
            blobs: vec![0],
            ..Self::default()
        }
    }

    fn string(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(index) = self.string_index.get(s) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        self.string_index.insert(s.to_string(), index);
        index
    }

    fn blob(&mut self, data: &[u8]) -> u32 {
        if data.is_empty() {
            return 0;
        }
        let index = self.blobs.len() as u32;
        write_compressed(&mut self.blobs, data.len() as u32);
        self.blobs.extend_from_slice(data);
        index
    }
}

/// Indices sorted by owner row, keeping insertion order within an owner.
fn order_by_owner(owners: impl Iterator<Item = u32>) -> Vec<usize> {
    let owners: Vec<u32> = owners.collect();
    let mut order: Vec<usize> = (0..owners.len()).collect();
    order.sort_by_key(|i| owners[*i]);
    order
}

fn type_def_or_ref(out: &mut Vec<u8>, r: CodedRef) {
    write_compressed(out, CodedIndex::TypeDefOrRef.encode(r.table, r.row));
}

fn write_compressed(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.extend_from_slice(&(value as u16 | 0x8000).to_be_bytes());
    } else {
        out.extend_from_slice(&(value | 0xc000_0000).to_be_bytes());
    }
}

fn padded(mut data: Vec<u8>) -> Vec<u8> {
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data
}

fn table_stream(rows: &[Vec<Vec<u32>>]) -> Vec<u8> {
    let mut counts = [0u32; TABLE_COUNT];
    for (table, table_rows) in rows.iter().enumerate() {
        counts[table] = table_rows.len() as u32;
    }
    let valid = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .fold(0u64, |mask, (table, _)| mask | 1 << table);
    let layout = Layout::new(0, counts);

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&[2, 0, 0, 1]);
    out.extend_from_slice(&valid.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    for count in counts.iter().filter(|count| **count > 0) {
        out.extend_from_slice(&count.to_le_bytes());
    }
    for (table, table_rows) in rows.iter().enumerate() {
        for row in table_rows {
            assert_eq!(row.len(), SCHEMAS[table].len(), "{}", t::table_name(table));
            for (column, value) in SCHEMAS[table].iter().zip(row) {
                let width = layout.column_width(*column);
                out.extend_from_slice(&value.to_le_bytes()[..width]);
            }
        }
    }
    padded(out)
}

fn metadata_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let padded_name = |name: &str| (name.len() + 1 + 3) & !3;
    let header_len = 16
        + RUNTIME_VERSION.len()
        + 4
        + streams
            .iter()
            .map(|(name, _)| 8 + padded_name(name))
            .sum::<usize>();

    let mut out = Vec::new();
    out.extend_from_slice(&0x424a_5342u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(RUNTIME_VERSION.len() as u32).to_le_bytes());
    out.extend_from_slice(RUNTIME_VERSION);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut offset = header_len;
    for (name, data) in streams {
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let mut label = name.as_bytes().to_vec();
        label.resize(padded_name(name), 0);
        out.extend_from_slice(&label);
        offset += data.len();
    }
    for (_, data) in streams {
        out.extend_from_slice(data);
    }
    out
}

fn pe_image(metadata: &[u8]) -> Vec<u8> {
    let section_len = CLI_HEADER_SIZE + metadata.len();
    let raw_size = (section_len + 0x1ff) & !0x1ff;
    let mut image = vec![0u8; SECTION_RAW + raw_size];

    let mut put = |offset: usize, bytes: &[u8]| {
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(0, b"MZ");
    put(0x3c, &(PE_OFFSET as u32).to_le_bytes());
    put(PE_OFFSET, b"PE\0\0");

    // COFF header: i386, one section, PE32 optional header, DLL
    let coff = PE_OFFSET + 4;
    put(coff, &0x014cu16.to_le_bytes());
    put(coff + 2, &1u16.to_le_bytes());
    put(coff + 16, &(OPTIONAL_HEADER_SIZE as u16).to_le_bytes());
    put(coff + 18, &0x2102u16.to_le_bytes());

    put(OPTIONAL_HEADER, &0x010bu16.to_le_bytes());
    put(OPTIONAL_HEADER + 92, &16u32.to_le_bytes());
    put(CLI_DIRECTORY, &SECTION_RVA.to_le_bytes());
    put(CLI_DIRECTORY + 4, &(CLI_HEADER_SIZE as u32).to_le_bytes());

    let section = OPTIONAL_HEADER + OPTIONAL_HEADER_SIZE;
    put(section, b".text\0\0\0");
    put(section + 8, &(section_len as u32).to_le_bytes());
    put(section + 12, &SECTION_RVA.to_le_bytes());
    put(section + 16, &(raw_size as u32).to_le_bytes());
    put(section + 20, &(SECTION_RAW as u32).to_le_bytes());
    put(section + 36, &0x6000_0020u32.to_le_bytes());

    // CLI header, ILONLY
    put(SECTION_RAW, &(CLI_HEADER_SIZE as u32).to_le_bytes());
    put(SECTION_RAW + 4, &2u16.to_le_bytes());
    put(SECTION_RAW + 6, &5u16.to_le_bytes());
    put(
        SECTION_RAW + 8,
        &(SECTION_RVA + CLI_HEADER_SIZE as u32).to_le_bytes(),
    );
    put(SECTION_RAW + 12, &(metadata.len() as u32).to_le_bytes());
    put(SECTION_RAW + 16, &1u32.to_le_bytes());

    put(METADATA_OFFSET, metadata);
    image
}
