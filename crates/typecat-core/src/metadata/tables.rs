//! The `#~` table stream: row layouts, coded indexes and row access.
//!
//! Column widths depend on row counts and heap-size flags (ECMA-335 II.24.2.6),
//! so the layout is computed once per module and every row read goes through it.

use super::LoadError;
use super::heaps::{BlobHeap, StringHeap};
use super::reader::ByteReader;

pub(crate) const MODULE: usize = 0x00;
pub(crate) const TYPE_REF: usize = 0x01;
pub(crate) const TYPE_DEF: usize = 0x02;
pub(crate) const FIELD_PTR: usize = 0x03;
pub(crate) const FIELD: usize = 0x04;
pub(crate) const METHOD_PTR: usize = 0x05;
pub(crate) const METHOD_DEF: usize = 0x06;
pub(crate) const PARAM_PTR: usize = 0x07;
pub(crate) const PARAM: usize = 0x08;
pub(crate) const INTERFACE_IMPL: usize = 0x09;
pub(crate) const MEMBER_REF: usize = 0x0a;
pub(crate) const CONSTANT: usize = 0x0b;
pub(crate) const DECL_SECURITY: usize = 0x0e;
pub(crate) const STAND_ALONE_SIG: usize = 0x11;
pub(crate) const EVENT_MAP: usize = 0x12;
pub(crate) const EVENT_PTR: usize = 0x13;
pub(crate) const EVENT: usize = 0x14;
pub(crate) const PROPERTY_MAP: usize = 0x15;
pub(crate) const PROPERTY_PTR: usize = 0x16;
pub(crate) const PROPERTY: usize = 0x17;
pub(crate) const METHOD_SEMANTICS: usize = 0x18;
pub(crate) const MODULE_REF: usize = 0x1a;
pub(crate) const TYPE_SPEC: usize = 0x1b;
pub(crate) const ASSEMBLY: usize = 0x20;
pub(crate) const ASSEMBLY_REF: usize = 0x23;
pub(crate) const FILE: usize = 0x26;
pub(crate) const EXPORTED_TYPE: usize = 0x27;
pub(crate) const MANIFEST_RESOURCE: usize = 0x28;
pub(crate) const NESTED_CLASS: usize = 0x29;
pub(crate) const GENERIC_PARAM: usize = 0x2a;
pub(crate) const METHOD_SPEC: usize = 0x2b;
pub(crate) const GENERIC_PARAM_CONSTRAINT: usize = 0x2c;

pub(crate) const TABLE_COUNT: usize = 0x2d;

const HEAP_STRINGS_WIDE: u8 = 0x01;
const HEAP_GUID_WIDE: u8 = 0x02;
const HEAP_BLOB_WIDE: u8 = 0x04;
const HEAP_EXTRA_DATA: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    fn targets(self) -> &'static [Option<usize>] {
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TYPE_DEF), Some(TYPE_REF), Some(TYPE_SPEC)],
            CodedIndex::HasConstant => &[Some(FIELD), Some(PARAM), Some(PROPERTY)],
            CodedIndex::HasCustomAttribute => &[
                Some(METHOD_DEF),
                Some(FIELD),
                Some(TYPE_REF),
                Some(TYPE_DEF),
                Some(PARAM),
                Some(INTERFACE_IMPL),
                Some(MEMBER_REF),
                Some(MODULE),
                Some(DECL_SECURITY),
                Some(PROPERTY),
                Some(EVENT),
                Some(STAND_ALONE_SIG),
                Some(MODULE_REF),
                Some(TYPE_SPEC),
                Some(ASSEMBLY),
                Some(ASSEMBLY_REF),
                Some(FILE),
                Some(EXPORTED_TYPE),
                Some(MANIFEST_RESOURCE),
                Some(GENERIC_PARAM),
                Some(GENERIC_PARAM_CONSTRAINT),
                Some(METHOD_SPEC),
            ],
            CodedIndex::HasFieldMarshal => &[Some(FIELD), Some(PARAM)],
            CodedIndex::HasDeclSecurity => &[Some(TYPE_DEF), Some(METHOD_DEF), Some(ASSEMBLY)],
            CodedIndex::MemberRefParent => &[
                Some(TYPE_DEF),
                Some(TYPE_REF),
                Some(MODULE_REF),
                Some(METHOD_DEF),
                Some(TYPE_SPEC),
            ],
            CodedIndex::HasSemantics => &[Some(EVENT), Some(PROPERTY)],
            CodedIndex::MethodDefOrRef => &[Some(METHOD_DEF), Some(MEMBER_REF)],
            CodedIndex::MemberForwarded => &[Some(FIELD), Some(METHOD_DEF)],
            CodedIndex::Implementation => &[Some(FILE), Some(ASSEMBLY_REF), Some(EXPORTED_TYPE)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(METHOD_DEF), Some(MEMBER_REF), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(MODULE), Some(MODULE_REF), Some(ASSEMBLY_REF), Some(TYPE_REF)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(TYPE_DEF), Some(METHOD_DEF)],
        }
    }

    fn tag_bits(self) -> u32 {
        match self {
            CodedIndex::HasFieldMarshal
            | CodedIndex::HasSemantics
            | CodedIndex::MethodDefOrRef
            | CodedIndex::MemberForwarded
            | CodedIndex::TypeOrMethodDef => 1,
            CodedIndex::TypeDefOrRef
            | CodedIndex::HasConstant
            | CodedIndex::HasDeclSecurity
            | CodedIndex::Implementation
            | CodedIndex::ResolutionScope => 2,
            CodedIndex::MemberRefParent | CodedIndex::CustomAttributeType => 3,
            CodedIndex::HasCustomAttribute => 5,
        }
    }

    /// Split a raw coded value into its target table and 1-based row.
    pub(crate) fn decode(self, value: u32) -> Result<CodedRef, LoadError> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let table = self
            .targets()
            .get(tag)
            .copied()
            .flatten()
            .ok_or(LoadError::InvalidIndex {
                table: "coded index tag",
                index: tag as u32,
            })?;
        Ok(CodedRef {
            table,
            row: value >> bits,
        })
    }

    /// Encode a table/row pair; the inverse of [`CodedIndex::decode`].
    #[cfg(any(test, feature = "fixtures"))]
    pub(crate) fn encode(self, table: usize, row: u32) -> u32 {
        let tag = self
            .targets()
            .iter()
            .position(|t| *t == Some(table))
            .unwrap_or(0) as u32;
        (row << self.tag_bits()) | tag
    }
}

/// A decoded coded index. `row == 0` is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CodedRef {
    pub(crate) table: usize,
    pub(crate) row: u32,
}

impl CodedRef {
    pub(crate) fn is_null(&self) -> bool {
        self.row == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Table(usize),
    Coded(CodedIndex),
}

use CodedIndex as C;
use Column::{Blob, Coded, Guid, Str, Table, U16, U32};

/// Column schema of every table, indexed by table id (ECMA-335 II.22).
pub(crate) const SCHEMAS: [&[Column]; TABLE_COUNT] = [
    /* Module */ &[U16, Str, Guid, Guid, Guid],
    /* TypeRef */ &[Coded(C::ResolutionScope), Str, Str],
    /* TypeDef */ &[U32, Str, Str, Coded(C::TypeDefOrRef), Table(FIELD), Table(METHOD_DEF)],
    /* FieldPtr */ &[Table(FIELD)],
    /* Field */ &[U16, Str, Blob],
    /* MethodPtr */ &[Table(METHOD_DEF)],
    /* MethodDef */ &[U32, U16, U16, Str, Blob, Table(PARAM)],
    /* ParamPtr */ &[Table(PARAM)],
    /* Param */ &[U16, U16, Str],
    /* InterfaceImpl */ &[Table(TYPE_DEF), Coded(C::TypeDefOrRef)],
    /* MemberRef */ &[Coded(C::MemberRefParent), Str, Blob],
    /* Constant: type byte + padding byte read as one U16 */
    &[U16, Coded(C::HasConstant), Blob],
    /* CustomAttribute */ &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob],
    /* FieldMarshal */ &[Coded(C::HasFieldMarshal), Blob],
    /* DeclSecurity */ &[U16, Coded(C::HasDeclSecurity), Blob],
    /* ClassLayout */ &[U16, U32, Table(TYPE_DEF)],
    /* FieldLayout */ &[U32, Table(FIELD)],
    /* StandAloneSig */ &[Blob],
    /* EventMap */ &[Table(TYPE_DEF), Table(EVENT)],
    /* EventPtr */ &[Table(EVENT)],
    /* Event */ &[U16, Str, Coded(C::TypeDefOrRef)],
    /* PropertyMap */ &[Table(TYPE_DEF), Table(PROPERTY)],
    /* PropertyPtr */ &[Table(PROPERTY)],
    /* Property */ &[U16, Str, Blob],
    /* MethodSemantics */ &[U16, Table(METHOD_DEF), Coded(C::HasSemantics)],
    /* MethodImpl */ &[Table(TYPE_DEF), Coded(C::MethodDefOrRef), Coded(C::MethodDefOrRef)],
    /* ModuleRef */ &[Str],
    /* TypeSpec */ &[Blob],
    /* ImplMap */ &[U16, Coded(C::MemberForwarded), Str, Table(MODULE_REF)],
    /* FieldRVA */ &[U32, Table(FIELD)],
    /* EncLog */ &[U32, U32],
    /* EncMap */ &[U32],
    /* Assembly */ &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
    /* AssemblyProcessor */ &[U32],
    /* AssemblyOS */ &[U32, U32, U32],
    /* AssemblyRef */ &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
    /* AssemblyRefProcessor */ &[U32, Table(ASSEMBLY_REF)],
    /* AssemblyRefOS */ &[U32, U32, U32, Table(ASSEMBLY_REF)],
    /* File */ &[U32, Str, Blob],
    /* ExportedType */ &[U32, U32, Str, Str, Coded(C::Implementation)],
    /* ManifestResource */ &[U32, U32, Str, Coded(C::Implementation)],
    /* NestedClass */ &[Table(TYPE_DEF), Table(TYPE_DEF)],
    /* GenericParam */ &[U16, U16, Coded(C::TypeOrMethodDef), Str],
    /* MethodSpec */ &[Coded(C::MethodDefOrRef), Blob],
    /* GenericParamConstraint */ &[Table(GENERIC_PARAM), Coded(C::TypeDefOrRef)],
];

/// Column widths for one module, derived from row counts and heap flags.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    heap_sizes: u8,
    rows: [u32; TABLE_COUNT],
}

impl Layout {
    pub(crate) fn new(heap_sizes: u8, rows: [u32; TABLE_COUNT]) -> Self {
        Self { heap_sizes, rows }
    }

    pub(crate) fn column_width(&self, column: Column) -> usize {
        let heap = |flag: u8| if self.heap_sizes & flag != 0 { 4 } else { 2 };
        match column {
            Column::U16 => 2,
            Column::U32 => 4,
            Column::Str => heap(HEAP_STRINGS_WIDE),
            Column::Guid => heap(HEAP_GUID_WIDE),
            Column::Blob => heap(HEAP_BLOB_WIDE),
            Column::Table(table) => {
                if self.rows[table] < 0x1_0000 {
                    2
                } else {
                    4
                }
            }
            Column::Coded(coded) => {
                let max_rows = coded
                    .targets()
                    .iter()
                    .flatten()
                    .map(|table| self.rows[*table])
                    .max()
                    .unwrap_or(0);
                if max_rows < (1u32 << (16 - coded.tag_bits())) {
                    2
                } else {
                    4
                }
            }
        }
    }

    pub(crate) fn row_width(&self, table: usize) -> usize {
        SCHEMAS[table]
            .iter()
            .map(|column| self.column_width(*column))
            .sum()
    }
}

/// Decoded table stream plus the heaps its rows point into.
pub(crate) struct Tables<'a> {
    data: &'a [u8],
    layout: Layout,
    offsets: [usize; TABLE_COUNT],
    pub(crate) strings: StringHeap<'a>,
    pub(crate) blobs: BlobHeap<'a>,
}

impl<'a> Tables<'a> {
    pub(crate) fn parse(
        stream: &'a [u8],
        strings: StringHeap<'a>,
        blobs: BlobHeap<'a>,
    ) -> Result<Self, LoadError> {
        let mut r = ByteReader::new(stream);
        r.skip(4)?; // reserved
        r.skip(2)?; // major, minor version
        let heap_sizes = r.read_u8()?;
        r.skip(1)?; // reserved
        let valid = r.read_u64()?;
        let _sorted = r.read_u64()?;

        let mut rows = [0u32; TABLE_COUNT];
        for table in 0..64usize {
            if valid & (1u64 << table) == 0 {
                continue;
            }
            if table >= TABLE_COUNT {
                return Err(LoadError::UnsupportedTable(table as u8));
            }
            rows[table] = r.read_u32()?;
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            r.skip(4)?;
        }

        let layout = Layout::new(heap_sizes, rows);
        let mut offsets = [0usize; TABLE_COUNT];
        let mut cursor = r.position();
        for (table, offset) in offsets.iter_mut().enumerate() {
            *offset = cursor;
            cursor += layout.row_width(table) * rows[table] as usize;
        }
        if cursor > stream.len() {
            return Err(LoadError::UnexpectedEof { offset: cursor });
        }

        Ok(Self {
            data: stream,
            layout,
            offsets,
            strings,
            blobs,
        })
    }

    pub(crate) fn row_count(&self, table: usize) -> u32 {
        self.layout.rows[table]
    }

    /// Fetch a 1-based row.
    pub(crate) fn row(&self, table: usize, row: u32) -> Result<Row<'_, 'a>, LoadError> {
        if row == 0 || row > self.row_count(table) {
            return Err(LoadError::InvalidIndex {
                table: table_name(table),
                index: row,
            });
        }
        let width = self.layout.row_width(table);
        Ok(Row {
            tables: self,
            table,
            offset: self.offsets[table] + width * (row as usize - 1),
        })
    }

    /// Follow a `*Ptr` indirection table when the stream uses one.
    pub(crate) fn indirect(&self, ptr_table: usize, index: u32) -> Result<u32, LoadError> {
        if self.row_count(ptr_table) == 0 {
            return Ok(index);
        }
        self.row(ptr_table, index)?.index(0)
    }

    /// Rows `start..end` of a child list owned by row `owner` of `owner_table`,
    /// where `column` holds the first child index and the next owner row ends it.
    pub(crate) fn list_range(
        &self,
        owner_table: usize,
        owner: u32,
        column: usize,
        child_table: usize,
    ) -> Result<std::ops::Range<u32>, LoadError> {
        let listed = match ptr_table_for(child_table) {
            Some(ptr) if self.row_count(ptr) > 0 => ptr,
            _ => child_table,
        };
        let child_limit = self.row_count(listed) + 1;
        let start = self.row(owner_table, owner)?.index(column)?.min(child_limit);
        let end = if owner < self.row_count(owner_table) {
            self.row(owner_table, owner + 1)?.index(column)?.min(child_limit)
        } else {
            child_limit
        };
        Ok(start..end.max(start))
    }
}

/// The indirection table that may stand between an owner and `child_table`.
fn ptr_table_for(child_table: usize) -> Option<usize> {
    match child_table {
        FIELD => Some(FIELD_PTR),
        METHOD_DEF => Some(METHOD_PTR),
        PARAM => Some(PARAM_PTR),
        EVENT => Some(EVENT_PTR),
        PROPERTY => Some(PROPERTY_PTR),
        _ => None,
    }
}

pub(crate) struct Row<'t, 'a> {
    tables: &'t Tables<'a>,
    table: usize,
    offset: usize,
}

impl<'t, 'a> Row<'t, 'a> {
    fn raw(&self, column: usize) -> Result<u32, LoadError> {
        let layout = &self.tables.layout;
        let schema = SCHEMAS[self.table];
        let kind = *schema.get(column).ok_or(LoadError::InvalidIndex {
            table: table_name(self.table),
            index: column as u32,
        })?;
        let skip: usize = schema[..column]
            .iter()
            .map(|c| layout.column_width(*c))
            .sum();
        let mut r = ByteReader::new(self.tables.data);
        r.seek(self.offset + skip)?;
        r.read_index(layout.column_width(kind))
    }

    pub(crate) fn u16(&self, column: usize) -> Result<u16, LoadError> {
        Ok(self.raw(column)? as u16)
    }

    pub(crate) fn u32(&self, column: usize) -> Result<u32, LoadError> {
        self.raw(column)
    }

    /// Simple (non-coded) row index into another table.
    pub(crate) fn index(&self, column: usize) -> Result<u32, LoadError> {
        self.raw(column)
    }

    pub(crate) fn str(&self, column: usize) -> Result<&'a str, LoadError> {
        self.tables.strings.get(self.raw(column)?)
    }

    pub(crate) fn blob(&self, column: usize) -> Result<&'a [u8], LoadError> {
        self.tables.blobs.get(self.raw(column)?)
    }

    pub(crate) fn coded(&self, column: usize) -> Result<CodedRef, LoadError> {
        match SCHEMAS[self.table].get(column) {
            Some(Column::Coded(coded)) => coded.decode(self.raw(column)?),
            _ => Err(LoadError::InvalidIndex {
                table: table_name(self.table),
                index: column as u32,
            }),
        }
    }
}

pub(crate) fn table_name(table: usize) -> &'static str {
    const NAMES: [&str; TABLE_COUNT] = [
        "Module",
        "TypeRef",
        "TypeDef",
        "FieldPtr",
        "Field",
        "MethodPtr",
        "MethodDef",
        "ParamPtr",
        "Param",
        "InterfaceImpl",
        "MemberRef",
        "Constant",
        "CustomAttribute",
        "FieldMarshal",
        "DeclSecurity",
        "ClassLayout",
        "FieldLayout",
        "StandAloneSig",
        "EventMap",
        "EventPtr",
        "Event",
        "PropertyMap",
        "PropertyPtr",
        "Property",
        "MethodSemantics",
        "MethodImpl",
        "ModuleRef",
        "TypeSpec",
        "ImplMap",
        "FieldRVA",
        "EncLog",
        "EncMap",
        "Assembly",
        "AssemblyProcessor",
        "AssemblyOS",
        "AssemblyRef",
        "AssemblyRefProcessor",
        "AssemblyRefOS",
        "File",
        "ExportedType",
        "ManifestResource",
        "NestedClass",
        "GenericParam",
        "MethodSpec",
        "GenericParamConstraint",
    ];
    NAMES.get(table).copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tables_use_two_byte_indexes() {
        let layout = Layout::new(0, [10; TABLE_COUNT]);
        assert_eq!(layout.row_width(TYPE_DEF), 4 + 2 + 2 + 2 + 2 + 2);
        assert_eq!(layout.row_width(ASSEMBLY_REF), 2 * 4 + 4 + 2 + 2 + 2 + 2);
    }

    #[test]
    fn wide_heaps_and_large_tables_widen_columns() {
        let mut rows = [1; TABLE_COUNT];
        rows[TYPE_REF] = 0x4000;
        let layout = Layout::new(HEAP_STRINGS_WIDE | HEAP_BLOB_WIDE, rows);
        assert_eq!(layout.column_width(Column::Str), 4);
        assert_eq!(layout.column_width(Column::Blob), 4);
        assert_eq!(layout.column_width(Column::Guid), 2);
        // 0x4000 rows no longer fit in 14 bits once the 2-bit tag is added.
        assert_eq!(layout.column_width(Column::Coded(CodedIndex::TypeDefOrRef)), 4);
        assert_eq!(layout.column_width(Column::Table(TYPE_REF)), 2);
    }

    #[test]
    fn coded_index_round_trips_through_tags() {
        let encoded = CodedIndex::TypeDefOrRef.encode(TYPE_REF, 7);
        assert_eq!(encoded, (7 << 2) | 1);
        let decoded = CodedIndex::TypeDefOrRef.decode(encoded).unwrap();
        assert_eq!(decoded, CodedRef { table: TYPE_REF, row: 7 });

        let semantics = CodedIndex::HasSemantics.decode((3 << 1) | 1).unwrap();
        assert_eq!(semantics.table, PROPERTY);
        assert_eq!(semantics.row, 3);
    }

    #[test]
    fn unused_custom_attribute_tags_are_rejected() {
        assert!(CodedIndex::CustomAttributeType.decode(0).is_err());
        let ctor = CodedIndex::CustomAttributeType.decode((5 << 3) | 2).unwrap();
        assert_eq!(ctor.table, METHOD_DEF);
    }

    /// A `#-` style stream: two TypeDefs, a MethodPtr with three entries and
    /// four MethodDef rows, the last of which no longer belongs to any type.
    fn uncompressed_stream() -> Vec<u8> {
        let mut out = vec![0, 0, 0, 0, 2, 0, 0, 1];
        let valid = (1u64 << TYPE_DEF) | (1u64 << METHOD_PTR) | (1u64 << METHOD_DEF);
        out.extend_from_slice(&valid.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        for count in [2u32, 3, 4] {
            out.extend_from_slice(&count.to_le_bytes());
        }
        for method_list in [1u16, 3] {
            out.extend_from_slice(&0u32.to_le_bytes());
            for column in [0u16, 0, 0, 1, method_list] {
                out.extend_from_slice(&column.to_le_bytes());
            }
        }
        for target in [2u16, 1, 3] {
            out.extend_from_slice(&target.to_le_bytes());
        }
        out.extend_from_slice(&[0; 14 * 4]);
        out
    }

    #[test]
    fn child_lists_end_at_the_pointer_table() {
        let stream = uncompressed_stream();
        let tables =
            Tables::parse(&stream, StringHeap::new(&[0]), BlobHeap::new(&[0])).unwrap();

        assert_eq!(tables.list_range(TYPE_DEF, 1, 5, METHOD_DEF).unwrap(), 1..3);
        assert_eq!(tables.list_range(TYPE_DEF, 2, 5, METHOD_DEF).unwrap(), 3..4);
        assert_eq!(tables.indirect(METHOD_PTR, 1).unwrap(), 2);
        assert_eq!(tables.indirect(METHOD_PTR, 3).unwrap(), 3);
    }

    #[test]
    fn every_table_has_a_name() {
        for table in 0..TABLE_COUNT {
            assert_ne!(table_name(table), "unknown");
        }
    }
}
