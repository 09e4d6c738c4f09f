//! Signature blob decoding (ECMA-335 II.23.2).

use super::LoadError;
use super::heaps::read_compressed;
use super::tables::{CodedIndex, CodedRef};

pub(crate) const ELEMENT_VOID: u8 = 0x01;
pub(crate) const ELEMENT_BOOLEAN: u8 = 0x02;
pub(crate) const ELEMENT_CHAR: u8 = 0x03;
pub(crate) const ELEMENT_I1: u8 = 0x04;
pub(crate) const ELEMENT_U1: u8 = 0x05;
pub(crate) const ELEMENT_I2: u8 = 0x06;
pub(crate) const ELEMENT_U2: u8 = 0x07;
pub(crate) const ELEMENT_I4: u8 = 0x08;
pub(crate) const ELEMENT_U4: u8 = 0x09;
pub(crate) const ELEMENT_I8: u8 = 0x0a;
pub(crate) const ELEMENT_U8: u8 = 0x0b;
pub(crate) const ELEMENT_R4: u8 = 0x0c;
pub(crate) const ELEMENT_R8: u8 = 0x0d;
pub(crate) const ELEMENT_STRING: u8 = 0x0e;
const ELEMENT_PTR: u8 = 0x0f;
const ELEMENT_BYREF: u8 = 0x10;
const ELEMENT_VALUETYPE: u8 = 0x11;
pub(crate) const ELEMENT_CLASS: u8 = 0x12;
const ELEMENT_VAR: u8 = 0x13;
const ELEMENT_ARRAY: u8 = 0x14;
const ELEMENT_GENERICINST: u8 = 0x15;
pub(crate) const ELEMENT_TYPEDBYREF: u8 = 0x16;
pub(crate) const ELEMENT_I: u8 = 0x18;
pub(crate) const ELEMENT_U: u8 = 0x19;
const ELEMENT_FNPTR: u8 = 0x1b;
pub(crate) const ELEMENT_OBJECT: u8 = 0x1c;
const ELEMENT_SZARRAY: u8 = 0x1d;
const ELEMENT_MVAR: u8 = 0x1e;
const ELEMENT_CMOD_REQD: u8 = 0x1f;
const ELEMENT_CMOD_OPT: u8 = 0x20;
const ELEMENT_SENTINEL: u8 = 0x41;
const ELEMENT_PINNED: u8 = 0x45;

const SIG_GENERIC: u8 = 0x10;
const SIG_FIELD: u8 = 0x06;
const SIG_PROPERTY: u8 = 0x08;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypeSig {
    /// A built-in element type: void, the numeric types, string, object, typedref.
    Primitive(u8),
    Class(CodedRef),
    ValueType(CodedRef),
    GenericInst {
        definition: CodedRef,
        args: Vec<TypeSig>,
    },
    Var(u32),
    MVar(u32),
    SzArray(Box<TypeSig>),
    Array {
        element: Box<TypeSig>,
        rank: u32,
    },
    Ptr(Box<TypeSig>),
    ByRef(Box<TypeSig>),
    FnPtr(Box<MethodSig>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MethodSig {
    pub(crate) generic_count: u32,
    pub(crate) ret: TypeSig,
    pub(crate) params: Vec<TypeSig>,
}

struct SigReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SigReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Result<u8, LoadError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(LoadError::UnexpectedEof { offset: self.pos })
    }

    fn byte(&mut self) -> Result<u8, LoadError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn compressed(&mut self) -> Result<u32, LoadError> {
        let (value, next) = read_compressed(self.data, self.pos)?;
        self.pos = next;
        Ok(value)
    }

    fn type_def_or_ref(&mut self) -> Result<CodedRef, LoadError> {
        let raw = self.compressed()?;
        CodedIndex::TypeDefOrRef.decode(raw)
    }

    fn skip_custom_mods(&mut self) -> Result<(), LoadError> {
        while matches!(self.peek(), Ok(ELEMENT_CMOD_OPT | ELEMENT_CMOD_REQD)) {
            self.pos += 1;
            self.type_def_or_ref()?;
        }
        Ok(())
    }

    fn type_sig(&mut self, depth: usize) -> Result<TypeSig, LoadError> {
        if depth > 64 {
            return Err(LoadError::InvalidSignature("type nesting too deep".into()));
        }
        self.skip_custom_mods()?;
        let element = self.byte()?;
        let sig = match element {
            ELEMENT_VOID..=ELEMENT_STRING
            | ELEMENT_TYPEDBYREF
            | ELEMENT_I
            | ELEMENT_U
            | ELEMENT_OBJECT => TypeSig::Primitive(element),
            ELEMENT_PTR => TypeSig::Ptr(Box::new(self.type_sig(depth + 1)?)),
            ELEMENT_BYREF => TypeSig::ByRef(Box::new(self.type_sig(depth + 1)?)),
            ELEMENT_VALUETYPE => TypeSig::ValueType(self.type_def_or_ref()?),
            ELEMENT_CLASS => TypeSig::Class(self.type_def_or_ref()?),
            ELEMENT_VAR => TypeSig::Var(self.compressed()?),
            ELEMENT_MVAR => TypeSig::MVar(self.compressed()?),
            ELEMENT_SZARRAY => TypeSig::SzArray(Box::new(self.type_sig(depth + 1)?)),
            ELEMENT_ARRAY => {
                let element = self.type_sig(depth + 1)?;
                let rank = self.compressed()?;
                let sizes = self.compressed()?;
                for _ in 0..sizes {
                    self.compressed()?;
                }
                let lower_bounds = self.compressed()?;
                for _ in 0..lower_bounds {
                    self.compressed()?;
                }
                TypeSig::Array {
                    element: Box::new(element),
                    rank,
                }
            }
            ELEMENT_GENERICINST => {
                let kind = self.byte()?;
                if kind != ELEMENT_CLASS && kind != ELEMENT_VALUETYPE {
                    return Err(LoadError::InvalidSignature(format!(
                        "generic instantiation of element {kind:#04x}"
                    )));
                }
                let definition = self.type_def_or_ref()?;
                let count = self.compressed()?;
                let args = (0..count)
                    .map(|_| self.type_sig(depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                TypeSig::GenericInst { definition, args }
            }
            ELEMENT_FNPTR => TypeSig::FnPtr(Box::new(self.method_sig(depth + 1)?)),
            ELEMENT_PINNED => self.type_sig(depth + 1)?,
            other => {
                return Err(LoadError::InvalidSignature(format!(
                    "unexpected element type {other:#04x}"
                )));
            }
        };
        Ok(sig)
    }

    fn method_sig(&mut self, depth: usize) -> Result<MethodSig, LoadError> {
        let conv = self.byte()?;
        let generic_count = if conv & SIG_GENERIC != 0 {
            self.compressed()?
        } else {
            0
        };
        let count = self.compressed()?;
        let ret = self.type_sig(depth)?;
        let mut params = Vec::with_capacity(count as usize);
        while params.len() < count as usize {
            if self.peek()? == ELEMENT_SENTINEL {
                self.pos += 1;
                continue;
            }
            params.push(self.type_sig(depth)?);
        }
        Ok(MethodSig {
            generic_count,
            ret,
            params,
        })
    }
}

pub(crate) fn parse_method_sig(blob: &[u8]) -> Result<MethodSig, LoadError> {
    SigReader::new(blob).method_sig(0)
}

pub(crate) fn parse_field_sig(blob: &[u8]) -> Result<TypeSig, LoadError> {
    let mut r = SigReader::new(blob);
    let conv = r.byte()?;
    if conv & 0x0f != SIG_FIELD {
        return Err(LoadError::InvalidSignature(format!(
            "field signature starts with {conv:#04x}"
        )));
    }
    r.type_sig(0)
}

/// Property signatures carry the property type followed by indexer parameters;
/// only the type is kept.
pub(crate) fn parse_property_sig(blob: &[u8]) -> Result<TypeSig, LoadError> {
    let mut r = SigReader::new(blob);
    let conv = r.byte()?;
    if conv & 0x0f != SIG_PROPERTY {
        return Err(LoadError::InvalidSignature(format!(
            "property signature starts with {conv:#04x}"
        )));
    }
    r.compressed()?;
    r.type_sig(0)
}

pub(crate) fn parse_type_spec(blob: &[u8]) -> Result<TypeSig, LoadError> {
    SigReader::new(blob).type_sig(0)
}
