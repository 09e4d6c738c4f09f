//! The type-system view of one module, as produced by the loader.
//!
//! Everything here is plain owned data: once a view is built the file bytes
//! and table decoders are gone.

use std::fmt;

use serde::Serialize;
use strum::AsRefStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Name, version, culture and key token of an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: Version,
    pub culture: Option<String>,
    /// Lowercase hex, or `None` for unsigned assemblies.
    pub public_key_token: Option<String>,
}

impl AssemblyIdentity {
    /// `Name, Version=1.2.3.4, Culture=neutral, PublicKeyToken=null`
    pub fn display_name(&self) -> String {
        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral"),
            self.public_key_token.as_deref().unwrap_or("null"),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    PrivateProtected,
    Internal,
    Protected,
    ProtectedInternal,
    Public,
}

impl Visibility {
    /// Decode the member-access bits shared by fields and methods.
    pub(crate) fn from_access(flags: u16) -> Self {
        match flags & 0x0007 {
            0x0002 => Visibility::PrivateProtected,
            0x0003 => Visibility::Internal,
            0x0004 => Visibility::Protected,
            0x0005 => Visibility::ProtectedInternal,
            0x0006 => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    Value,
    Ref,
    Out,
    In,
}

/// A reference to another type by name. `full_name` is the metadata name
/// (`System.Collections.Generic.IList`1`), `display` the surface rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeReference {
    pub full_name: String,
    pub display: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterDefinition {
    pub name: Option<String>,
    pub type_name: String,
    pub position: u32,
    pub is_optional: bool,
    pub default_value: Option<String>,
    pub pass_mode: PassMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDefinition {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_new_slot: bool,
    pub is_special_name: bool,
    /// Bound to a property or event through MethodSemantics.
    pub is_accessor: bool,
    pub return_type: String,
    pub generic_params: Vec<String>,
    pub parameters: Vec<ParameterDefinition>,
}

impl MethodDefinition {
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_literal: bool,
    pub is_init_only: bool,
    pub type_name: String,
    pub constant: Option<String>,
}

/// Accessor of a property or event.
#[derive(Debug, Clone, Serialize)]
pub struct AccessorInfo {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_new_slot: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub type_name: String,
    pub getter: Option<AccessorInfo>,
    pub setter: Option<AccessorInfo>,
}

impl PropertyDefinition {
    /// Most visible accessor; a property without accessors is private.
    pub fn visibility(&self) -> Visibility {
        [&self.getter, &self.setter]
            .into_iter()
            .flatten()
            .map(|a| a.visibility)
            .max()
            .unwrap_or(Visibility::Private)
    }

    /// The accessor that describes the property's dispatch shape.
    pub fn primary_accessor(&self) -> Option<&AccessorInfo> {
        self.getter.as_ref().or(self.setter.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDefinition {
    pub name: String,
    pub handler_type: String,
    pub add: Option<AccessorInfo>,
    pub remove: Option<AccessorInfo>,
}

impl EventDefinition {
    pub fn visibility(&self) -> Visibility {
        [&self.add, &self.remove]
            .into_iter()
            .flatten()
            .map(|a| a.visibility)
            .max()
            .unwrap_or(Visibility::Private)
    }

    pub fn primary_accessor(&self) -> Option<&AccessorInfo> {
        self.add.as_ref().or(self.remove.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeDefinition {
    pub namespace: String,
    /// Metadata name; nested types carry the enclosing chain (`Outer+Inner`).
    pub name: String,
    pub full_name: String,
    pub is_public: bool,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub base_type: Option<TypeReference>,
    pub interfaces: Vec<TypeReference>,
    pub generic_params: Vec<String>,
    pub methods: Vec<MethodDefinition>,
    pub fields: Vec<FieldDefinition>,
    pub properties: Vec<PropertyDefinition>,
    pub events: Vec<EventDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    AssemblyNotFound,
    TypeNotFound,
}

/// A base type or interface that could not be matched in the dependency set.
/// Names are still recorded; only the cross-module link is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionGap {
    pub referenced_from: String,
    pub reference: String,
    pub assembly: String,
    pub reason: GapReason,
}

impl fmt::Display for ResolutionGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}]: {}",
            self.referenced_from,
            self.reference,
            self.assembly,
            self.reason.as_ref()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleView {
    pub identity: AssemblyIdentity,
    pub platform: String,
    pub runtime_version: String,
    pub references: Vec<AssemblyIdentity>,
    /// Types reachable from outside the module (public, or nested-public
    /// inside another exported type), in table order.
    pub types: Vec<TypeDefinition>,
    pub gaps: Vec<ResolutionGap>,
}

impl ModuleView {
    /// Exported types in full-name order.
    pub fn exported_types(&self) -> Vec<&TypeDefinition> {
        let mut exported: Vec<_> = self.types.iter().collect();
        exported.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        exported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accessor(visibility: Visibility) -> AccessorInfo {
        AccessorInfo {
            visibility,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_final: false,
            is_new_slot: false,
        }
    }

    #[test]
    fn identity_display_name_defaults() {
        let id = AssemblyIdentity {
            name: "Sample".into(),
            version: Version {
                major: 1,
                minor: 2,
                build: 0,
                revision: 0,
            },
            culture: None,
            public_key_token: None,
        };
        assert_eq!(
            id.display_name(),
            "Sample, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn access_bits_decode() {
        assert_eq!(Visibility::from_access(0x0006), Visibility::Public);
        assert_eq!(Visibility::from_access(0x0086), Visibility::Public);
        assert_eq!(Visibility::from_access(0x0001), Visibility::Private);
        assert_eq!(Visibility::from_access(0x0004), Visibility::Protected);
        assert_eq!(Visibility::ProtectedInternal.as_ref(), "protected_internal");
    }

    #[test]
    fn property_visibility_is_most_visible_accessor() {
        let prop = PropertyDefinition {
            name: "Size".into(),
            type_name: "int".into(),
            getter: Some(accessor(Visibility::Public)),
            setter: Some(accessor(Visibility::Private)),
        };
        assert_eq!(prop.visibility(), Visibility::Public);

        let bare = PropertyDefinition {
            getter: None,
            setter: None,
            ..prop
        };
        assert_eq!(bare.visibility(), Visibility::Private);
        assert!(bare.primary_accessor().is_none());
    }
}
