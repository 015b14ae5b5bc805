use serde::{Deserialize, Serialize};

use crate::attribute_info::CustomAttribute;
use crate::field_info::FieldDef;
use crate::method_info::MethodDef;

use super::signature::{TypeName, TypeSig};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: TypeName,
    #[serde(default)]
    pub flags: TypeAttributes,
    #[serde(default)]
    pub base: Option<TypeName>,
    #[serde(default)]
    pub interfaces: Vec<TypeName>,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// True when the base type makes this a value type (structs and enums).
    pub fn is_value_type(&self) -> bool {
        if self.name.is("System.Enum") || self.name.is("System.ValueType") {
            return false;
        }
        self.base
            .as_ref()
            .map(|base| base.is("System.ValueType") || base.is("System.Enum"))
            .unwrap_or(false)
    }

    /// Signature referring to this definition.
    pub fn signature(&self) -> TypeSig {
        if self.is_value_type() {
            TypeSig::ValueType(self.name.clone())
        } else {
            TypeSig::Class(self.name.clone())
        }
    }
}

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeAttributes(u32);

bitflags! {
    impl TypeAttributes: u32 {
        const VISIBILITY_MASK = 0x0000_0007;
        const PUBLIC = 0x0000_0001;             // Visible outside the assembly.
        const NESTED_PUBLIC = 0x0000_0002;      // Nested, public visibility.
        const NESTED_PRIVATE = 0x0000_0003;     // Nested, private visibility.
        const SEQUENTIAL_LAYOUT = 0x0000_0008;  // Fields laid out in declaration order.
        const EXPLICIT_LAYOUT = 0x0000_0010;    // Fields laid out at explicit offsets.
        const INTERFACE = 0x0000_0020;          // Is an interface.
        const ABSTRACT = 0x0000_0080;           // Cannot be instantiated.
        const SEALED = 0x0000_0100;             // Cannot be derived from.
        const SPECIAL_NAME = 0x0000_0400;       // Name is significant to tools.
        const IMPORT = 0x0000_1000;             // Imported, not defined here.
        const SERIALIZABLE = 0x0000_2000;       // Reserved.
        const BEFORE_FIELD_INIT = 0x0010_0000;  // Static initializer may run lazily.
        const RT_SPECIAL_NAME = 0x0000_0800;    // Name is significant to the runtime.
    }
}
