use serde::{Deserialize, Serialize};

use crate::type_info::TypeSig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub token: u32,
    pub name: String,
    #[serde(default)]
    pub flags: FieldAttributes,
    pub signature: TypeSig,
    /// Literal value for constant fields (enum members); `uint64` values keep their bit pattern.
    #[serde(default)]
    pub constant: Option<i64>,
}

impl FieldDef {
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }

    pub fn is_literal(&self) -> bool {
        self.flags.contains(FieldAttributes::LITERAL)
    }

    pub fn access(&self) -> MemberAccess {
        MemberAccess::from_bits(self.flags.bits())
    }
}

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldAttributes(u16);

bitflags! {
    impl FieldAttributes: u16 {
        const ACCESS_MASK = 0x0007;
        const STATIC = 0x0010;           // Defined on the type, not per instance.
        const INIT_ONLY = 0x0020;        // Assigned only in constructors.
        const LITERAL = 0x0040;          // Compile-time constant, no storage.
        const NOT_SERIALIZED = 0x0080;   // Reserved.
        const SPECIAL_NAME = 0x0200;     // Name is significant to tools.
        const PINVOKE_IMPL = 0x2000;     // Implementation forwarded through P/Invoke.
        const RT_SPECIAL_NAME = 0x0400;  // Name is significant to the runtime.
        const HAS_FIELD_MARSHAL = 0x1000;
        const HAS_DEFAULT = 0x8000;
        const HAS_FIELD_RVA = 0x0100;
    }
}

/// Accessibility stored in the low three bits of field and method attribute words.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemberAccess {
    CompilerControlled,
    Private,
    FamilyAndAssembly,
    Assembly,
    Family,
    FamilyOrAssembly,
    Public,
}

impl MemberAccess {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            1 => MemberAccess::Private,
            2 => MemberAccess::FamilyAndAssembly,
            3 => MemberAccess::Assembly,
            4 => MemberAccess::Family,
            5 => MemberAccess::FamilyOrAssembly,
            6 | 7 => MemberAccess::Public,
            _ => MemberAccess::CompilerControlled,
        }
    }
}
