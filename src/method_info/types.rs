use serde::{Deserialize, Serialize};

use crate::field_info::MemberAccess;
use crate::type_info::TypeSig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDef {
    pub token: u32,
    pub name: String,
    #[serde(default)]
    pub flags: MethodAttributes,
    #[serde(default)]
    pub impl_flags: MethodImplAttributes,
    pub return_type: TypeSig,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    pub fn is_static_constructor(&self) -> bool {
        self.name == ".cctor"
    }

    pub fn access(&self) -> MemberAccess {
        MemberAccess::from_bits(self.flags.bits())
    }

    /// Body supplied outside the bytecode: internal calls, P/Invoke and runtime-provided code.
    pub fn is_externally_implemented(&self) -> bool {
        self.impl_flags.contains(MethodImplAttributes::INTERNAL_CALL)
            || self.flags.contains(MethodAttributes::PINVOKE_IMPL)
            || matches!(
                self.impl_flags.bits() & MethodImplAttributes::CODE_TYPE_MASK.bits(),
                0x1 | 0x3
            )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub signature: TypeSig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MethodBody {
    /// Raw CIL bytes.
    #[serde(with = "hex")]
    pub code: Vec<u8>,
    #[serde(default)]
    pub locals: Vec<TypeSig>,
    #[serde(default)]
    pub init_locals: bool,
}

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodAttributes(u16);

bitflags! {
    impl MethodAttributes: u16 {
        const ACCESS_MASK = 0x0007;
        const STATIC = 0x0010;          // Defined on the type, no receiver.
        const FINAL = 0x0020;           // Cannot be overridden.
        const VIRTUAL = 0x0040;         // Dispatched through the vtable.
        const HIDE_BY_SIG = 0x0080;     // Hides by name and signature.
        const NEW_SLOT = 0x0100;        // Always gets a new vtable slot.
        const STRICT = 0x0200;          // Overridable only when accessible.
        const ABSTRACT = 0x0400;        // No implementation.
        const SPECIAL_NAME = 0x0800;    // Name is significant to tools.
        const RT_SPECIAL_NAME = 0x1000; // Name is significant to the runtime.
        const PINVOKE_IMPL = 0x2000;    // Implementation forwarded through P/Invoke.
        const HAS_SECURITY = 0x4000;
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodImplAttributes(u16);

bitflags! {
    impl MethodImplAttributes: u16 {
        const CODE_TYPE_MASK = 0x0003;
        const NATIVE = 0x0001;          // Native code.
        const RUNTIME = 0x0003;         // Provided by the runtime.
        const UNMANAGED = 0x0004;
        const NO_INLINING = 0x0008;
        const FORWARD_REF = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const NO_OPTIMIZATION = 0x0040;
        const PRESERVE_SIG = 0x0080;
        const AGGRESSIVE_INLINING = 0x0100;
        const INTERNAL_CALL = 0x1000;   // Implemented inside the runtime.
    }
}
