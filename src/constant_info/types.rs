use serde::{Deserialize, Serialize};

use crate::type_info::TypeSig;

/// One entry of the module's token table: everything an instruction operand can name
/// that is not a local definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenEntry {
    Method(MethodRef),
    Field(FieldRef),
    Type(TypeSpec),
    String(UserString),
}

/// Call site view of a method: declaring type plus signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub parent: TypeSig,
    pub name: String,
    #[serde(default)]
    pub has_this: bool,
    pub return_type: TypeSig,
    #[serde(default)]
    pub params: Vec<TypeSig>,
    #[serde(default)]
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub parent: TypeSig,
    pub name: String,
    pub signature: TypeSig,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub signature: TypeSig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserString {
    pub value: String,
}
