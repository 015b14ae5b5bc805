use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constant_info::{FieldRef, MethodRef, TokenEntry};
use crate::metadata::MetadataReader;
use crate::type_info::{TypeDef, TypeSig};

/// A loaded module: its type definitions plus the token table its bytecode refers to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleImage {
    pub name: String,
    #[serde(default)]
    pub core_library: bool,
    #[serde(default)]
    pub entry_point: Option<u32>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub tokens: BTreeMap<u32, TokenEntry>,
}

impl ModuleImage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            core_library: false,
            entry_point: None,
            types: Vec::new(),
            tokens: BTreeMap::new(),
        }
    }
}

impl MetadataReader for ModuleImage {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn is_core_library(&self) -> bool {
        self.core_library
    }

    fn type_definitions(&self) -> &[TypeDef] {
        &self.types
    }

    fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    fn resolve_method(&self, token: u32) -> Option<MethodRef> {
        for ty in &self.types {
            if let Some(method) = ty.methods.iter().find(|m| m.token == token) {
                return Some(MethodRef {
                    parent: ty.signature(),
                    name: method.name.clone(),
                    has_this: !method.is_static(),
                    return_type: method.return_type.clone(),
                    params: method.params.iter().map(|p| p.signature.clone()).collect(),
                    generic_args: Vec::new(),
                });
            }
        }
        match self.tokens.get(&token) {
            Some(TokenEntry::Method(method)) => Some(method.clone()),
            _ => None,
        }
    }

    fn resolve_field(&self, token: u32) -> Option<FieldRef> {
        for ty in &self.types {
            if let Some(field) = ty.fields.iter().find(|f| f.token == token) {
                return Some(FieldRef {
                    parent: ty.signature(),
                    name: field.name.clone(),
                    signature: field.signature.clone(),
                    is_static: field.is_static(),
                });
            }
        }
        match self.tokens.get(&token) {
            Some(TokenEntry::Field(field)) => Some(field.clone()),
            _ => None,
        }
    }

    fn resolve_type(&self, token: u32) -> Option<TypeSig> {
        match self.tokens.get(&token) {
            Some(TokenEntry::Type(spec)) => Some(spec.signature.clone()),
            _ => None,
        }
    }

    fn user_string(&self, token: u32) -> Option<&str> {
        match self.tokens.get(&token) {
            Some(TokenEntry::String(s)) => Some(s.value.as_str()),
            _ => None,
        }
    }
}
