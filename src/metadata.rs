use crate::constant_info::{FieldRef, MethodRef};
use crate::type_info::{TypeDef, TypeSig};

/// Query surface over one loaded module's metadata.
pub trait MetadataReader {
    fn module_name(&self) -> &str;

    /// True for the platform's foundational library (the one defining `System.Object`).
    fn is_core_library(&self) -> bool;

    fn type_definitions(&self) -> &[TypeDef];

    fn entry_point(&self) -> Option<u32>;

    fn resolve_method(&self, token: u32) -> Option<MethodRef>;

    fn resolve_field(&self, token: u32) -> Option<FieldRef>;

    fn resolve_type(&self, token: u32) -> Option<TypeSig>;

    fn user_string(&self, token: u32) -> Option<&str>;
}
