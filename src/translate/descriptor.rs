//! Translation-oriented view of module metadata.

use std::collections::{BTreeMap, BTreeSet};

use crate::attribute_info::NativeTarget;
use crate::constant_info::{FieldRef, MethodRef};
use crate::field_info::{FieldDef, MemberAccess};
use crate::metadata::MetadataReader;
use crate::method_info::{MethodAttributes, MethodDef};
use crate::symbols::SymbolTable;
use crate::type_info::{TypeDef, TypeName, TypeSig};

use super::error::{DescriptorError, ResolveError};
use super::naming;

/// Name of the instance field holding an enum's value.
pub const ENUM_VALUE_FIELD: &str = "value__";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Reference,
    Value,
    Enum { underlying: TypeSig },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

impl Visibility {
    pub const ORDER: [Visibility; 3] = [Visibility::Public, Visibility::Private, Visibility::Protected];

    pub fn keyword(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
        }
    }
}

impl From<MemberAccess> for Visibility {
    fn from(access: MemberAccess) -> Self {
        match access {
            MemberAccess::Public | MemberAccess::Assembly => Visibility::Public,
            MemberAccess::Private | MemberAccess::CompilerControlled => Visibility::Private,
            MemberAccess::Family
            | MemberAccess::FamilyOrAssembly
            | MemberAccess::FamilyAndAssembly => Visibility::Protected,
        }
    }
}

/// Target-language spelling of a type supplied by the platform instead of generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeShim {
    pub native_type: String,
    pub headers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub token: u32,
    pub declaring: TypeSig,
    pub name: String,
    pub ty: TypeSig,
    pub is_static: bool,
    pub visibility: Visibility,
    pub constant: Option<i64>,
}

impl FieldDescriptor {
    pub fn to_ref(&self) -> FieldRef {
        FieldRef {
            parent: self.declaring.clone(),
            name: self.name.clone(),
            signature: self.ty.clone(),
            is_static: self.is_static,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamDescriptor {
    pub name: String,
    pub ty: TypeSig,
}

#[derive(Clone, Debug)]
pub struct LocalDescriptor {
    pub index: u16,
    /// Name recovered from debug symbols, unique within the method.
    pub name: Option<String>,
    pub ty: TypeSig,
}

#[derive(Clone, Debug)]
pub struct BodyDescriptor {
    pub code: Vec<u8>,
    pub locals: Vec<LocalDescriptor>,
    pub init_locals: bool,
}

#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    pub token: u32,
    pub declaring: TypeSig,
    pub name: String,
    pub return_type: TypeSig,
    pub params: Vec<ParamDescriptor>,
    pub is_constructor: bool,
    pub is_static_constructor: bool,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    /// Body supplied by a hand-written shim rather than bytecode.
    pub is_external: bool,
    pub visibility: Visibility,
    pub body: Option<BodyDescriptor>,
}

impl MethodDescriptor {
    pub fn display_name(&self) -> String {
        match self.declaring.type_name() {
            Some(name) => format!("{}::{}", name, self.name),
            None => self.name.clone(),
        }
    }

    pub fn has_this(&self) -> bool {
        !self.is_static
    }

    pub fn to_ref(&self) -> MethodRef {
        MethodRef {
            parent: self.declaring.clone(),
            name: self.name.clone(),
            has_this: self.has_this(),
            return_type: self.return_type.clone(),
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            generic_args: Vec::new(),
        }
    }
}

/// Member indices per visibility, each in declaration order.
#[derive(Clone, Debug, Default)]
pub struct VisibilityGroups {
    public: Vec<usize>,
    private: Vec<usize>,
    protected: Vec<usize>,
}

impl VisibilityGroups {
    fn push(&mut self, visibility: Visibility, index: usize) {
        match visibility {
            Visibility::Public => self.public.push(index),
            Visibility::Private => self.private.push(index),
            Visibility::Protected => self.protected.push(index),
        }
    }

    pub fn get(&self, visibility: Visibility) -> &[usize] {
        match visibility {
            Visibility::Public => &self.public,
            Visibility::Private => &self.private,
            Visibility::Protected => &self.protected,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub name: TypeName,
    pub kind: StorageKind,
    pub is_interface: bool,
    pub base: Option<TypeName>,
    pub interfaces: Vec<TypeName>,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub native: Option<NativeShim>,
    pub enum_members: Vec<EnumMember>,
    field_groups: VisibilityGroups,
    method_groups: VisibilityGroups,
}

impl TypeDescriptor {
    pub fn signature(&self) -> TypeSig {
        match self.kind {
            StorageKind::Reference => TypeSig::Class(self.name.clone()),
            _ => TypeSig::ValueType(self.name.clone()),
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, StorageKind::Enum { .. })
    }

    pub fn is_value_type(&self) -> bool {
        self.kind == StorageKind::Value
    }

    /// The root of the class hierarchy, which carries the runtime type pointer.
    pub fn is_root_object(&self) -> bool {
        self.base.is_none() && self.name.is("System.Object")
    }

    /// Instance fields with the given visibility, in declaration order.
    pub fn fields_with(&self, visibility: Visibility) -> impl Iterator<Item = &FieldDescriptor> {
        self.field_groups
            .get(visibility)
            .iter()
            .map(move |&i| &self.fields[i])
    }

    pub fn methods_with(&self, visibility: Visibility) -> impl Iterator<Item = &MethodDescriptor> {
        self.method_groups
            .get(visibility)
            .iter()
            .map(move |&i| &self.methods[i])
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_static)
    }
}

#[derive(Clone, Debug)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Module name as a C++ identifier; also the output subdirectory.
    pub scope: String,
    pub is_core: bool,
    pub entry_point: Option<u32>,
    pub types: Vec<TypeDescriptor>,
}

impl ModuleDescriptor {
    pub fn find_method(&self, token: u32) -> Option<(&TypeDescriptor, &MethodDescriptor)> {
        self.types.iter().find_map(|ty| {
            ty.methods
                .iter()
                .find(|m| m.token == token)
                .map(|m| (ty, m))
        })
    }

    /// Scopes other than this module's that its declarations refer to, sorted.
    pub fn referenced_scopes(&self) -> BTreeSet<String> {
        let mut names = Vec::new();
        for ty in &self.types {
            names.extend(ty.base.iter().cloned());
            names.extend(ty.interfaces.iter().cloned());
            for field in &ty.fields {
                field.ty.referenced_names(&mut names);
            }
            for method in &ty.methods {
                method.return_type.referenced_names(&mut names);
                for param in &method.params {
                    param.ty.referenced_names(&mut names);
                }
            }
        }
        names
            .iter()
            .map(|n| naming::scope_name(&n.scope))
            .filter(|scope| *scope != self.scope)
            .collect()
    }
}

/// Descriptors for every loaded module, built once and read-only afterwards.
#[derive(Clone, Debug)]
pub struct DescriptorModel {
    pub modules: Vec<ModuleDescriptor>,
    core_library: String,
    index: BTreeMap<TypeName, (usize, usize)>,
}

impl DescriptorModel {
    /// Build descriptors for `modules` in discovery order. `core_library` names the module
    /// defining primitive types unless one of the modules is flagged as the core library.
    pub fn build(
        modules: &[(&dyn MetadataReader, Option<&SymbolTable>)],
        core_library: &str,
    ) -> Result<Self, DescriptorError> {
        let core_library = modules
            .iter()
            .find(|(reader, _)| reader.is_core_library())
            .map(|(reader, _)| reader.module_name().to_string())
            .unwrap_or_else(|| core_library.to_string());

        let mut built = Vec::with_capacity(modules.len());
        let mut index = BTreeMap::new();
        for (module_index, (reader, symbols)) in modules.iter().enumerate() {
            let module = build_module(*reader, *symbols)?;
            for (type_index, ty) in module.types.iter().enumerate() {
                index.insert(ty.name.clone(), (module_index, type_index));
            }
            built.push(module);
        }

        Ok(Self {
            modules: built,
            core_library,
            index,
        })
    }

    pub fn core_library(&self) -> &str {
        &self.core_library
    }

    pub fn lookup(&self, name: &TypeName) -> Option<&TypeDescriptor> {
        self.index
            .get(name)
            .map(|&(m, t)| &self.modules[m].types[t])
    }

    pub fn native_shim(&self, name: &TypeName) -> Option<&NativeShim> {
        self.lookup(name).and_then(|ty| ty.native.as_ref())
    }

    pub fn is_native(&self, name: &TypeName) -> bool {
        self.native_shim(name).is_some()
    }

    pub fn is_enum(&self, name: &TypeName) -> bool {
        self.lookup(name).map(|ty| ty.is_enum()).unwrap_or(false)
    }

    /// Core library type backing a primitive signature, e.g. `int32` -> `[core]System.Int32`.
    pub fn primitive_type(&self, sig: &TypeSig) -> Option<TypeName> {
        sig.primitive_name()
            .map(|name| TypeName::new(&self.core_library, "System", name))
    }
}

fn build_module(
    reader: &dyn MetadataReader,
    symbols: Option<&SymbolTable>,
) -> Result<ModuleDescriptor, DescriptorError> {
    let mut types = Vec::new();
    for def in reader.type_definitions() {
        if def.name.is("<Module>") {
            tracing::debug!(module = reader.module_name(), "skipping module pseudo type");
            continue;
        }
        types.push(build_type(def, symbols)?);
    }
    tracing::debug!(module = reader.module_name(), types = types.len(), "built descriptors");
    Ok(ModuleDescriptor {
        name: reader.module_name().to_string(),
        scope: naming::scope_name(reader.module_name()),
        is_core: reader.is_core_library(),
        entry_point: reader.entry_point(),
        types,
    })
}

fn storage_kind(def: &TypeDef) -> Result<StorageKind, DescriptorError> {
    let base = def.base.as_ref();
    if def.is_interface()
        || def.name.is("System.Object")
        || def.name.is("System.Enum")
        || def.name.is("System.ValueType")
    {
        return Ok(StorageKind::Reference);
    }
    match base {
        Some(base) if base.is("System.Enum") => {
            let underlying = def
                .fields
                .iter()
                .find(|f| f.name == ENUM_VALUE_FIELD && !f.is_static())
                .map(|f| f.signature.clone())
                .ok_or_else(|| DescriptorError::MissingEnumStorage(def.name.clone()))?;
            Ok(StorageKind::Enum { underlying })
        }
        Some(base) if base.is("System.ValueType") => Ok(StorageKind::Value),
        Some(_) => Ok(StorageKind::Reference),
        None => Err(DescriptorError::UnknownStorageKind(def.name.clone())),
    }
}

fn native_shim(def: &TypeDef) -> Result<Option<NativeShim>, DescriptorError> {
    for attr in def.custom_attributes.iter().filter(|a| a.is_native_type()) {
        let native = attr.native_type().map_err(|detail| ResolveError::NativeAnnotation {
            type_name: def.name.clone(),
            detail,
        })?;
        if matches!(native.target, NativeTarget::C | NativeTarget::Cpp) {
            return Ok(Some(NativeShim {
                native_type: native.native_type,
                headers: native.headers,
            }));
        }
    }
    Ok(None)
}

fn build_field(declaring: &TypeSig, def: &FieldDef) -> FieldDescriptor {
    FieldDescriptor {
        token: def.token,
        declaring: declaring.clone(),
        name: def.name.clone(),
        ty: def.signature.clone(),
        is_static: def.is_static(),
        visibility: def.access().into(),
        constant: def.constant,
    }
}

fn build_locals(method: &MethodDef, locals: &[TypeSig], symbols: Option<&SymbolTable>) -> Vec<LocalDescriptor> {
    locals
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let index = i as u16;
            LocalDescriptor {
                index,
                name: symbols
                    .and_then(|s| s.local_name(method.token, index))
                    .map(str::to_string),
                ty: ty.clone(),
            }
        })
        .collect()
}

fn build_method(declaring: &TypeSig, def: &MethodDef, symbols: Option<&SymbolTable>) -> MethodDescriptor {
    let body = def.body.as_ref().map(|body| BodyDescriptor {
        code: body.code.clone(),
        locals: build_locals(def, &body.locals, symbols),
        init_locals: body.init_locals,
    });
    MethodDescriptor {
        token: def.token,
        declaring: declaring.clone(),
        name: def.name.clone(),
        return_type: def.return_type.clone(),
        params: def
            .params
            .iter()
            .map(|p| ParamDescriptor {
                name: p.name.clone(),
                ty: p.signature.clone(),
            })
            .collect(),
        is_constructor: def.is_constructor(),
        is_static_constructor: def.is_static_constructor(),
        is_static: def.is_static(),
        is_virtual: def.flags.contains(MethodAttributes::VIRTUAL),
        is_abstract: def.flags.contains(MethodAttributes::ABSTRACT),
        is_external: def.is_externally_implemented(),
        // Static constructors are run from the generated entry point.
        visibility: if def.is_static_constructor() {
            Visibility::Public
        } else {
            def.access().into()
        },
        body,
    }
}

pub fn build_type(def: &TypeDef, symbols: Option<&SymbolTable>) -> Result<TypeDescriptor, DescriptorError> {
    let kind = storage_kind(def)?;
    let declaring = match kind {
        StorageKind::Reference => TypeSig::Class(def.name.clone()),
        _ => TypeSig::ValueType(def.name.clone()),
    };

    let fields: Vec<FieldDescriptor> = def.fields.iter().map(|f| build_field(&declaring, f)).collect();
    let methods: Vec<MethodDescriptor> = def
        .methods
        .iter()
        .map(|m| build_method(&declaring, m, symbols))
        .collect();

    let mut field_groups = VisibilityGroups::default();
    for (i, field) in fields.iter().enumerate().filter(|(_, f)| !f.is_static) {
        field_groups.push(field.visibility, i);
    }
    let mut method_groups = VisibilityGroups::default();
    for (i, method) in methods.iter().enumerate() {
        method_groups.push(method.visibility, i);
    }

    let enum_members = match kind {
        StorageKind::Enum { .. } => def
            .fields
            .iter()
            .filter(|f| f.is_static() && f.is_literal())
            .map(|f| EnumMember {
                name: f.name.clone(),
                value: f.constant,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(TypeDescriptor {
        name: def.name.clone(),
        is_interface: def.is_interface(),
        base: def.base.clone(),
        interfaces: def.interfaces.clone(),
        native: native_shim(def)?,
        kind,
        fields,
        methods,
        enum_members,
        field_groups,
        method_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_info::FieldAttributes;
    use crate::type_info::TypeAttributes;

    fn type_def(name: &str, base: Option<&str>) -> TypeDef {
        TypeDef {
            name: name.parse().unwrap(),
            flags: TypeAttributes::PUBLIC,
            base: base.map(|b| b.parse().unwrap()),
            interfaces: vec![],
            custom_attributes: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    fn field(token: u32, name: &str, flags: u16, sig: &str) -> FieldDef {
        FieldDef {
            token,
            name: name.into(),
            flags: FieldAttributes::from_bits_retain(flags),
            signature: sig.parse().unwrap(),
            constant: None,
        }
    }

    #[test]
    fn test_storage_kinds() {
        let class = type_def("[m]N.A", Some("[mscorlib]System.Object"));
        assert_eq!(storage_kind(&class).unwrap(), StorageKind::Reference);

        let value = type_def("[m]N.S", Some("[mscorlib]System.ValueType"));
        assert_eq!(storage_kind(&value).unwrap(), StorageKind::Value);

        let object = type_def("[mscorlib]System.Object", None);
        assert_eq!(storage_kind(&object).unwrap(), StorageKind::Reference);

        let orphan = type_def("[m]N.Orphan", None);
        assert_eq!(
            storage_kind(&orphan),
            Err(DescriptorError::UnknownStorageKind("[m]N.Orphan".parse().unwrap()))
        );
    }

    #[test]
    fn test_enum_underlying() {
        let mut e = type_def("[m]N.E", Some("[mscorlib]System.Enum"));
        assert!(matches!(storage_kind(&e), Err(DescriptorError::MissingEnumStorage(_))));
        e.fields.push(field(1, ENUM_VALUE_FIELD, 0x0606, "uint8"));
        e.fields.push(field(2, "A", 0x0056, "valuetype [m]N.E"));
        assert_eq!(
            storage_kind(&e).unwrap(),
            StorageKind::Enum {
                underlying: TypeSig::U1
            }
        );
        let ty = build_type(&e, None).unwrap();
        assert_eq!(ty.enum_members.len(), 1);
        assert_eq!(ty.enum_members[0].name, "A");
    }

    #[test]
    fn test_visibility_groups_keep_declaration_order() {
        let mut a = type_def("[m]N.A", Some("[mscorlib]System.Object"));
        a.fields.push(field(1, "p1", 0x0006, "int32"));
        a.fields.push(field(2, "x", 0x0001, "int32"));
        a.fields.push(field(3, "p2", 0x0006, "int32"));
        a.fields.push(field(4, "k", 0x0004, "int32"));
        a.fields.push(field(5, "s", 0x0016, "int32"));
        a.fields.push(field(6, "internal", 0x0003, "int32"));
        let ty = build_type(&a, None).unwrap();

        let public: Vec<&str> = ty.fields_with(Visibility::Public).map(|f| f.name.as_str()).collect();
        assert_eq!(public, vec!["p1", "p2", "internal"]);
        let private: Vec<&str> = ty.fields_with(Visibility::Private).map(|f| f.name.as_str()).collect();
        assert_eq!(private, vec!["x"]);
        let protected: Vec<&str> = ty.fields_with(Visibility::Protected).map(|f| f.name.as_str()).collect();
        assert_eq!(protected, vec!["k"]);
        assert_eq!(ty.static_fields().count(), 1);
    }

    #[test]
    fn test_local_names_come_from_symbols() {
        let method = MethodDef {
            token: 0x0600_0001,
            name: "M".into(),
            flags: MethodAttributes::STATIC,
            impl_flags: Default::default(),
            return_type: TypeSig::Void,
            params: vec![],
            body: None,
        };
        let mut symbols = SymbolTable::default();
        symbols.insert_local(0x0600_0001, 0, "i");
        symbols.insert_local(0x0600_0001, 2, "i");
        let locals = build_locals(&method, &[TypeSig::I4, TypeSig::I4, TypeSig::I4], Some(&symbols));
        assert_eq!(locals[0].name.as_deref(), Some("i"));
        assert_eq!(locals[1].name, None);
        assert_eq!(locals[2].name.as_deref(), Some("i"));
    }
}
