//! Name mangling for the flat C++ namespace.
//!
//! Every type name is qualified by its scope, and every member or variable kind gets its
//! own prefix: `f_` fields, `p_` parameters, `local` declared locals, `temp_` evaluation
//! temporaries. Labels are `label_` plus the IL offset as four hex digits.

use std::collections::BTreeMap;

use crate::constant_info::{FieldRef, MethodRef};
use crate::type_info::{TypeName, TypeSig};

use super::descriptor::DescriptorModel;

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Module name as an identifier and directory name.
pub fn scope_name(module: &str) -> String {
    sanitize(module)
}

/// Scope-less name of a type, also the stem of its emitted files.
pub fn type_file(name: &TypeName) -> String {
    sanitize(&name.full_name().replace("[]", ""))
}

/// Qualified C++ name of a named type.
pub fn type_name(name: &TypeName) -> String {
    format!("{}_{}", scope_name(&name.scope), type_file(name))
}

/// One mangled segment for a type used as a generic argument.
fn sig_segment(sig: &TypeSig, model: &DescriptorModel) -> String {
    match sig {
        TypeSig::Pointer(inner) => format!("ptr_{}", sig_segment(inner, model)),
        TypeSig::ByRef(inner) => format!("ref_{}", sig_segment(inner, model)),
        TypeSig::SzArray(inner) => format!("arr_{}", sig_segment(inner, model)),
        other => base_name(other, model),
    }
}

/// Qualified name of the type a signature denotes, without any pointer markers.
pub fn base_name(sig: &TypeSig, model: &DescriptorModel) -> String {
    match sig {
        TypeSig::Class(name) | TypeSig::ValueType(name) => type_name(name),
        TypeSig::GenericInst {
            definition, args, ..
        } => {
            let mut result = format!("g_{}", type_name(definition));
            for arg in args {
                result.push('_');
                result.push_str(&sig_segment(arg, model));
            }
            result
        }
        TypeSig::Pointer(inner) | TypeSig::ByRef(inner) | TypeSig::SzArray(inner) => {
            base_name(inner, model)
        }
        TypeSig::Void => "void".into(),
        primitive => match model.primitive_type(primitive) {
            Some(name) => type_name(&name),
            None => "void".into(),
        },
    }
}

/// Does a value of this type render as a pointer?
pub fn is_pointer_like(sig: &TypeSig, model: &DescriptorModel) -> bool {
    match sig {
        TypeSig::Pointer(_) | TypeSig::ByRef(_) => true,
        TypeSig::SzArray(_) => true,
        TypeSig::GenericInst { value_type, .. } => !value_type,
        TypeSig::Class(name) => !model.is_native(name),
        TypeSig::String | TypeSig::Object => match model.primitive_type(sig) {
            Some(name) => !model.is_native(&name),
            None => true,
        },
        _ => false,
    }
}

/// Full C++ type for a declaration: qualified name plus one `*` per indirection level.
/// Native shim types render bare since their alias already names the target type.
pub fn type_ref(sig: &TypeSig, model: &DescriptorModel) -> String {
    match sig {
        TypeSig::Void => "void".into(),
        TypeSig::Pointer(inner) | TypeSig::ByRef(inner) | TypeSig::SzArray(inner) => {
            format!("{}*", type_ref(inner, model))
        }
        other if is_pointer_like(other, model) => format!("{}*", base_name(other, model)),
        other => base_name(other, model),
    }
}

/// Member accessor for an operand of type `sig`.
pub fn accessor(sig: &TypeSig, model: &DescriptorModel) -> &'static str {
    if is_pointer_like(sig, model) {
        "->"
    } else {
        "."
    }
}

pub fn field_name(name: &str) -> String {
    format!("f_{}", sanitize(name))
}

/// Storage name of a static field, qualified by its declaring type.
pub fn static_field_name(field: &FieldRef, model: &DescriptorModel) -> String {
    format!("f_{}_{}", base_name(&field.parent, model), sanitize(&field.name))
}

pub fn param_name(name: &str) -> String {
    format!("p_{}", sanitize(name))
}

/// Names of a method's locals by slot. A symbol name becomes `local_{name}`. Unnamed slots
/// become `local{index}`, and names that several slots share become `local{index}_{name}`;
/// neither form starts with `local_`.
pub fn local_names<'n, I>(locals: I) -> BTreeMap<u16, String>
where
    I: IntoIterator<Item = (u16, Option<&'n str>)>,
{
    let locals: Vec<(u16, Option<String>)> = locals
        .into_iter()
        .map(|(index, name)| (index, name.map(sanitize)))
        .collect();
    let mut uses: BTreeMap<&str, usize> = BTreeMap::new();
    for name in locals.iter().filter_map(|(_, name)| name.as_deref()) {
        *uses.entry(name).or_default() += 1;
    }
    locals
        .iter()
        .map(|(index, name)| {
            let text = match name.as_deref() {
                Some(name) if uses.get(name).copied().unwrap_or(0) > 1 => {
                    format!("local{}_{}", index, name)
                }
                Some(name) => format!("local_{}", name),
                None => format!("local{}", index),
            };
            (*index, text)
        })
        .collect()
}

pub fn temp_name(index: u32) -> String {
    format!("temp_{}", index)
}

pub fn label_name(offset: u32) -> String {
    format!("label_{:04X}", offset)
}

/// Unqualified method name; generic instantiations append their argument segments.
pub fn method_name(method: &MethodRef, model: &DescriptorModel) -> String {
    let mut name = sanitize(&method.name);
    if !method.generic_args.is_empty() {
        for arg in &method.generic_args {
            name.push('_');
            name.push_str(&sig_segment(arg, model));
        }
        name.push('_');
    }
    name
}
