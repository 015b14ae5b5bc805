#![allow(dead_code)]

use cil2cpp::attribute_info::CustomAttribute;
use cil2cpp::code_attribute::{assemble, Instruction};
use cil2cpp::constant_info::{MethodRef, TokenEntry, TypeSpec, UserString};
use cil2cpp::field_info::{FieldAttributes, FieldDef};
use cil2cpp::method_info::{MethodAttributes, MethodBody, MethodDef, ParamDef};
use cil2cpp::translate::{EmittedFile, ModuleKind, TranslateOptions, Translator};
use cil2cpp::type_info::{TypeAttributes, TypeDef, TypeSig};
use cil2cpp::ModuleImage;

pub const OBJECT: &str = "[mscorlib]System.Object";
pub const VALUE_TYPE: &str = "[mscorlib]System.ValueType";
pub const ENUM: &str = "[mscorlib]System.Enum";

pub const PUBLIC: u16 = 0x0006;
pub const PRIVATE: u16 = 0x0001;
pub const FAMILY: u16 = 0x0004;

pub fn sig(text: &str) -> TypeSig {
    text.parse().unwrap()
}

pub fn class(name: &str, base: &str) -> TypeDef {
    TypeDef {
        name: name.parse().unwrap(),
        flags: TypeAttributes::PUBLIC,
        base: Some(base.parse().unwrap()),
        interfaces: vec![],
        custom_attributes: vec![],
        fields: vec![],
        methods: vec![],
    }
}

pub fn field(token: u32, name: &str, flags: u16, signature: &str) -> FieldDef {
    FieldDef {
        token,
        name: name.into(),
        flags: FieldAttributes::from_bits_retain(flags),
        signature: sig(signature),
        constant: None,
    }
}

pub fn literal(token: u32, name: &str, signature: &str, constant: Option<i64>) -> FieldDef {
    FieldDef {
        constant,
        ..field(token, name, 0x0056, signature)
    }
}

/// A method with a bytecode body; `flags` is the raw attribute word.
pub fn method(
    token: u32,
    name: &str,
    flags: u16,
    return_type: &str,
    params: &[(&str, &str)],
    locals: &[&str],
    code: &[Instruction],
) -> MethodDef {
    MethodDef {
        body: Some(MethodBody {
            code: assemble(code).unwrap(),
            locals: locals.iter().map(|l| sig(l)).collect(),
            init_locals: true,
        }),
        ..declaration(token, name, flags, return_type, params)
    }
}

/// A method without a body.
pub fn declaration(token: u32, name: &str, flags: u16, return_type: &str, params: &[(&str, &str)]) -> MethodDef {
    MethodDef {
        token,
        name: name.into(),
        flags: MethodAttributes::from_bits_retain(flags),
        impl_flags: Default::default(),
        return_type: sig(return_type),
        params: params
            .iter()
            .map(|(name, ty)| ParamDef {
                name: name.to_string(),
                signature: sig(ty),
            })
            .collect(),
        body: None,
    }
}

pub fn static_method(token: u32, name: &str, return_type: &str, params: &[(&str, &str)], code: &[Instruction]) -> MethodDef {
    method(
        token,
        name,
        (MethodAttributes::STATIC.bits()) | PUBLIC,
        return_type,
        params,
        &[],
        code,
    )
}

pub fn method_ref(parent: &str, name: &str, has_this: bool, return_type: &str, params: &[&str]) -> TokenEntry {
    TokenEntry::Method(MethodRef {
        parent: sig(parent),
        name: name.into(),
        has_this,
        return_type: sig(return_type),
        params: params.iter().map(|p| sig(p)).collect(),
        generic_args: vec![],
    })
}

pub fn type_spec(signature: &str) -> TokenEntry {
    TokenEntry::Type(TypeSpec { signature: sig(signature) })
}

pub fn user_string(value: &str) -> TokenEntry {
    TokenEntry::String(UserString { value: value.into() })
}

fn ser_string(out: &mut Vec<u8>, s: &str) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

/// `NativeTypeAttribute(NativeTarget.Cpp, native_type, headers...)`.
pub fn native_type(native_type: &str, headers: &[&str]) -> CustomAttribute {
    let mut blob = vec![0x01, 0x00, 0x01, 0x00, 0x00, 0x00];
    ser_string(&mut blob, native_type);
    blob.extend((headers.len() as i32).to_le_bytes());
    for header in headers {
        ser_string(&mut blob, header);
    }
    blob.extend([0x00, 0x00]);
    CustomAttribute {
        attribute_type: "[CIL2CPP.Attributes]CIL2CPP.NativeTypeAttribute".parse().unwrap(),
        blob,
    }
}

pub fn module(name: &str, types: Vec<TypeDef>) -> ModuleImage {
    let mut image = ModuleImage::new(name);
    image.types = types;
    image
}

/// Lower and render `images` as a library, returning every file.
pub fn render(images: Vec<ModuleImage>) -> Vec<EmittedFile> {
    render_with(images, TranslateOptions::default())
}

pub fn render_with(images: Vec<ModuleImage>, options: TranslateOptions) -> Vec<EmittedFile> {
    let mut translator = Translator::new(options);
    for image in images {
        translator.load(image, None).unwrap();
    }
    translator.lower().unwrap();
    translator.render().unwrap()
}

pub fn executable() -> TranslateOptions {
    TranslateOptions {
        kind: ModuleKind::Executable,
        ..TranslateOptions::default()
    }
}

pub fn file<'a>(files: &'a [EmittedFile], path: &str) -> &'a str {
    files
        .iter()
        .find(|f| f.path == path)
        .map(|f| f.contents.as_str())
        .unwrap_or_else(|| panic!("no emitted file {}", path))
}

pub fn lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).collect()
}
