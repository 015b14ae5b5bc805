//! C++ rendering of descriptors and lowered bodies.
//!
//! Each module becomes one directory holding `__ForwardDeclares.hpp` plus a `.hpp`/`.cpp`
//! pair per type. Everything is rendered in descriptor discovery order and collected
//! through ordered sets, so the same input always yields the same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constant_info::MethodRef;
use crate::type_info::{TypeName, TypeSig};

use super::descriptor::{DescriptorModel, MethodDescriptor, ModuleDescriptor, TypeDescriptor, Visibility};
use super::error::EmitError;
use super::ir::*;
use super::naming;
use super::shims::{ShimRegistry, RUNTIME_TYPE_BASE};
use super::writer::{escape_cpp_string, SourceWriter};

pub const FORWARD_DECLARES: &str = "__ForwardDeclares.hpp";
pub const MAIN_FILE: &str = "__Main.cpp";

/// Whether a translation produces a program entry point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    Executable,
    Library,
}

#[derive(Clone, Debug)]
pub struct EmitOptions {
    pub indent: String,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            indent: "    ".into(),
        }
    }
}

/// One rendered output file; `path` is relative to the output root and uses `/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmittedFile {
    pub path: String,
    pub contents: String,
}

pub struct Emitter<'a> {
    model: &'a DescriptorModel,
    options: &'a EmitOptions,
    shims: &'a ShimRegistry,
    lowered: BTreeMap<(&'a str, u32), &'a LoweredMethod>,
}

/// Everything a method body renders against.
struct BodyScope<'m> {
    ty: &'m TypeDescriptor,
    method: &'m MethodDescriptor,
    lowered: &'m LoweredMethod,
    locals: BTreeMap<u16, String>,
}

fn is_compound(op: &Operand) -> bool {
    matches!(
        op,
        Operand::Binary { .. }
            | Operand::Unary { .. }
            | Operand::Compare { .. }
            | Operand::Convert { .. }
            | Operand::Cast {
                kind: CastKind::Value,
                ..
            }
    )
}

/// Literals whose text starts with `-`; a unary operator in front would fuse with it.
fn is_negative_literal(op: &Operand) -> bool {
    match op {
        Operand::Int32(v) => *v < 0,
        Operand::Int64(v) => *v < 0,
        Operand::Float32(v) => v.is_sign_negative() && !v.is_nan(),
        Operand::Float64(v) => v.is_sign_negative() && !v.is_nan(),
        _ => false,
    }
}

fn uses_stack_alloc(method: &LoweredMethod) -> bool {
    method.operations.iter().any(|op| {
        op.operands()
            .into_iter()
            .any(|operand| operand.any(&|o| matches!(o, Operand::StackAlloc(_))))
    })
}

fn int32_literal(value: i32) -> String {
    if value == i32::MIN {
        "(-2147483647 - 1)".into()
    } else {
        value.to_string()
    }
}

fn int64_literal(value: i64) -> String {
    if value == i64::MIN {
        "(-9223372036854775807LL - 1)".into()
    } else {
        format!("{}LL", value)
    }
}

/// Metadata constants are stored as signed 64-bit; `uint64` values above `i64::MAX` wrap.
fn constant_literal(value: i64, ty: &TypeSig) -> String {
    match ty {
        TypeSig::U8 => format!("{}ULL", value as u64),
        TypeSig::I8 if value == i64::MIN => int64_literal(value),
        _ => value.to_string(),
    }
}

fn float_literal(value: f64, suffix: &str) -> String {
    if value.is_nan() {
        format!("(0.0{0} / 0.0{0})", suffix)
    } else if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        format!("({}1.0{1} / 0.0{1})", sign, suffix)
    } else {
        format!("{:?}{}", value, suffix)
    }
}

fn include_line(header: &str) -> String {
    if header.starts_with('<') || header.starts_with('"') {
        format!("#include {}", header)
    } else {
        format!("#include <{}>", header)
    }
}

impl<'a> Emitter<'a> {
    pub fn new(
        model: &'a DescriptorModel,
        unit: &'a TranslationUnit,
        options: &'a EmitOptions,
        shims: &'a ShimRegistry,
    ) -> Self {
        let mut lowered = BTreeMap::new();
        for module in &unit.modules {
            for (token, method) in &module.methods {
                lowered.insert((module.scope.as_str(), *token), method);
            }
        }
        Self {
            model,
            options,
            shims,
            lowered,
        }
    }

    fn writer(&self) -> SourceWriter {
        SourceWriter::new(&self.options.indent)
    }

    fn type_ref(&self, sig: &TypeSig) -> String {
        naming::type_ref(sig, self.model)
    }

    fn base_name(&self, sig: &TypeSig) -> String {
        naming::base_name(sig, self.model)
    }

    /// Render every loaded module, plus the entry shim when building an executable.
    pub fn emit(&self, kind: ModuleKind) -> Result<Vec<EmittedFile>, EmitError> {
        let mut files = Vec::new();
        for module in &self.model.modules {
            tracing::debug!(module = %module.name, types = module.types.len(), "emitting module");
            files.push(self.forward_declares(module));
            for ty in &module.types {
                files.push(self.header(module, ty));
                files.push(self.source(module, ty)?);
            }
        }
        if kind == ModuleKind::Executable {
            files.push(self.main_file()?);
        }
        Ok(files)
    }

    /// Write rendered files under `out_dir`, creating module directories as needed.
    pub fn write_all(files: &[EmittedFile], out_dir: &Path) -> Result<Vec<PathBuf>, EmitError> {
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = file
                .path
                .split('/')
                .fold(out_dir.to_path_buf(), |path, part| path.join(part));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| EmitError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, &file.contents).map_err(|source| EmitError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }

    // ------------------------------------------------------------------
    // __ForwardDeclares.hpp
    // ------------------------------------------------------------------

    fn forward_declares(&self, module: &ModuleDescriptor) -> EmittedFile {
        let mut w = self.writer();
        w.writeln("#pragma once");
        for scope in module.referenced_scopes() {
            w.writeln(&format!("#include \"../{}/{}\"", scope, FORWARD_DECLARES));
        }

        w.newline();
        w.writeln("/* === Normal Types === */");
        for ty in &module.types {
            if ty.native.is_some() || ty.is_enum() {
                continue;
            }
            let keyword = if ty.is_value_type() { "struct" } else { "class" };
            w.writeln(&format!("{} {};", keyword, naming::type_name(&ty.name)));
        }

        let mut headers = BTreeSet::new();
        headers.insert(include_line("string"));
        let mut aliases = BTreeSet::new();
        for ty in &module.types {
            if let Some(native) = &ty.native {
                headers.extend(native.headers.iter().map(|h| include_line(h)));
                aliases.insert(format!(
                    "#define {} {}",
                    naming::type_name(&ty.name),
                    native.native_type
                ));
            }
        }
        w.newline();
        w.writeln("/* === Native Types === */");
        for line in headers.iter().chain(aliases.iter()) {
            w.writeln(line);
        }

        let enums: Vec<&TypeDescriptor> = module
            .types
            .iter()
            .filter(|ty| ty.is_enum() && ty.native.is_none())
            .collect();
        if !enums.is_empty() {
            w.newline();
            w.writeln("/* === Enums === */");
            for (i, ty) in enums.iter().enumerate() {
                if i > 0 {
                    w.newline();
                }
                self.write_enum(&mut w, ty);
            }
        }

        if module.is_core {
            let type_class = TypeSig::Class(TypeName::new(self.model.core_library(), "System", "Type"));
            w.newline();
            w.writeln("/* === RuntimeTypeBase === */");
            w.writeln(&format!("class {}", RUNTIME_TYPE_BASE));
            w.writeln("{");
            w.writeln("public:");
            w.indent();
            w.writeln(&format!("virtual ~{}() {{}};", RUNTIME_TYPE_BASE));
            w.writeln(&format!("{} Type;", self.type_ref(&type_class)));
            w.writeln("virtual std::string Name() { return \"RuntimeTypeBase\"; }");
            w.writeln("virtual std::string FullName() { return \"CIL2CPP.RuntimeTypeBase\"; }");
            w.dedent();
            w.writeln("};");
        }

        EmittedFile {
            path: format!("{}/{}", module.scope, FORWARD_DECLARES),
            contents: w.finish(),
        }
    }

    fn write_enum(&self, w: &mut SourceWriter, ty: &TypeDescriptor) {
        let underlying = match &ty.kind {
            super::descriptor::StorageKind::Enum { underlying } => underlying,
            _ => return,
        };
        w.writeln(&format!(
            "enum class {} : {}",
            naming::type_name(&ty.name),
            self.type_ref(underlying)
        ));
        w.writeln("{");
        w.indent();
        let count = ty.enum_members.len();
        for (i, member) in ty.enum_members.iter().enumerate() {
            let mut line = naming::field_name(&member.name);
            if let Some(value) = member.value {
                line.push_str(&format!(" = {}", constant_literal(value, underlying)));
            }
            if i + 1 < count {
                line.push(',');
            }
            w.writeln(&line);
        }
        w.dedent();
        w.writeln("};");
    }

    // ------------------------------------------------------------------
    // Per-type header
    // ------------------------------------------------------------------

    /// Relative include of another type's header, or `None` when the type needs none.
    fn include_for(&self, from_scope: &str, name: &TypeName, own: &TypeName) -> Option<String> {
        if name == own || self.model.is_native(name) || self.model.is_enum(name) {
            return None;
        }
        let scope = naming::scope_name(&name.scope);
        let file = naming::type_file(name);
        Some(if scope == from_scope {
            format!("#include \"{}.hpp\"", file)
        } else {
            format!("#include \"../{}/{}.hpp\"", scope, file)
        })
    }

    /// Named types mentioned by a signature, primitives resolved through the core library.
    fn sig_names(&self, sig: &TypeSig, out: &mut Vec<TypeName>) {
        match sig {
            TypeSig::Pointer(inner) | TypeSig::ByRef(inner) | TypeSig::SzArray(inner) => {
                self.sig_names(inner, out)
            }
            TypeSig::Void => {}
            other => match self.model.primitive_type(other) {
                Some(name) => out.push(name),
                None => other.referenced_names(out),
            },
        }
    }

    fn header(&self, module: &ModuleDescriptor, ty: &TypeDescriptor) -> EmittedFile {
        let mut w = self.writer();
        w.writeln("#pragma once");
        w.writeln(&format!("#include \"{}\"", FORWARD_DECLARES));

        if ty.native.is_some() || ty.is_enum() {
            w.newline();
            w.writeln(&format!("/* Defined in '{}' */", FORWARD_DECLARES));
        } else {
            let mut dependencies = Vec::new();
            dependencies.extend(ty.interfaces.iter().cloned());
            dependencies.extend(ty.base.iter().cloned());
            for field in ty.fields.iter().filter(|f| !f.is_static) {
                if !naming::is_pointer_like(&field.ty, self.model) {
                    self.sig_names(&field.ty, &mut dependencies);
                }
            }
            let includes: BTreeSet<String> = dependencies
                .iter()
                .filter_map(|name| self.include_for(&module.scope, name, &ty.name))
                .collect();
            for line in &includes {
                w.writeln(line);
            }
            w.newline();
            self.write_type_definition(&mut w, ty);
        }

        EmittedFile {
            path: format!("{}/{}.hpp", module.scope, naming::type_file(&ty.name)),
            contents: w.finish(),
        }
    }

    fn write_type_definition(&self, w: &mut SourceWriter, ty: &TypeDescriptor) {
        let name = naming::type_name(&ty.name);
        if ty.is_value_type() {
            w.writeln(&format!("struct {}", name));
        } else {
            let derived: Vec<String> = ty
                .interfaces
                .iter()
                .chain(ty.base.iter())
                .map(|b| format!("public {}", naming::type_name(b)))
                .collect();
            if derived.is_empty() {
                w.writeln(&format!("class {}", name));
            } else {
                w.writeln(&format!("class {} : {}", name, derived.join(", ")));
            }
        }
        w.writeln("{");

        // Locals of a struct are zero-initialized with `= {}`, which needs a default constructor.
        let default_ctor = ty.is_value_type()
            && ty.methods.iter().any(|m| m.is_constructor)
            && !ty.methods.iter().any(|m| m.is_constructor && m.params.is_empty());
        for visibility in Visibility::ORDER {
            let fields: Vec<_> = ty.fields_with(visibility).collect();
            let methods: Vec<_> = ty.methods_with(visibility).collect();
            let public = visibility == Visibility::Public;
            let runtime_type = public && ty.is_root_object();
            if fields.is_empty() && methods.is_empty() && !runtime_type && !(public && default_ctor) {
                continue;
            }
            w.writeln(&format!("{}:", visibility.keyword()));
            w.indent();
            if runtime_type {
                w.writeln("void* RuntimeType;");
            }
            if public && default_ctor {
                w.writeln(&format!("{}() = default;", name));
            }
            for field in fields {
                w.writeln(&format!(
                    "{} {};",
                    self.type_ref(&field.ty),
                    naming::field_name(&field.name)
                ));
            }
            for method in methods {
                w.writeln(&format!("{};", self.method_declaration(ty, method)));
            }
            w.dedent();
        }
        w.writeln("};");

        let statics: Vec<_> = ty.static_fields().collect();
        if !statics.is_empty() {
            w.newline();
            for field in statics {
                w.writeln(&format!(
                    "extern {} {};",
                    self.type_ref(&field.ty),
                    naming::static_field_name(&field.to_ref(), self.model)
                ));
            }
        }
    }

    fn param_name(method: &MethodDescriptor, index: usize) -> String {
        match method.params.get(index) {
            Some(p) if !p.name.is_empty() => naming::param_name(&p.name),
            _ => format!("p_{}", index),
        }
    }

    fn parameter_list(&self, method: &MethodDescriptor) -> String {
        method
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} {}", self.type_ref(&p.ty), Self::param_name(method, i)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn method_declaration(&self, ty: &TypeDescriptor, method: &MethodDescriptor) -> String {
        let params = self.parameter_list(method);
        if method.is_constructor {
            return format!("{}({})", naming::type_name(&ty.name), params);
        }
        let mut decl = String::new();
        if method.is_static {
            decl.push_str("static ");
        } else if method.is_virtual || method.is_abstract {
            decl.push_str("virtual ");
        }
        decl.push_str(&format!(
            "{} {}({})",
            self.type_ref(&method.return_type),
            naming::method_name(&method.to_ref(), self.model),
            params
        ));
        if method.is_abstract {
            decl.push_str(" = 0");
        }
        decl
    }

    // ------------------------------------------------------------------
    // Per-type implementation
    // ------------------------------------------------------------------

    fn body_dependencies(&self, ty: &TypeDescriptor, scope: &str) -> Vec<TypeName> {
        let mut names = Vec::new();
        for field in ty.static_fields() {
            self.sig_names(&field.ty, &mut names);
        }
        for method in &ty.methods {
            self.sig_names(&method.return_type, &mut names);
            for param in &method.params {
                self.sig_names(&param.ty, &mut names);
            }
            let lowered = match self.lowered.get(&(scope, method.token)) {
                Some(lowered) => lowered,
                None => continue,
            };
            for local in &lowered.locals {
                self.sig_names(&local.ty, &mut names);
            }
            for temp in &lowered.temps {
                self.sig_names(temp, &mut names);
            }
            for init in &lowered.initializers {
                match &init.target {
                    InitializerTarget::Base(sig) => self.sig_names(sig, &mut names),
                    InitializerTarget::Member(field) => self.sig_names(&field.signature, &mut names),
                }
                for arg in &init.args {
                    self.operand_names(arg, &mut names);
                }
            }
            for op in &lowered.operations {
                match op {
                    Operation::Eval(call) => self.method_names(&call.method, &mut names),
                    Operation::Assign {
                        target: Slot::Field { field, .. },
                        ..
                    }
                    | Operation::Assign {
                        target: Slot::StaticField(field),
                        ..
                    } => self.sig_names(&field.parent, &mut names),
                    _ => {}
                }
                for operand in op.operands() {
                    self.operand_names(operand, &mut names);
                }
            }
        }
        names
    }

    fn method_names(&self, method: &MethodRef, out: &mut Vec<TypeName>) {
        self.sig_names(&method.parent, out);
        self.sig_names(&method.return_type, out);
        for param in &method.params {
            self.sig_names(param, out);
        }
    }

    fn operand_names(&self, operand: &Operand, out: &mut Vec<TypeName>) {
        match operand {
            Operand::Field { field, .. }
            | Operand::FieldAddress { field, .. }
            | Operand::StaticField(field)
            | Operand::StaticFieldAddress(field) => {
                self.sig_names(&field.parent, out);
                self.sig_names(&field.signature, out);
            }
            Operand::Zero(sig)
            | Operand::SizeOf(sig)
            | Operand::Convert { to: sig, .. }
            | Operand::Cast { to: sig, .. }
            | Operand::NewArray { element: sig, .. } => self.sig_names(sig, out),
            Operand::Call(call) => self.method_names(&call.method, out),
            Operand::New { ty, ctor, .. } => {
                self.sig_names(ty, out);
                self.method_names(ctor, out);
            }
            _ => {}
        }
        for child in operand.children() {
            self.operand_names(child, out);
        }
    }

    fn source(&self, module: &ModuleDescriptor, ty: &TypeDescriptor) -> Result<EmittedFile, EmitError> {
        let file = naming::type_file(&ty.name);
        let mut w = self.writer();
        w.writeln(&format!("#include \"{}.hpp\"", file));

        let plain = ty.native.is_none() && !ty.is_enum();
        if plain {
            let mut includes: BTreeSet<String> = self
                .body_dependencies(ty, &module.scope)
                .iter()
                .filter_map(|name| self.include_for(&module.scope, name, &ty.name))
                .collect();
            let stack_alloc = ty
                .methods
                .iter()
                .filter_map(|m| self.lowered.get(&(module.scope.as_str(), m.token)))
                .any(|m| uses_stack_alloc(m));
            if stack_alloc {
                includes.insert(include_line("alloca.h"));
            }
            for line in &includes {
                w.writeln(line);
            }

            let statics: Vec<_> = ty.static_fields().collect();
            if !statics.is_empty() {
                w.newline();
                for field in statics {
                    let value = match field.constant {
                        Some(constant) => constant_literal(constant, &field.ty),
                        None => "{}".into(),
                    };
                    w.writeln(&format!(
                        "{} {} = {};",
                        self.type_ref(&field.ty),
                        naming::static_field_name(&field.to_ref(), self.model),
                        value
                    ));
                }
            }

            for method in ty.methods.iter().filter(|m| !m.is_abstract) {
                w.newline();
                self.write_method(&mut w, module, ty, method)?;
            }
        }

        Ok(EmittedFile {
            path: format!("{}/{}.cpp", module.scope, file),
            contents: w.finish(),
        })
    }

    fn write_method(
        &self,
        w: &mut SourceWriter,
        module: &ModuleDescriptor,
        ty: &TypeDescriptor,
        method: &MethodDescriptor,
    ) -> Result<(), EmitError> {
        let type_name = naming::type_name(&ty.name);
        let params = self.parameter_list(method);
        let lowered = self.lowered.get(&(module.scope.as_str(), method.token)).copied();

        let signature = if method.is_constructor {
            format!("{0}::{0}({1})", type_name, params)
        } else {
            format!(
                "{} {}::{}({})",
                self.type_ref(&method.return_type),
                type_name,
                naming::method_name(&method.to_ref(), self.model),
                params
            )
        };

        let lowered = match lowered {
            Some(lowered) => lowered,
            None => {
                w.writeln(&signature);
                w.writeln("{");
                w.indent();
                if method.is_external {
                    match self.shims.lookup(&ty.name.full_name(), &method.name) {
                        Some(body) => {
                            for line in body {
                                w.writeln(line);
                            }
                        }
                        None => tracing::warn!(
                            method = %method.display_name(),
                            "externally implemented method has no shim, emitting an empty body"
                        ),
                    }
                }
                w.dedent();
                w.writeln("}");
                return Ok(());
            }
        };

        let scope = BodyScope {
            ty,
            method,
            lowered,
            locals: naming::local_names(lowered.locals.iter().map(|l| (l.index, l.name.as_deref()))),
        };

        if lowered.initializers.is_empty() {
            w.writeln(&signature);
        } else {
            w.writeln(&format!("{} :", signature));
            w.indent();
            let count = lowered.initializers.len();
            for (i, init) in lowered.initializers.iter().enumerate() {
                let target = match &init.target {
                    InitializerTarget::Base(sig) => self.base_name(sig),
                    InitializerTarget::Member(field) => naming::field_name(&field.name),
                };
                let args = self.render_args(&scope, &init.args);
                let separator = if i + 1 < count { "," } else { "" };
                w.writeln(&format!("{}({}){}", target, args, separator));
            }
            w.dedent();
        }

        w.writeln("{");
        w.indent();
        for local in &lowered.locals {
            let init = if lowered.init_locals { " = {}" } else { "" };
            w.writeln(&format!(
                "{} {}{};",
                self.type_ref(&local.ty),
                Self::local_name(&scope, local.index),
                init
            ));
        }
        for (index, temp) in lowered.temps.iter().enumerate() {
            w.writeln(&format!("{} {};", self.type_ref(temp), naming::temp_name(index as u32)));
        }
        for op in &lowered.operations {
            if let Some(line) = self.render_operation(&scope, op)? {
                w.writeln(&line);
            }
        }
        w.dedent();
        w.writeln("}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements and expressions
    // ------------------------------------------------------------------

    fn render_operation(&self, scope: &BodyScope<'_>, op: &Operation) -> Result<Option<String>, EmitError> {
        let line = match op {
            Operation::Label(label) => format!("{}:;", naming::label_name(label.0)),
            Operation::Assign { target, value } => {
                format!("{} = {};", self.render_slot(scope, target), self.render_operand(scope, value))
            }
            Operation::Eval(call) if call.method.is_constructor() => {
                return self.render_constructor_call(scope, call)
            }
            Operation::Eval(call) => format!("{};", self.render_call(scope, call)),
            Operation::Branch(label) => format!("goto {};", naming::label_name(label.0)),
            Operation::BranchIf { condition, target } => format!(
                "if ({}) goto {};",
                self.render_condition(scope, condition),
                naming::label_name(target.0)
            ),
            Operation::Return(None) => "return;".into(),
            Operation::Return(Some(value)) => format!("return {};", self.render_operand(scope, value)),
            Operation::Throw(value) => format!("throw {};", self.render_operand(scope, value)),
        };
        Ok(Some(line))
    }

    /// Constructor calls left in a body: in-place construction of a value, or chaining to
    /// a base constructor that was not part of the leading initializer run.
    fn render_constructor_call(&self, scope: &BodyScope<'_>, call: &Call) -> Result<Option<String>, EmitError> {
        let constructed = self.base_name(&call.method.parent);
        let args = self.render_args(scope, &call.args);
        match &call.receiver {
            Some(Operand::This) if scope.ty.is_value_type() && call.method.parent == scope.ty.signature() => {
                Ok(Some(format!("*this = {}({});", constructed, args)))
            }
            Some(Operand::This) if call.args.is_empty() => {
                tracing::debug!(
                    method = %scope.method.display_name(),
                    base = %constructed,
                    "dropping default base constructor call outside the initializer list"
                );
                Ok(None)
            }
            Some(Operand::This) => Err(EmitError::Unrenderable {
                method: scope.method.display_name(),
                construct: format!("base constructor call {}({}) after other statements", constructed, args),
            }),
            Some(address) => Ok(Some(format!(
                "{} = {}({});",
                self.render_storage(scope, address),
                constructed,
                args
            ))),
            None => Err(EmitError::Unrenderable {
                method: scope.method.display_name(),
                construct: format!("constructor call {} without receiver", constructed),
            }),
        }
    }

    fn local_name(scope: &BodyScope<'_>, index: u16) -> String {
        scope
            .locals
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("local{}", index))
    }

    /// The storage an address operand points at, as an lvalue.
    fn render_storage(&self, scope: &BodyScope<'_>, address: &Operand) -> String {
        match address {
            Operand::LocalAddress(i) => Self::local_name(scope, *i),
            Operand::ArgAddress(i) => Self::param_name(scope.method, *i as usize),
            Operand::FieldAddress {
                receiver,
                accessor,
                field,
            } => format!(
                "{}{}{}",
                self.render_wrapped(scope, receiver),
                accessor.as_str(),
                naming::field_name(&field.name)
            ),
            Operand::StaticFieldAddress(field) => naming::static_field_name(field, self.model),
            Operand::This => "*this".into(),
            other => format!("*{}", self.render_wrapped(scope, other)),
        }
    }

    fn render_slot(&self, scope: &BodyScope<'_>, slot: &Slot) -> String {
        match slot {
            Slot::Local(i) => Self::local_name(scope, *i),
            Slot::Arg(i) => Self::param_name(scope.method, *i as usize),
            Slot::Temp(i) => naming::temp_name(*i),
            Slot::Field {
                receiver,
                accessor,
                field,
            } => format!(
                "{}{}{}",
                self.render_wrapped(scope, receiver),
                accessor.as_str(),
                naming::field_name(&field.name)
            ),
            Slot::StaticField(field) => naming::static_field_name(field, self.model),
            Slot::Indirect(address) => self.render_storage(scope, address),
        }
    }

    fn render_condition(&self, scope: &BodyScope<'_>, condition: &Condition) -> String {
        match condition {
            Condition::True(value) => self.render_operand(scope, value),
            Condition::False(value) => format!("!{}", self.render_wrapped(scope, value)),
            Condition::Compare { op, left, right } => format!(
                "{} {} {}",
                self.render_wrapped(scope, left),
                op.as_str(),
                self.render_wrapped(scope, right)
            ),
        }
    }

    fn render_args(&self, scope: &BodyScope<'_>, args: &[Operand]) -> String {
        args.iter()
            .map(|arg| self.render_operand(scope, arg))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Receiver prefix of an instance call: storage addresses call through `.`.
    fn render_receiver(&self, scope: &BodyScope<'_>, receiver: &Operand) -> String {
        match receiver {
            Operand::This => "this->".into(),
            Operand::LocalAddress(_)
            | Operand::ArgAddress(_)
            | Operand::FieldAddress { .. }
            | Operand::StaticFieldAddress(_) => format!("{}.", self.render_storage(scope, receiver)),
            other => format!("{}->", self.render_wrapped(scope, other)),
        }
    }

    fn render_call(&self, scope: &BodyScope<'_>, call: &Call) -> String {
        let name = naming::method_name(&call.method, self.model);
        let args = self.render_args(scope, &call.args);
        let owner = self.base_name(&call.method.parent);
        match (call.kind, &call.receiver) {
            (CallKind::Static, _) | (_, None) => format!("{}::{}({})", owner, name, args),
            (CallKind::Direct, Some(receiver)) => format!(
                "{}{}::{}({})",
                self.render_receiver(scope, receiver),
                owner,
                name,
                args
            ),
            (CallKind::Virtual, Some(receiver)) => {
                format!("{}{}({})", self.render_receiver(scope, receiver), name, args)
            }
        }
    }

    fn render_wrapped(&self, scope: &BodyScope<'_>, op: &Operand) -> String {
        let text = self.render_operand(scope, op);
        if is_compound(op) {
            format!("({})", text)
        } else {
            text
        }
    }

    fn render_operand(&self, scope: &BodyScope<'_>, op: &Operand) -> String {
        match op {
            Operand::This => "this".into(),
            Operand::Arg(i) => Self::param_name(scope.method, *i as usize),
            Operand::ArgAddress(i) => format!("&{}", Self::param_name(scope.method, *i as usize)),
            Operand::Local(i) => Self::local_name(scope, *i),
            Operand::LocalAddress(i) => format!("&{}", Self::local_name(scope, *i)),
            Operand::Temp(i) => naming::temp_name(*i),
            Operand::Int32(v) => int32_literal(*v),
            Operand::Int64(v) => int64_literal(*v),
            Operand::Float32(v) => float_literal(*v as f64, "f"),
            Operand::Float64(v) => float_literal(*v, ""),
            Operand::Null => "NULL".into(),
            Operand::String(s) => format!("std::string(\"{}\")", escape_cpp_string(s)),
            Operand::Zero(_) => "{}".into(),
            Operand::Field {
                receiver,
                accessor,
                field,
            } => format!(
                "{}{}{}",
                self.render_wrapped(scope, receiver),
                accessor.as_str(),
                naming::field_name(&field.name)
            ),
            Operand::FieldAddress { .. } | Operand::StaticFieldAddress(_) => {
                format!("&{}", self.render_storage(scope, op))
            }
            Operand::StaticField(field) => naming::static_field_name(field, self.model),
            Operand::Binary { op, left, right } => format!(
                "{} {} {}",
                self.render_wrapped(scope, left),
                op.as_str(),
                self.render_wrapped(scope, right)
            ),
            Operand::Unary { op, operand } if is_negative_literal(operand) => {
                format!("{}({})", op.as_str(), self.render_operand(scope, operand))
            }
            Operand::Unary { op, operand } => {
                format!("{}{}", op.as_str(), self.render_wrapped(scope, operand))
            }
            Operand::Compare { op, left, right } => format!(
                "({} {} {}) ? 1 : 0",
                self.render_wrapped(scope, left),
                op.as_str(),
                self.render_wrapped(scope, right)
            ),
            Operand::Convert { to, operand } => {
                format!("({}){}", self.type_ref(to), self.render_wrapped(scope, operand))
            }
            Operand::Cast {
                kind: CastKind::Value,
                to,
                operand,
            } => format!("({}){}", self.type_ref(to), self.render_wrapped(scope, operand)),
            Operand::Cast {
                kind: CastKind::Reference,
                to,
                operand,
            } => format!(
                "dynamic_cast<{}>({})",
                self.type_ref(to),
                self.render_operand(scope, operand)
            ),
            Operand::SizeOf(ty) => format!("sizeof({})", self.type_ref(ty)),
            Operand::Call(call) => self.render_call(scope, call),
            Operand::New { ty, args, .. } => {
                let args = self.render_args(scope, args);
                if naming::is_pointer_like(ty, self.model) {
                    format!("new {}({})", self.base_name(ty), args)
                } else {
                    format!("{}({})", self.base_name(ty), args)
                }
            }
            Operand::NewArray { element, length } => format!(
                "new {}[{}]",
                self.type_ref(element),
                self.render_operand(scope, length)
            ),
            Operand::StackAlloc(size) => format!(
                "({}*)alloca({})",
                self.base_name(&TypeSig::U1),
                self.render_operand(scope, size)
            ),
        }
    }

    // ------------------------------------------------------------------
    // __Main.cpp
    // ------------------------------------------------------------------

    /// Static constructors with bodies, referenced modules before the modules that load them.
    fn static_constructors(&self) -> Vec<(&'a TypeDescriptor, &'a MethodDescriptor)> {
        let model: &'a DescriptorModel = self.model;
        model
            .modules
            .iter()
            .rev()
            .flat_map(|m| m.types.iter())
            .filter(|ty| ty.native.is_none() && !ty.is_enum())
            .flat_map(|ty| {
                ty.methods
                    .iter()
                    .filter(|m| m.is_static_constructor && m.body.is_some())
                    .map(move |m| (ty, m))
            })
            .collect()
    }

    fn main_file(&self) -> Result<EmittedFile, EmitError> {
        let module = self
            .model
            .modules
            .iter()
            .find(|m| m.entry_point.is_some())
            .ok_or_else(|| {
                EmitError::MissingEntryPoint(
                    self.model
                        .modules
                        .first()
                        .map(|m| m.name.clone())
                        .unwrap_or_default(),
                )
            })?;
        let token = module.entry_point.unwrap_or_default();
        let (ty, method) = module
            .find_method(token)
            .ok_or(EmitError::UnknownEntryPoint(token))?;

        let args = vec!["nullptr"; method.params.len()].join(", ");
        let call = format!(
            "{}::{}({})",
            naming::type_name(&ty.name),
            naming::method_name(&method.to_ref(), self.model),
            args
        );

        let mut includes = Vec::new();
        let mut initializers = Vec::new();
        for (owner, cctor) in self.static_constructors() {
            if let Some(line) = self.include_for(&module.scope, &owner.name, &ty.name) {
                if !includes.contains(&line) {
                    includes.push(line);
                }
            }
            initializers.push(format!(
                "{}::{}();",
                naming::type_name(&owner.name),
                naming::method_name(&cctor.to_ref(), self.model)
            ));
        }

        let mut w = self.writer();
        w.writeln(&format!("#include \"{}.hpp\"", naming::type_file(&ty.name)));
        for line in &includes {
            w.writeln(line);
        }
        w.newline();
        w.writeln("int main()");
        w.writeln("{");
        w.indent();
        for line in &initializers {
            w.writeln(line);
        }
        if method.return_type.is_integer() {
            w.writeln(&format!("return (int){};", call));
        } else {
            w.writeln(&format!("{};", call));
            w.writeln("return 0;");
        }
        w.dedent();
        w.writeln("}");

        Ok(EmittedFile {
            path: format!("{}/{}", module.scope, MAIN_FILE),
            contents: w.finish(),
        })
    }
}
