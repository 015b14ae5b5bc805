use std::io;
use std::path::PathBuf;

use crate::code_attribute::DecodeError;
use crate::error::LoadError;
use crate::type_info::TypeName;

/// A type, member or literal reference that does not resolve against loaded metadata.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unresolved method token 0x{0:08x}")]
    Method(u32),
    #[error("unresolved field token 0x{0:08x}")]
    Field(u32),
    #[error("unresolved type token 0x{0:08x}")]
    Type(u32),
    #[error("unresolved string token 0x{0:08x}")]
    String(u32),
    #[error("malformed native type annotation on {type_name}: {detail}")]
    NativeAnnotation { type_name: TypeName, detail: String },
}

/// Failures while building descriptors from metadata.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("cannot determine storage kind of {0}: not an enum, class, or value type")]
    UnknownStorageKind(TypeName),
    #[error("enum {0} has no underlying value field")]
    MissingEnumStorage(TypeName),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LowerErrorKind {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no lowering rule for opcode {0}")]
    UnsupportedOpcode(&'static str),
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("{depth} value(s) left on the evaluation stack at method exit")]
    StackNotEmpty { depth: usize },
    #[error("evaluation stack depth {found} does not match depth {expected} at join IL_{target:04x}")]
    StackMismatch {
        target: u32,
        expected: usize,
        found: usize,
    },
    #[error("branch target IL_{0:04x} is not an instruction boundary")]
    InvalidBranchTarget(u32),
    #[error("argument index {0} out of range")]
    InvalidArgument(u16),
    #[error("local index {0} out of range")]
    InvalidLocal(u16),
    #[error("store to the receiver argument")]
    StoreToThis,
    #[error("control falls through the end of the method body")]
    FallsThrough,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A fatal lowering failure, located by method and IL offset.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to lower {method} at IL_{offset:04x}: {kind}")]
pub struct LowerError {
    pub method: String,
    pub offset: u32,
    pub kind: LowerErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("{method}: branch to {label} has no label definition")]
    MissingLabel { method: String, label: String },
    #[error("{method}: label {label} is defined {count} times")]
    DuplicateLabel {
        method: String,
        label: String,
        count: usize,
    },
    #[error("{method}: reference to undeclared temporary {index}")]
    UndeclaredTemp { method: String, index: u32 },
    #[error("{method}: reference to undeclared local {index}")]
    UndeclaredLocal { method: String, index: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("cannot render {construct} in {method}")]
    Unrenderable { method: String, construct: String },
    #[error("executable module {0} has no entry point")]
    MissingEntryPoint(String),
    #[error("entry point 0x{0:08x} is not a method of the module")]
    UnknownEntryPoint(u32),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Top-level failure of a translation run.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error("IR verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error("usage error: {0}")]
    Usage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
