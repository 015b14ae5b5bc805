//! Textual type references and signatures.
//!
//! Type references are written `[scope]Namespace.Name` (nested types joined with `/`).
//! Signatures follow ILDasm spelling: `int32`, `string`, `class [s]N.T`,
//! `valuetype [s]N.S`, suffixed with `*`, `&` or `[]`, and generic instances as
//! `class [s]N.List`1<int32>`.

use std::fmt;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, opt, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, terminated},
    Err as BaseErr, IResult,
};
use serde::{Deserialize, Serialize};

type Err<E> = BaseErr<Error<E>>;

/// Identity of a type: declaring scope plus namespace-qualified name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeName {
    pub scope: String,
    pub namespace: String,
    pub name: String,
}

impl TypeName {
    pub fn new(scope: &str, namespace: &str, name: &str) -> Self {
        Self {
            scope: scope.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `Namespace.Name`, or just `Name` for the global namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is(&self, full_name: &str) -> bool {
        self.full_name() == full_name
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.scope, self.full_name())
    }
}

impl From<TypeName> for String {
    fn from(name: TypeName) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for TypeName {
    type Error = SignatureError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl FromStr for TypeName {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(type_name_parser)(s.trim())
            .map(|(_, name)| name)
            .map_err(|_| SignatureError(s.to_string()))
    }
}

/// A type signature as it appears in field, local, parameter and member references.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    IntPtr,
    UIntPtr,
    String,
    Object,
    Class(TypeName),
    ValueType(TypeName),
    GenericInst {
        definition: TypeName,
        value_type: bool,
        args: Vec<TypeSig>,
    },
    Pointer(Box<TypeSig>),
    ByRef(Box<TypeSig>),
    SzArray(Box<TypeSig>),
}

const PRIMITIVES: &[(&str, TypeSig)] = &[
    ("void", TypeSig::Void),
    ("bool", TypeSig::Boolean),
    ("char", TypeSig::Char),
    ("int8", TypeSig::I1),
    ("uint8", TypeSig::U1),
    ("int16", TypeSig::I2),
    ("uint16", TypeSig::U2),
    ("int32", TypeSig::I4),
    ("uint32", TypeSig::U4),
    ("int64", TypeSig::I8),
    ("uint64", TypeSig::U8),
    ("float32", TypeSig::R4),
    ("float64", TypeSig::R8),
    ("intptr", TypeSig::IntPtr),
    ("uintptr", TypeSig::UIntPtr),
    ("string", TypeSig::String),
    ("object", TypeSig::Object),
];

impl TypeSig {
    /// `System.*` name of the core library type backing a primitive signature.
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeSig::Void => "Void",
            TypeSig::Boolean => "Boolean",
            TypeSig::Char => "Char",
            TypeSig::I1 => "SByte",
            TypeSig::U1 => "Byte",
            TypeSig::I2 => "Int16",
            TypeSig::U2 => "UInt16",
            TypeSig::I4 => "Int32",
            TypeSig::U4 => "UInt32",
            TypeSig::I8 => "Int64",
            TypeSig::U8 => "UInt64",
            TypeSig::R4 => "Single",
            TypeSig::R8 => "Double",
            TypeSig::IntPtr => "IntPtr",
            TypeSig::UIntPtr => "UIntPtr",
            TypeSig::String => "String",
            TypeSig::Object => "Object",
            _ => return None,
        })
    }

    /// Reference semantics: objects, strings, classes and reference generic instances.
    pub fn is_reference(&self) -> bool {
        match self {
            TypeSig::String | TypeSig::Object | TypeSig::Class(_) | TypeSig::SzArray(_) => true,
            TypeSig::GenericInst { value_type, .. } => !value_type,
            _ => false,
        }
    }

    pub fn is_indirection(&self) -> bool {
        matches!(self, TypeSig::Pointer(_) | TypeSig::ByRef(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeSig::R4 | TypeSig::R8)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeSig::Boolean
                | TypeSig::Char
                | TypeSig::I1
                | TypeSig::U1
                | TypeSig::I2
                | TypeSig::U2
                | TypeSig::I4
                | TypeSig::U4
                | TypeSig::I8
                | TypeSig::U8
                | TypeSig::IntPtr
                | TypeSig::UIntPtr
        )
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            TypeSig::Boolean
                | TypeSig::Char
                | TypeSig::U1
                | TypeSig::U2
                | TypeSig::U4
                | TypeSig::U8
                | TypeSig::UIntPtr
        )
    }

    pub fn is_signed_integer(&self) -> bool {
        self.is_integer() && !self.is_unsigned()
    }

    /// Same-width integer of the opposite signedness.
    pub fn flip_signedness(&self) -> TypeSig {
        match self {
            TypeSig::I1 => TypeSig::U1,
            TypeSig::U1 | TypeSig::Boolean => TypeSig::I1,
            TypeSig::I2 => TypeSig::U2,
            TypeSig::U2 | TypeSig::Char => TypeSig::I2,
            TypeSig::I4 => TypeSig::U4,
            TypeSig::U4 => TypeSig::I4,
            TypeSig::I8 => TypeSig::U8,
            TypeSig::U8 => TypeSig::I8,
            TypeSig::IntPtr => TypeSig::UIntPtr,
            TypeSig::UIntPtr => TypeSig::IntPtr,
            other => other.clone(),
        }
    }

    /// Width class used for binary numeric promotion: 4, 8, or pointer-sized (0).
    pub fn integer_rank(&self) -> Option<u8> {
        match self {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4 => Some(4),
            TypeSig::I8 | TypeSig::U8 => Some(8),
            TypeSig::IntPtr | TypeSig::UIntPtr => Some(0),
            _ => None,
        }
    }

    /// Named type this signature refers to, looking through indirections.
    pub fn type_name(&self) -> Option<&TypeName> {
        match self {
            TypeSig::Class(name) | TypeSig::ValueType(name) => Some(name),
            TypeSig::GenericInst { definition, .. } => Some(definition),
            TypeSig::Pointer(inner) | TypeSig::ByRef(inner) | TypeSig::SzArray(inner) => {
                inner.type_name()
            }
            _ => None,
        }
    }

    /// Every named type mentioned anywhere in the signature, generic arguments included.
    pub fn referenced_names(&self, out: &mut Vec<TypeName>) {
        match self {
            TypeSig::Class(name) | TypeSig::ValueType(name) => out.push(name.clone()),
            TypeSig::GenericInst {
                definition, args, ..
            } => {
                out.push(definition.clone());
                for arg in args {
                    arg.referenced_names(out);
                }
            }
            TypeSig::Pointer(inner) | TypeSig::ByRef(inner) | TypeSig::SzArray(inner) => {
                inner.referenced_names(out)
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((text, _)) = PRIMITIVES.iter().find(|(_, sig)| sig == self) {
            return f.write_str(text);
        }
        match self {
            TypeSig::Class(name) => write!(f, "class {}", name),
            TypeSig::ValueType(name) => write!(f, "valuetype {}", name),
            TypeSig::GenericInst {
                definition,
                value_type,
                args,
            } => {
                let keyword = if *value_type { "valuetype" } else { "class" };
                write!(f, "{} {}<", keyword, definition)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(">")
            }
            TypeSig::Pointer(inner) => write!(f, "{}*", inner),
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::SzArray(inner) => write!(f, "{}[]", inner),
            _ => Ok(()),
        }
    }
}

impl From<TypeSig> for String {
    fn from(sig: TypeSig) -> Self {
        sig.to_string()
    }
}

impl TryFrom<String> for TypeSig {
    type Error = SignatureError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl FromStr for TypeSig {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(signature_parser)(s.trim())
            .map(|(_, sig)| sig)
            .map_err(|_| SignatureError(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed type signature '{0}'")]
pub struct SignatureError(pub String);

fn scope_parser(input: &str) -> IResult<&str, &str> {
    delimited(char('['), is_not("]"), char(']'))(input)
}

fn is_name_char(c: char) -> bool {
    !matches!(c, '<' | '>' | ',' | '*' | '&' | '[' | ']') && !c.is_whitespace()
}

pub fn type_name_parser(input: &str) -> IResult<&str, TypeName> {
    let (input, scope) = scope_parser(input)?;
    let (input, qualified) = take_while1(is_name_char)(input)?;
    let outer_end = qualified.find('/').unwrap_or(qualified.len());
    let (namespace, name) = match qualified[..outer_end].rfind('.') {
        Some(dot) => (&qualified[..dot], &qualified[dot + 1..]),
        None => ("", qualified),
    };
    if name.is_empty() {
        return Result::Err(Err::Error(Error::new(input, ErrorKind::Verify)));
    }
    Ok((input, TypeName::new(scope, namespace, name)))
}

fn primitive_parser(input: &str) -> IResult<&str, TypeSig> {
    let (rest, word) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    match PRIMITIVES.iter().find(|(text, _)| *text == word) {
        Some((_, sig)) => Ok((rest, sig.clone())),
        None => Result::Err(Err::Error(Error::new(input, ErrorKind::Tag))),
    }
}

fn generic_args_parser(input: &str) -> IResult<&str, Vec<TypeSig>> {
    delimited(
        char('<'),
        separated_list1(delimited(multispace0, char(','), multispace0), signature_parser),
        char('>'),
    )(input)
}

fn named_parser(input: &str) -> IResult<&str, TypeSig> {
    let (input, value_type) = terminated(
        alt((value(false, tag("class")), value(true, tag("valuetype")))),
        multispace1,
    )(input)?;
    let (input, name) = type_name_parser(input)?;
    let (input, args) = opt(generic_args_parser)(input)?;
    let sig = match (args, value_type) {
        (Some(args), value_type) => TypeSig::GenericInst {
            definition: name,
            value_type,
            args,
        },
        (None, true) => TypeSig::ValueType(name),
        (None, false) => TypeSig::Class(name),
    };
    Ok((input, sig))
}

#[derive(Clone, Copy)]
enum Suffix {
    Pointer,
    ByRef,
    Array,
}

pub fn signature_parser(input: &str) -> IResult<&str, TypeSig> {
    let (input, base) = alt((named_parser, primitive_parser))(input)?;
    let (input, suffixes) = many0(preceded(
        multispace0,
        alt((
            map(char('*'), |_| Suffix::Pointer),
            map(char('&'), |_| Suffix::ByRef),
            map(tag("[]"), |_| Suffix::Array),
        )),
    ))(input)?;
    let sig = suffixes.into_iter().fold(base, |inner, suffix| match suffix {
        Suffix::Pointer => TypeSig::Pointer(Box::new(inner)),
        Suffix::ByRef => TypeSig::ByRef(Box::new(inner)),
        Suffix::Array => TypeSig::SzArray(Box::new(inner)),
    });
    Ok((input, sig))
}
