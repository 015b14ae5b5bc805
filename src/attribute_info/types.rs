use serde::{Deserialize, Serialize};

use crate::type_info::TypeName;

use super::parser::native_type_parser;

/// A custom attribute as stored in metadata: the attribute type plus its raw value blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomAttribute {
    #[serde(rename = "type")]
    pub attribute_type: TypeName,
    #[serde(with = "hex", default)]
    pub blob: Vec<u8>,
}

pub const NATIVE_TYPE_ATTRIBUTE: &str = "NativeTypeAttribute";

impl CustomAttribute {
    pub fn is_native_type(&self) -> bool {
        self.attribute_type.name == NATIVE_TYPE_ATTRIBUTE
    }

    /// Decode the blob as a native type annotation.
    pub fn native_type(&self) -> Result<NativeTypeAttribute, String> {
        match native_type_parser(&self.blob) {
            Ok((rest, attr)) if rest.is_empty() => Ok(attr),
            Ok((rest, _)) => Err(format!("{} trailing bytes after attribute value", rest.len())),
            Err(e) => Err(format!("malformed attribute value: {:?}", e)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NativeTarget {
    C,
    Cpp,
    Other(i32),
}

impl From<i32> for NativeTarget {
    fn from(value: i32) -> Self {
        match value {
            0 => NativeTarget::C,
            1 => NativeTarget::Cpp,
            other => NativeTarget::Other(other),
        }
    }
}

/// Payload of the native type annotation: the target language spelling of the type
/// and the headers it needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeTypeAttribute {
    pub target: NativeTarget,
    pub native_type: String,
    pub headers: Vec<String>,
}
