//! Translator from CIL module images to C++ source trees.
//!
//! A module image is a JSON rendition of a managed module's metadata (types, fields,
//! methods, bytecode bodies and the token table). [`translate::Translator`] lowers every
//! method body into an expression IR and emits one header/implementation pair per type.

use std::fs::File;
use std::io::{prelude::*, BufReader};
use std::path::Path;

#[macro_use]
extern crate nom;

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod constant_info;
pub mod field_info;
pub mod method_info;
pub mod type_info;

pub mod code_attribute;

pub mod error;
pub mod metadata;
pub mod symbols;
pub mod translate;
pub mod types;

pub use error::LoadError;
pub use metadata::MetadataReader;
pub use symbols::SymbolTable;
pub use types::*;

/// Load a module image from a JSON file.
///
/// ```rust
/// match cil2cpp::load_module("./does-not-exist.json") {
///     Ok(module) => println!("loaded {}", module.name),
///     Err(ex) => println!("Failed to load: {}", ex),
/// };
/// ```
pub fn load_module<P: AsRef<Path>>(path: P) -> Result<ModuleImage, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = BufReader::new(file);
    load_module_from_reader(&mut reader)
}

/// Load a module image from any reader.
///
/// ```rust
/// let mut reader = "this_will_be_parsed_as_a_module".as_bytes();
/// let result = cil2cpp::load_module_from_reader(&mut reader);
/// assert!(result.is_err());
/// ```
pub fn load_module_from_reader<T: Read>(reader: &mut T) -> Result<ModuleImage, LoadError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(LoadError::Read)?;

    serde_json::from_slice(&bytes).map_err(|source| LoadError::Parse {
        what: "module image".into(),
        source,
    })
}

/// Load a debug symbol table from a JSON file.
pub fn load_symbols<P: AsRef<Path>>(path: P) -> Result<SymbolTable, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| LoadError::Parse {
        what: format!("symbols {}", path.display()),
        source,
    })
}

/// Symbols stored next to a module image: `Foo.json` pairs with `Foo.symbols.json`.
/// A missing or malformed side file is not an error; names fall back to indices.
pub fn load_symbols_beside<P: AsRef<Path>>(module_path: P) -> Option<SymbolTable> {
    let module_path = module_path.as_ref();
    let stem = module_path.file_stem()?.to_string_lossy();
    let candidate = module_path.with_file_name(format!("{}.symbols.json", stem));
    if !candidate.exists() {
        tracing::debug!(path = %candidate.display(), "no debug symbols");
        return None;
    }
    match load_symbols(&candidate) {
        Ok(symbols) => Some(symbols),
        Err(e) => {
            tracing::warn!(path = %candidate.display(), error = %e, "ignoring unreadable debug symbols");
            None
        }
    }
}
