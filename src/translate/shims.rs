//! Hand-written bodies for methods implemented by the runtime rather than bytecode.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Name of the class the runtime type pointer of `System.Object` points to.
pub const RUNTIME_TYPE_BASE: &str = "CIL2CPP_RuntimeTypeBase";

/// One shim as stored in a shim file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimEntry {
    /// Declaring type, namespace-qualified without scope, e.g. `System.Object`.
    #[serde(rename = "type")]
    pub type_name: String,
    pub method: String,
    pub body: Vec<String>,
}

/// Shim bodies keyed by declaring type and method name.
#[derive(Clone, Debug)]
pub struct ShimRegistry {
    bodies: BTreeMap<(String, String), Vec<String>>,
}

impl Default for ShimRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.insert(
            "System.Object",
            "GetType",
            vec![format!(
                "return (({}*)this->RuntimeType)->Type;",
                RUNTIME_TYPE_BASE
            )],
        );
        registry
    }
}

impl ShimRegistry {
    pub fn empty() -> Self {
        Self {
            bodies: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, type_name: &str, method: &str, body: Vec<String>) {
        self.bodies
            .insert((type_name.to_string(), method.to_string()), body);
    }

    pub fn lookup(&self, type_name: &str, method: &str) -> Option<&[String]> {
        self.bodies
            .get(&(type_name.to_string(), method.to_string()))
            .map(|body| body.as_slice())
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Add the entries of a JSON shim file; later entries replace earlier ones.
    pub fn extend_from_path<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<ShimEntry> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| LoadError::Parse {
                what: format!("shims {}", path.display()),
                source,
            })?;
        tracing::debug!(path = %path.display(), count = entries.len(), "loaded shims");
        for entry in entries {
            self.insert(&entry.type_name, &entry.method, entry.body);
        }
        Ok(())
    }
}
