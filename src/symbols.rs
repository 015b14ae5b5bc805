//! Debug symbol side files. Only local variable names are consumed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    #[serde(default)]
    pub methods: BTreeMap<u32, MethodSymbols>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MethodSymbols {
    #[serde(default)]
    pub locals: BTreeMap<u16, String>,
}

impl SymbolTable {
    pub fn local_name(&self, method_token: u32, index: u16) -> Option<&str> {
        self.methods
            .get(&method_token)
            .and_then(|m| m.locals.get(&index))
            .map(String::as_str)
    }

    pub fn insert_local(&mut self, method_token: u32, index: u16, name: &str) {
        self.methods
            .entry(method_token)
            .or_default()
            .locals
            .insert(index, name.into());
    }
}
