//! Symbol interning.

use crate::value::SymbolId;
use std::collections::HashMap;

/// Prefix of generated symbol names. Generated names are deliberately not
/// entered in the intern map, so `(intern "#G:1")` yields a different id
/// than the first `gensym` call.
const GENSYM_PREFIX: &str = "#G:";

/// Intern table: name to small integer id and back.
pub struct SymbolManager {
    names: Vec<String>,
    ids: HashMap<String, SymbolId>,
    gensym_counter: u32,
}

impl Default for SymbolManager {
    fn default() -> SymbolManager {
        SymbolManager::new()
    }
}

impl SymbolManager {
    pub fn new() -> SymbolManager {
        SymbolManager {
            names: Vec::new(),
            ids: HashMap::new(),
            gensym_counter: 0,
        }
    }

    /// Idempotent: interning the same name twice yields the same id.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Allocate a fresh uninterned symbol (`#G:1`, `#G:2`, ...).
    pub fn gensym(&mut self) -> SymbolId {
        self.gensym_counter += 1;
        let id = SymbolId(self.names.len() as u32);
        self.names.push(format!("{}{}", GENSYM_PREFIX, self.gensym_counter));
        id
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut syms = SymbolManager::new();
        let a = syms.intern("symbol");
        let b = syms.intern("symbol");
        assert_eq!(a, b);
        assert_eq!(syms.name(a), "symbol");
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        let mut syms = SymbolManager::new();
        let a = syms.intern("symbol");
        let b = syms.intern("otherSymbol");
        assert_ne!(a, b);
    }

    #[test]
    fn test_gensym_is_not_interned() {
        let mut syms = SymbolManager::new();
        let g = syms.gensym();
        assert_eq!(syms.name(g), "#G:1");
        // Interning the printed name must produce a different symbol.
        let same_name = syms.intern("#G:1");
        assert_ne!(g, same_name);
        assert_ne!(syms.gensym(), g);
    }
}
