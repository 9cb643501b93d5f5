//! # Symbol Table
//!
//! Append-only bidirectional string <-> integer interning. Every symbol
//! value that crosses an opcode boundary is a `SymbolId`, never a raw
//! string, so instruction cells stay fixed-width (spec: "Symbol ids vs
//! strings").
//!
//! Reads are lock-free-ish (shared `RwLock` read guard); inserts take the
//! write lock briefly. Ids are stable for the process lifetime: once
//! assigned, a symbol never moves and is never reused.

use parking_lot::RwLock;
use std::collections::HashMap;

/// An interned string id. Stable for the lifetime of the owning
/// `SymbolTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

#[derive(Default)]
struct Inner {
    strings: Vec<String>,
    lookup: HashMap<String, SymbolId>,
}

/// Append-only string interner shared across a single evaluation run.
#[derive(Default)]
pub struct SymbolTable {
    inner: RwLock<Inner>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern `s`, returning its existing id if already present.
    pub fn intern(&self, s: &str) -> SymbolId {
        if let Some(&id) = self.inner.read().lookup.get(s) {
            return id;
        }
        let mut inner = self.inner.write();
        // Re-check: another writer may have interned `s` between the read
        // unlock above and acquiring the write lock.
        if let Some(&id) = inner.lookup.get(s) {
            return id;
        }
        let id = SymbolId(inner.strings.len() as u32);
        inner.strings.push(s.to_string());
        inner.lookup.insert(s.to_string(), id);
        id
    }

    /// Resolve an id back to its string. Panics if `id` was never issued by
    /// this table (a compiler bug, per spec's "relation-not-found... fatal
    /// (compiler bug)" stance on broken cross-references).
    pub fn resolve(&self, id: SymbolId) -> String {
        self.inner.read().strings[id.0 as usize].clone()
    }

    pub fn try_resolve(&self, id: SymbolId) -> Option<String> {
        self.inner.read().strings.get(id.0 as usize).cloned()
    }

    /// Look up an already-interned string without inserting it.
    pub fn lookup(&self, s: &str) -> Option<SymbolId> {
        self.inner.read().lookup.get(s).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let table = SymbolTable::new();
        let a = table.intern("edge");
        let b = table.intern("edge");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let table = SymbolTable::new();
        let a = table.intern("edge");
        let b = table.intern("path");
        assert_ne!(a, b);
        assert_eq!(table.resolve(a), "edge");
        assert_eq!(table.resolve(b), "path");
    }

    #[test]
    fn lookup_does_not_insert() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup("missing"), None);
        assert_eq!(table.len(), 0);
    }
}
