//! The scoped symbol table: one stack of name-to-`Symbol` scopes,
//! pushed on entering a method or procedure and popped on exit.
//!
//! A popped scope is kept around (for symbolic names in a listing)
//! when a listing is being produced, and dropped otherwise — mirrored
//! here by simply retaining or discarding the popped `Scope` at the
//! call site rather than by a flag on the table itself.

use std::collections::HashMap;

use crate::forward_ref::SharedRef;
use crate::ir::anode::Target;

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Keyword,
    Define,
    GlobalVar,
    LocalVar,
    Temp,
    Param,
    Property,
    Selector,
    Procedure,
    Extern,
    Class,
    Object,
    StringLiteral,
    Number,
}

/// One symbol table entry. `value` holds a selector/variable-slot
/// number, a define's numeric value, or is unused depending on `kind`.
/// `forward_ref` is populated lazily the first time code references the
/// symbol before its defining node has been emitted; codegen resolves
/// it once that node exists.
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub value: i32,
    pub forward_ref: Option<SharedRef<Target>>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, value: i32) -> Self {
        Symbol {
            name: name.into(),
            kind,
            value,
            forward_ref: None,
        }
    }
}

/// One level of nested scope.
#[derive(Default)]
pub struct Scope {
    symbols: HashMap<String, Symbol>,
}

impl Scope {
    pub fn define(&mut self, symbol: Symbol) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
}

/// The active scope stack: index 0 is the outermost (script-global)
/// scope, the last entry is the innermost.
pub struct SymbolTable {
    stack: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            stack: vec![Scope::default()],
        }
    }

    pub fn push(&mut self) {
        self.stack.push(Scope::default());
    }

    /// Pops the innermost scope, returning it so the caller can retain
    /// it (when producing a listing) or drop it.
    pub fn pop(&mut self) -> Scope {
        debug_assert!(self.stack.len() > 1, "cannot pop the global scope");
        self.stack.pop().unwrap_or_default()
    }

    pub fn define(&mut self, symbol: Symbol) {
        self.stack
            .last_mut()
            .expect("symbol table is never empty")
            .define(symbol);
    }

    /// Looks up `name` from the innermost scope outward, returning the
    /// first match.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.stack.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.stack.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Defines `symbol` in the outermost (script-global) scope no matter
    /// how many scopes are currently pushed. Procedure/class/object names
    /// are never block-local: a forward reference created for one while
    /// compiling a call from inside another procedure's body must outlive
    /// that procedure's scope, which is popped and discarded once its
    /// body finishes compiling.
    pub fn define_global(&mut self, symbol: Symbol) {
        self.stack[0].define(symbol);
    }

    /// Every symbol defined in the outermost (script-global) scope —
    /// the only scope a procedure/class/object forward reference can
    /// live in, since those names are never block-local.
    pub fn global_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.stack[0].symbols()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer_one_of_the_same_name() {
        let mut table = SymbolTable::new();
        table.define(Symbol::new("x", SymbolKind::GlobalVar, 1));
        table.push();
        table.define(Symbol::new("x", SymbolKind::Temp, 2));
        assert_eq!(table.lookup("x").unwrap().value, 2);
        table.pop();
        assert_eq!(table.lookup("x").unwrap().value, 1);
    }

    #[test]
    fn lookup_falls_through_to_an_outer_scope_when_not_shadowed() {
        let mut table = SymbolTable::new();
        table.define(Symbol::new("g", SymbolKind::GlobalVar, 7));
        table.push();
        assert_eq!(table.lookup("g").unwrap().value, 7);
    }

    #[test]
    fn popped_scope_is_returned_to_the_caller_for_optional_retention() {
        let mut table = SymbolTable::new();
        table.push();
        table.define(Symbol::new("t", SymbolKind::Temp, 0));
        let popped = table.pop();
        assert!(popped.get("t").is_some());
        assert!(table.lookup("t").is_none());
    }
}
