use std::collections::HashMap;

use crate::diagnostics::Span;
use crate::sema::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    UnknownDef,
    Problem,
    Set,
    Param,
    Find,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug)]
struct Scope {
    parent: Option<usize>,
    symbols: HashMap<String, Symbol>,
}

pub type ScopeId = usize;

/// All scopes of one program: a global scope plus one scope per problem.
/// Quantifier binders are tracked separately during type checking.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    pub global: ScopeId,
    pub problem_scopes: HashMap<String, ScopeId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope {
                parent: None,
                symbols: HashMap::new(),
            }],
            global: 0,
            problem_scopes: HashMap::new(),
        }
    }

    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            symbols: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    /// Returns false when the name is already bound in this exact scope.
    pub fn define(&mut self, scope: ScopeId, symbol: Symbol) -> bool {
        let slot = &mut self.scopes[scope].symbols;
        if slot.contains_key(&symbol.name) {
            return false;
        }
        slot.insert(symbol.name.clone(), symbol);
        true
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(symbol) = self.scopes[id].symbols.get(name) {
                return Some(symbol);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    pub fn names(&self, scope: ScopeId) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            out.extend(self.scopes[id].symbols.keys().cloned());
            current = self.scopes[id].parent;
        }
        out.sort();
        out.dedup();
        out
    }

    pub fn set_names(&self, scope: ScopeId) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            out.extend(
                self.scopes[id]
                    .symbols
                    .values()
                    .filter(|sym| sym.kind == SymbolKind::Set)
                    .map(|sym| sym.name.clone()),
            );
            current = self.scopes[id].parent;
        }
        out.sort();
        out.dedup();
        out
    }
}
