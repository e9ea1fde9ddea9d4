//! Lexical scopes and symbol information

use crate::ast::Initializer;
use hashbrown::HashMap;
use scc_common::Span;
use scc_types::{Qualifiers, TypeRef};

/// Index of a scope in the arena
pub type ScopeId = u32;

/// The global scope is always created first.
pub const GLOBAL_SCOPE: ScopeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    /// A function's parameter list.
    Params,
    Block,
}

/// How a declared name is stored
#[derive(Debug, Clone, PartialEq)]
pub enum StorageClass {
    Auto,
    Static,
    Extern,
    /// An enumerator; carries its constant value.
    EnumConst(i64),
}

/// A declared variable (or function, at global scope)
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub ty: TypeRef,
    pub quals: Qualifiers,
    pub storage: StorageClass,
    /// Emission label for static-storage variables. Globals use their own
    /// name; block-scope statics get a function-qualified label.
    pub label: Option<String>,
    /// Initializer tree for static-storage variables.
    pub init: Option<Initializer>,
    /// Zero-based position for function parameters.
    pub param_index: Option<usize>,
    /// Internal linkage (`static` at file scope): not externally visible.
    pub internal: bool,
    /// False for `extern` declarations never given a definition here.
    pub defined: bool,
    pub span: Span,
}

/// One node of the scope tree
#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub vars: Vec<VarInfo>,
    /// Names introduced by `typedef`, consulted for the declaration-vs-
    /// expression ambiguity.
    pub typedefs: HashMap<String, TypeRef>,
    /// struct/union/enum tag namespace.
    pub tags: HashMap<String, TypeRef>,
}

/// Arena of all scopes of one translation unit.
///
/// Scopes reference their parents by index, so variable references can carry
/// plain `(ScopeId, index)` pairs without ownership cycles.
#[derive(Debug)]
pub struct Scopes {
    nodes: Vec<Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            nodes: vec![Scope {
                parent: None,
                kind: ScopeKind::Global,
                vars: Vec::new(),
                typedefs: HashMap::new(),
                tags: HashMap::new(),
            }],
        }
    }

    pub fn push(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        let id = self.nodes.len() as ScopeId;
        self.nodes.push(Scope {
            parent: Some(parent),
            kind,
            vars: Vec::new(),
            typedefs: HashMap::new(),
            tags: HashMap::new(),
        });
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.nodes[id as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.nodes[id as usize]
    }

    pub fn add_var(&mut self, scope: ScopeId, var: VarInfo) -> usize {
        let vars = &mut self.get_mut(scope).vars;
        vars.push(var);
        vars.len() - 1
    }

    pub fn var(&self, scope: ScopeId, index: usize) -> &VarInfo {
        &self.get(scope).vars[index]
    }

    pub fn var_mut(&mut self, scope: ScopeId, index: usize) -> &mut VarInfo {
        &mut self.get_mut(scope).vars[index]
    }

    /// Find a name in `scope` only, without walking parents.
    pub fn find_local(&self, scope: ScopeId, name: &str) -> Option<usize> {
        self.get(scope).vars.iter().rposition(|v| v.name == name)
    }

    /// Find a name by walking the scope chain to the root.
    pub fn lookup(&self, mut scope: ScopeId, name: &str) -> Option<(ScopeId, usize)> {
        loop {
            if let Some(index) = self.find_local(scope, name) {
                return Some((scope, index));
            }
            scope = self.get(scope).parent?;
        }
    }

    pub fn lookup_typedef(&self, mut scope: ScopeId, name: &str) -> Option<TypeRef> {
        loop {
            if let Some(ty) = self.get(scope).typedefs.get(name) {
                return Some(ty.clone());
            }
            scope = self.get(scope).parent?;
        }
    }

    pub fn lookup_tag(&self, mut scope: ScopeId, name: &str) -> Option<TypeRef> {
        loop {
            if let Some(ty) = self.get(scope).tags.get(name) {
                return Some(ty.clone());
            }
            scope = self.get(scope).parent?;
        }
    }

    /// Tag lookup restricted to one scope, for redefinition checks.
    pub fn find_tag_local(&self, scope: ScopeId, name: &str) -> Option<TypeRef> {
        self.get(scope).tags.get(name).cloned()
    }

    pub fn globals(&self) -> &[VarInfo] {
        &self.get(GLOBAL_SCOPE).vars
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}
