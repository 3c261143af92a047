//! Function compilation records.
//!
//! One [`FunctionBox`] exists per function in the unit, plus one for the
//! script itself. Boxes form a tree through `parent` that mirrors the
//! runtime nesting of closures.

use crate::ast::Loc;
use crate::atoms::Atom;
use crate::lexer::SourcePos;

use super::binder::{DefId, FunBoxId, ScopeId, UseId};

/// What kind of code a box compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Top-level script
    Script,
    /// Ordinary function
    Normal,
    /// Arrow function (lexical `this` and `arguments`)
    Arrow,
    /// `function*`
    Generator,
}

/// How the function appeared in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionSyntax {
    /// The top-level script
    Script,
    /// `function f() {}` in statement position
    Declaration,
    /// `function () {}` in expression position
    Expression,
    /// `(a) => a`
    Arrow,
    /// `{ f() {} }`
    Method,
}

/// A function that was syntax-checked but not compiled. Compiling it later
/// reparses `start..end` of the original source.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyInfo {
    /// Byte offset of the parameter list (or single arrow parameter)
    pub start: usize,
    /// Byte offset just past the body
    pub end: usize,
    /// Line/column of `start`
    pub pos: SourcePos,
    /// Names the function uses but does not declare, in first-use order
    pub free_names: Vec<Atom>,
}

/// Compile-time record for one function body.
#[derive(Debug, Clone)]
pub struct FunctionBox {
    /// Enclosing function, `None` for the unit's root
    pub parent: Option<FunBoxId>,
    /// Number of function boundaries between this box and the root
    pub level: u16,
    /// Declared or inferred name
    pub name: Option<Atom>,
    /// Code kind
    pub kind: FunctionKind,
    /// Source form
    pub syntax: FunctionSyntax,
    /// Strict mode code
    pub strict: bool,
    /// Refers to its own `arguments` object
    pub uses_arguments: bool,
    /// Refers to `this`
    pub uses_this: bool,
    /// Contains a direct call to `eval`
    pub has_direct_eval: bool,
    /// Contains a `with` statement
    pub has_with: bool,
    /// Names in this function cannot be resolved to slots: it or a nested
    /// function contains `eval` or `with`
    pub dynamic: bool,
    /// Parameter list has no defaults, patterns or rest
    pub simple_params: bool,
    /// Formal parameters, one per argument slot
    pub args: Vec<DefId>,
    /// `var`-class bindings, one per local slot
    pub vars: Vec<DefId>,
    /// Rest parameter binding, stored in a local slot
    pub rest: Option<DefId>,
    /// Number of block-scoped slots allocated so far
    pub block_slots: u16,
    /// The function's top-level scope
    pub scope: ScopeId,
    /// Use of the function's own name in the enclosing scope (declarations)
    pub name_use: Option<UseId>,
    /// Binding for a named function expression's own name
    pub callee: Option<DefId>,
    /// Binding for the implicit `arguments` object
    pub arguments: Option<DefId>,
    /// Source location of the whole function
    pub loc: Loc,
    /// Set when the body was skipped by a syntax-only parse
    pub lazy: Option<LazyInfo>,
    /// First use-site id created inside this function
    pub first_use: u32,
}

impl FunctionBox {
    /// Number of formal parameter slots.
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Number of `var`-class local slots.
    pub fn nvars(&self) -> usize {
        self.vars.len()
    }

    /// Local slots in the frame: vars followed by block-scoped slots.
    pub fn nfixed(&self) -> usize {
        self.vars.len() + self.block_slots as usize
    }

    /// True for the unit's script box.
    pub fn is_script(&self) -> bool {
        self.kind == FunctionKind::Script
    }

    /// True if the function gets its own `this` and `arguments`.
    pub fn has_own_this(&self) -> bool {
        !matches!(self.kind, FunctionKind::Arrow | FunctionKind::Script)
    }
}
