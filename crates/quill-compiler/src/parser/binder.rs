//! Name binding.
//!
//! The binder runs in lockstep with the parser. Every declaration creates a
//! [`Definition`]; every reference creates a [`UseSite`] that is threaded
//! onto exactly one definition's use-chain.
//!
//! A reference is looked up through the scopes of the *current* function
//! only. When nothing is found, the use is parked on a placeholder
//! definition in the function's `lexdeps` table. Two things can later claim
//! it:
//!
//! - a declaration of the same name in a scope enclosing the use (hoisted
//!   `var`, function declarations, `let` later in the same block), or
//! - the enclosing function, when the current one finishes: its remaining
//!   placeholders are looked up again from the point where the function was
//!   defined, and either resolve there or move into the parent's `lexdeps`.
//!
//! Placeholders still unresolved when the root finishes become global (or,
//! for standalone lazy functions, free) names.
//!
//! Resolved uses carry a [`Cookie`]: the number of function boundaries
//! between use and definition, plus the definition's slot. `with` and direct
//! `eval` make a function dynamic; no use of a dynamic function's bindings
//! keeps a cookie, so the emitter falls back to name-based access.

use rustc_hash::FxHashMap;

use crate::ast::Loc;
use crate::atoms::{Atom, AtomTable};
use crate::error::{CompileError, Diagnostic, Result};
use crate::lexer::SourcePos;

use super::funbox::{FunctionBox, FunctionKind, FunctionSyntax};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Index into the owning arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[allow(dead_code)]
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }
    };
}

define_id!(
    /// Handle to a [`Definition`].
    DefId
);
define_id!(
    /// Handle to a [`UseSite`].
    UseId
);
define_id!(
    /// Handle to a [`ScopeData`].
    ScopeId
);
define_id!(
    /// Handle to a [`FunctionBox`].
    FunBoxId
);

/// How a binding was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefKind {
    /// Formal parameter
    Arg,
    /// `var`
    Var,
    /// Function declaration
    Function,
    /// `let`
    Let,
    /// `const`
    Const,
    /// `catch (e)` parameter
    Catch,
    /// A named function expression's own name
    Callee,
    /// The implicit `arguments` object
    Arguments,
    /// Not yet resolved
    Placeholder,
    /// Unresolved at the end of a script: a property of the global object
    Global,
    /// Unresolved at the end of a standalone function: lives in some
    /// enclosing scope that is not visible to this unit
    Free,
}

impl DefKind {
    /// Block-scoped kinds.
    pub fn is_lexical(self) -> bool {
        matches!(self, DefKind::Let | DefKind::Const | DefKind::Catch)
    }

    /// Name used in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            DefKind::Arg => "argument",
            DefKind::Var => "var",
            DefKind::Function => "function",
            DefKind::Let => "let",
            DefKind::Const => "const",
            DefKind::Catch => "catch parameter",
            DefKind::Callee => "function name",
            DefKind::Arguments => "arguments",
            DefKind::Placeholder => "placeholder",
            DefKind::Global => "global",
            DefKind::Free => "free variable",
        }
    }
}

/// Frame storage of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Argument slot
    Arg(u16),
    /// `var`-class local slot
    Local(u16),
    /// Block-scoped slot, stored after the `var` slots
    Block(u16),
}

/// Where a resolved binding lives relative to the referencing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie {
    /// Function boundaries crossed; 0 is the current frame
    pub skip: u16,
    /// Slot in the defining frame
    pub slot: Slot,
}

/// A binding.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Bound name
    pub name: Atom,
    /// How it was introduced
    pub kind: DefKind,
    /// Declaring scope
    pub scope: ScopeId,
    /// Function owning the storage
    pub funbox: FunBoxId,
    /// Frame storage, `None` for placeholders and global/free names
    pub slot: Option<Slot>,
    /// Declaration position
    pub pos: SourcePos,
    /// Head of the use-chain
    pub first_use: Option<UseId>,
    /// Some use lives in a nested function
    pub closed_over: bool,
}

/// A reference to a name.
#[derive(Debug, Clone)]
pub struct UseSite {
    /// The definition this use is linked to
    pub def: DefId,
    /// Next use on the same chain
    pub next: Option<UseId>,
    /// Scope the reference appears in
    pub scope: ScopeId,
    /// Function the reference appears in
    pub funbox: FunBoxId,
    /// Position of the name token
    pub pos: SourcePos,
    /// Slot address, when statically known
    pub cookie: Option<Cookie>,
    /// The reference sits under a `with` between it and its binding
    pub dynamic: bool,
    /// This use is the declaration itself (`var x = ...`)
    pub declaration: bool,
}

/// Kinds of binding contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Function or script body
    Function,
    /// `{ ... }`
    Block,
    /// `catch (e) { ... }`
    Catch,
    /// Head of a `for` statement
    For,
    /// Body of a `switch` statement
    Switch,
    /// Body of a `with` statement
    With,
}

/// One binding contour.
#[derive(Debug, Clone)]
pub struct ScopeData {
    /// Contour kind
    pub kind: ScopeKind,
    /// Enclosing scope
    pub parent: Option<ScopeId>,
    /// Owning function
    pub funbox: FunBoxId,
    /// Bindings declared here, in declaration order
    pub decls: Vec<DefId>,
    /// Function declarations hoisted to the top of this scope
    pub fun_decls: Vec<FunBoxId>,
    names: FxHashMap<Atom, DefId>,
    /// First use-site id created inside this scope
    first_use: u32,
}

impl ScopeData {
    /// Looks a name up in this scope only.
    pub fn get(&self, name: Atom) -> Option<DefId> {
        self.names.get(&name).copied()
    }

    /// Lexical bindings that need a runtime block object.
    pub fn has_lexicals(&self) -> bool {
        !self.decls.is_empty()
    }
}

#[derive(Debug)]
struct FunctionContext {
    funbox: FunBoxId,
    /// Index of the function's own scope in `scope_stack`
    scope_base: usize,
    lexdeps: FxHashMap<Atom, DefId>,
}

/// Saved arena sizes, for discarding a partially parsed function.
#[derive(Debug, Clone)]
pub struct BinderMark {
    defs: usize,
    uses: usize,
    scopes: usize,
    funboxes: usize,
    scope_stack: usize,
    fn_stack: usize,
    warnings: usize,
    open: Vec<OpenFunctionState>,
}

/// Fields of an open function that parsing nested code can change.
#[derive(Debug, Clone)]
struct OpenFunctionState {
    funbox: FunBoxId,
    uses_arguments: bool,
    uses_this: bool,
    has_direct_eval: bool,
    has_with: bool,
    dynamic: bool,
    simple_params: bool,
    rest: Option<DefId>,
    arguments: Option<DefId>,
    block_slots: u16,
}

/// One entry of [`Binder::resolved_bindings`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResolvedBinding {
    /// Referenced name
    pub name: String,
    /// Where it was referenced
    pub pos: SourcePos,
    /// Kind of binding it resolved to
    pub kind: String,
    /// Where that binding was declared, if anywhere
    pub decl: Option<SourcePos>,
}

/// Binding contexts, definitions and use-sites for one compilation unit.
#[derive(Debug, Default)]
pub struct Binder {
    defs: Vec<Definition>,
    uses: Vec<UseSite>,
    scopes: Vec<ScopeData>,
    funboxes: Vec<FunctionBox>,
    scope_stack: Vec<ScopeId>,
    fn_stack: Vec<FunctionContext>,
    /// Placeholders left over when the root function finished
    unresolved: Vec<DefId>,
    /// Non-fatal diagnostics
    pub warnings: Vec<Diagnostic>,
}

impl Binder {
    /// Creates an empty binder.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Accessors ====================

    /// Returns a definition.
    pub fn def(&self, id: DefId) -> &Definition {
        &self.defs[id.index()]
    }

    /// Returns a use-site.
    pub fn use_site(&self, id: UseId) -> &UseSite {
        &self.uses[id.index()]
    }

    /// Returns a scope.
    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.index()]
    }

    /// Returns a function box.
    pub fn funbox(&self, id: FunBoxId) -> &FunctionBox {
        &self.funboxes[id.index()]
    }

    /// Returns a function box mutably.
    pub fn funbox_mut(&mut self, id: FunBoxId) -> &mut FunctionBox {
        &mut self.funboxes[id.index()]
    }

    /// Number of function boxes.
    pub fn funbox_count(&self) -> usize {
        self.funboxes.len()
    }

    /// Number of use-sites.
    pub fn use_count(&self) -> usize {
        self.uses.len()
    }

    /// Iterates over the use-chain of a definition, newest first.
    pub fn uses_of(&self, def: DefId) -> impl Iterator<Item = UseId> + '_ {
        let mut next = self.def(def).first_use;
        std::iter::from_fn(move || {
            let id = next?;
            next = self.uses[id.index()].next;
            Some(id)
        })
    }

    /// The function currently being parsed.
    pub fn current_funbox(&self) -> FunBoxId {
        self.context().funbox
    }

    /// The innermost open scope.
    pub fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().expect("binder has no open scope")
    }

    fn context(&self) -> &FunctionContext {
        self.fn_stack.last().expect("binder has no open function")
    }

    fn context_mut(&mut self) -> &mut FunctionContext {
        self.fn_stack.last_mut().expect("binder has no open function")
    }

    fn level(&self, funbox: FunBoxId) -> u16 {
        self.funboxes[funbox.index()].level
    }

    // ==================== Functions and scopes ====================

    /// Opens a function. Named function expressions get a binding for their
    /// own name inside their scope.
    pub fn begin_function(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        strict: bool,
        loc: Loc,
    ) -> Result<FunBoxId> {
        let parent = self.fn_stack.last().map(|ctx| ctx.funbox);
        let level = match parent {
            Some(p) => self.level(p) + 1,
            None => 0,
        };
        let id = FunBoxId(self.funboxes.len() as u32);
        let scope = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            kind: ScopeKind::Function,
            parent: self.scope_stack.last().copied(),
            funbox: id,
            decls: Vec::new(),
            fun_decls: Vec::new(),
            names: FxHashMap::default(),
            first_use: self.uses.len() as u32,
        });
        self.funboxes.push(FunctionBox {
            parent,
            level,
            name,
            kind,
            syntax,
            strict,
            uses_arguments: false,
            uses_this: false,
            has_direct_eval: false,
            has_with: false,
            dynamic: false,
            simple_params: true,
            args: Vec::new(),
            vars: Vec::new(),
            rest: None,
            block_slots: 0,
            scope,
            name_use: None,
            callee: None,
            arguments: None,
            loc,
            lazy: None,
            first_use: self.uses.len() as u32,
        });
        self.fn_stack.push(FunctionContext {
            funbox: id,
            scope_base: self.scope_stack.len(),
            lexdeps: FxHashMap::default(),
        });
        self.scope_stack.push(scope);

        if let (Some(name), FunctionSyntax::Expression) = (name, syntax) {
            let def = self.new_def(name, DefKind::Callee, scope, loc.pos)?;
            self.scopes[scope.index()].names.insert(name, def);
            self.funboxes[id.index()].callee = Some(def);
        }

        tracing::trace!(funbox = id.0, level, ?kind, "begin function");
        Ok(id)
    }

    /// Closes the current function, resolving its free names against the
    /// enclosing function.
    pub fn end_function(&mut self) -> Result<()> {
        let ctx = self.fn_stack.pop().expect("end_function without begin_function");
        let funbox = ctx.funbox;
        let own_scope = self.scope_stack.pop();
        assert_eq!(
            own_scope,
            Some(self.funboxes[funbox.index()].scope),
            "scope stack out of sync at end of function"
        );

        if self.funboxes[funbox.index()].dynamic {
            let start = self.funboxes[funbox.index()].first_use as usize;
            for use_site in &mut self.uses[start..] {
                if self.defs[use_site.def.index()].funbox == funbox {
                    use_site.cookie = None;
                }
            }
        }

        let mut free: Vec<(Atom, DefId)> = ctx.lexdeps.into_iter().collect();
        free.sort_by_key(|(_, def)| *def);

        if self.fn_stack.is_empty() {
            self.unresolved = free.into_iter().map(|(_, def)| def).collect();
            return Ok(());
        }

        for (name, placeholder) in free {
            let (found, crossed_with) = self.lookup(name)?;
            match found {
                Some(def) => self.move_uses(placeholder, def, crossed_with, |_| true),
                None => {
                    let parent_ctx = self.context_mut();
                    match parent_ctx.lexdeps.get(&name).copied() {
                        Some(existing) => {
                            self.move_uses(placeholder, existing, crossed_with, |_| true)
                        }
                        None => {
                            parent_ctx.lexdeps.insert(name, placeholder);
                            let parent = parent_ctx.funbox;
                            self.defs[placeholder.index()].funbox = parent;
                            if crossed_with {
                                let uses: Vec<UseId> = self.uses_of(placeholder).collect();
                                for u in uses {
                                    self.uses[u.index()].dynamic = true;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Opens a block-level scope.
    pub fn push_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            kind,
            parent: self.scope_stack.last().copied(),
            funbox: self.current_funbox(),
            decls: Vec::new(),
            fun_decls: Vec::new(),
            names: FxHashMap::default(),
            first_use: self.uses.len() as u32,
        });
        self.scope_stack.push(id);
        id
    }

    /// Closes the innermost block-level scope.
    pub fn pop_scope(&mut self, expected: ScopeId) {
        let popped = self.scope_stack.pop();
        assert_eq!(popped, Some(expected), "scope stack out of sync");
        assert_ne!(
            self.scopes[expected.index()].kind,
            ScopeKind::Function,
            "pop_scope on a function scope"
        );
    }

    /// Records a function declaration to be instantiated at the top of
    /// `scope`.
    pub fn register_function_decl(&mut self, scope: ScopeId, funbox: FunBoxId) {
        self.scopes[scope.index()].fun_decls.push(funbox);
    }

    /// Marks the current function (and every enclosing one) as unable to use
    /// slot addressing, because of direct `eval` or `with`.
    pub fn note_dynamic_scope(&mut self, with: bool) {
        let current = self.current_funbox();
        {
            let fb = &mut self.funboxes[current.index()];
            if with {
                fb.has_with = true;
            } else {
                fb.has_direct_eval = true;
            }
        }
        let mut next = Some(current);
        while let Some(id) = next {
            let fb = &mut self.funboxes[id.index()];
            fb.dynamic = true;
            next = fb.parent;
        }
    }

    /// Records a use of `this`, which arrows inherit from their enclosing
    /// function.
    pub fn note_this(&mut self) {
        let mut next = Some(self.current_funbox());
        while let Some(id) = next {
            let fb = &mut self.funboxes[id.index()];
            fb.uses_this = true;
            if fb.kind != FunctionKind::Arrow {
                break;
            }
            next = fb.parent;
        }
    }

    // ==================== Declarations ====================

    /// Declares `name` in the scope its kind targets, returning the
    /// (possibly pre-existing) definition.
    pub fn declare(&mut self, name: Atom, kind: DefKind, pos: SourcePos, atoms: &AtomTable) -> Result<DefId> {
        let funbox = self.current_funbox();
        let strict = self.funboxes[funbox.index()].strict;
        let function_scope = self.funboxes[funbox.index()].scope;
        let current = self.current_scope();
        let at_function_level = current == function_scope;

        let redeclared = |existing: DefKind| {
            CompileError::semantic(
                format!("redeclaration of {} {}", existing.describe(), atoms.get(name)),
                pos,
            )
        };

        let target = match kind {
            DefKind::Var | DefKind::Arg => function_scope,
            _ => current,
        };

        match kind {
            DefKind::Var => {
                let base = self.context().scope_base;
                for &scope in self.scope_stack[base..].iter().rev() {
                    let Some(existing) = self.scopes[scope.index()].get(name) else {
                        continue;
                    };
                    let existing_kind = self.defs[existing.index()].kind;
                    if scope == function_scope {
                        match existing_kind {
                            DefKind::Let | DefKind::Const => return Err(redeclared(existing_kind)),
                            DefKind::Callee => {}
                            _ => return Ok(existing),
                        }
                    } else {
                        match existing_kind {
                            DefKind::Catch => {}
                            _ => return Err(redeclared(existing_kind)),
                        }
                    }
                }
            }
            DefKind::Function if at_function_level => {
                if let Some(existing) = self.scopes[target.index()].get(name) {
                    match self.defs[existing.index()].kind {
                        k @ (DefKind::Let | DefKind::Const) => return Err(redeclared(k)),
                        DefKind::Var => {
                            self.defs[existing.index()].kind = DefKind::Function;
                            return Ok(existing);
                        }
                        DefKind::Callee => {}
                        _ => return Ok(existing),
                    }
                }
            }
            DefKind::Function => {
                if let Some(existing) = self.scopes[target.index()].get(name) {
                    match self.defs[existing.index()].kind {
                        DefKind::Function if !strict => {
                            self.warn(
                                format!("redeclaration of block-level function {}", atoms.get(name)),
                                pos,
                            );
                            return Ok(existing);
                        }
                        k => return Err(redeclared(k)),
                    }
                }
            }
            DefKind::Arg => {
                if let Some(existing) = self.scopes[target.index()].get(name)
                    && self.defs[existing.index()].kind == DefKind::Arg
                {
                    let fb = &self.funboxes[funbox.index()];
                    if strict || !fb.simple_params || fb.kind == FunctionKind::Arrow {
                        return Err(CompileError::semantic(
                            format!("duplicate argument {} not allowed in this context", atoms.get(name)),
                            pos,
                        ));
                    }
                    self.warn(format!("duplicate argument {}", atoms.get(name)), pos);
                }
            }
            DefKind::Let | DefKind::Const | DefKind::Catch => {
                if let Some(existing) = self.scopes[target.index()].get(name) {
                    match self.defs[existing.index()].kind {
                        DefKind::Callee => {}
                        k => return Err(redeclared(k)),
                    }
                }
            }
            _ => unreachable!("declare called with {kind:?}"),
        }

        let def = self.new_def(name, kind, target, pos)?;
        self.scopes[target.index()].names.insert(name, def);
        self.scopes[target.index()].decls.push(def);
        self.adopt_placeholder_uses(name, def, target);
        if kind.is_lexical() || (kind == DefKind::Function && !at_function_level) {
            self.rehome_shadowed_uses(name, def, target);
        }
        Ok(def)
    }

    /// Allocates an argument slot for a destructuring parameter. The slot has
    /// no name of its own.
    pub fn declare_anonymous_arg(&mut self, pos: SourcePos) -> Result<DefId> {
        let scope = self.funboxes[self.current_funbox().index()].scope;
        self.new_def(Atom::EMPTY, DefKind::Arg, scope, pos)
    }

    /// Creates the use-site for a declaring occurrence of `def`.
    pub fn declaration_use(&mut self, def: DefId, pos: SourcePos) -> UseId {
        let id = self.new_use(def, pos, false);
        self.uses[id.index()].declaration = true;
        id
    }

    fn new_def(&mut self, name: Atom, kind: DefKind, scope: ScopeId, pos: SourcePos) -> Result<DefId> {
        let funbox = self.scopes[scope.index()].funbox;
        let id = DefId(self.defs.len() as u32);
        let too_many = |what: &str| CompileError::limit(format!("too many {what}"), pos);
        let fb = &mut self.funboxes[funbox.index()];
        let slot = match kind {
            DefKind::Arg => {
                let slot = u16::try_from(fb.args.len()).map_err(|_| too_many("arguments"))?;
                fb.args.push(id);
                Some(Slot::Arg(slot))
            }
            DefKind::Var | DefKind::Callee | DefKind::Arguments => {
                let slot = u16::try_from(fb.vars.len()).map_err(|_| too_many("local variables"))?;
                fb.vars.push(id);
                Some(Slot::Local(slot))
            }
            DefKind::Function if scope == fb.scope => {
                let slot = u16::try_from(fb.vars.len()).map_err(|_| too_many("local variables"))?;
                fb.vars.push(id);
                Some(Slot::Local(slot))
            }
            DefKind::Function | DefKind::Let | DefKind::Const | DefKind::Catch => {
                let slot = fb.block_slots;
                fb.block_slots = slot.checked_add(1).ok_or_else(|| too_many("block-scoped variables"))?;
                Some(Slot::Block(slot))
            }
            DefKind::Placeholder | DefKind::Global | DefKind::Free => None,
        };
        self.defs.push(Definition {
            name,
            kind,
            scope,
            funbox,
            slot,
            pos,
            first_use: None,
            closed_over: false,
        });
        Ok(id)
    }

    /// Moves uses parked on a placeholder for `name` onto `def` when they sit
    /// inside `scope`.
    fn adopt_placeholder_uses(&mut self, name: Atom, def: DefId, scope: ScopeId) {
        let Some(placeholder) = self.context().lexdeps.get(&name).copied() else {
            return;
        };
        let scopes = &self.scopes;
        let within = |use_scope: ScopeId| {
            let mut next = Some(use_scope);
            while let Some(s) = next {
                if s == scope {
                    return true;
                }
                next = scopes[s.index()].parent;
            }
            false
        };
        let chosen: Vec<bool> = self
            .uses_of(placeholder)
            .map(|u| within(self.uses[u.index()].scope))
            .collect();
        let mut index = 0;
        self.move_uses(placeholder, def, false, |_| {
            let take = chosen[index];
            index += 1;
            take
        });
        if self.defs[placeholder.index()].first_use.is_none() {
            self.context_mut().lexdeps.remove(&name);
        }
    }

    /// Relinks uses inside `scope` that were resolved to an outer binding of
    /// `name` before `def` shadowed it. This includes uses in nested
    /// functions that already finished.
    fn rehome_shadowed_uses(&mut self, name: Atom, def: DefId, scope: ScopeId) {
        let start = self.scopes[scope.index()].first_use as usize;
        let mut shadowed: Vec<(DefId, UseId, bool)> = Vec::new();
        for index in start..self.uses.len() {
            let use_site = &self.uses[index];
            let old = use_site.def;
            let d = &self.defs[old.index()];
            if old == def || d.name != name || d.kind == DefKind::Placeholder {
                continue;
            }
            if d.scope == scope || !self.encloses(d.scope, scope) {
                continue;
            }
            if let Some(dynamic) = self.with_between(use_site.scope, scope) {
                shadowed.push((old, UseId(index as u32), dynamic));
            }
        }

        let mut olds: Vec<DefId> = shadowed.iter().map(|&(old, _, _)| old).collect();
        olds.sort_unstable();
        olds.dedup();
        for &(_, u, dynamic) in &shadowed {
            self.uses[u.index()].dynamic = dynamic;
        }
        for old in olds {
            self.move_uses(old, def, false, |u| shadowed.iter().any(|&(_, s, _)| s == u));
        }
    }

    /// True if `inner` is `outer` or nested in it, across function
    /// boundaries.
    fn encloses(&self, outer: ScopeId, inner: ScopeId) -> bool {
        let mut next = Some(inner);
        while let Some(s) = next {
            if s == outer {
                return true;
            }
            next = self.scopes[s.index()].parent;
        }
        false
    }

    /// Walks from `inner` out to `outer`. `None` if `outer` does not enclose
    /// `inner`, otherwise whether a `with` body lies strictly between them.
    fn with_between(&self, inner: ScopeId, outer: ScopeId) -> Option<bool> {
        let mut crossed = false;
        let mut next = Some(inner);
        while let Some(s) = next {
            if s == outer {
                return Some(crossed);
            }
            let data = &self.scopes[s.index()];
            crossed |= data.kind == ScopeKind::With;
            next = data.parent;
        }
        None
    }

    /// Relinks every use of `from` accepted by `filter` onto `to`, visiting
    /// the chain newest first. Rejected uses stay on `from`.
    fn move_uses(&mut self, from: DefId, to: DefId, dynamic: bool, mut filter: impl FnMut(UseId) -> bool) {
        let chain: Vec<UseId> = self.uses_of(from).collect();
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for u in chain {
            if filter(u) {
                moved.push(u);
            } else {
                kept.push(u);
            }
        }
        self.defs[from.index()].first_use = None;
        for &u in kept.iter().rev() {
            self.prepend_use(from, u);
        }
        for &u in moved.iter().rev() {
            self.uses[u.index()].dynamic |= dynamic;
            self.link(u, to);
        }
    }

    // ==================== References ====================

    /// Resolves a reference to `name` at the current point of the parse.
    pub fn reference(&mut self, name: Atom, pos: SourcePos) -> Result<UseId> {
        let (found, crossed_with) = self.lookup(name)?;
        let def = match found {
            Some(def) => def,
            None => match self.context().lexdeps.get(&name).copied() {
                Some(placeholder) => placeholder,
                None => {
                    let scope = self.current_scope();
                    let placeholder = self.new_def(name, DefKind::Placeholder, scope, pos)?;
                    self.context_mut().lexdeps.insert(name, placeholder);
                    placeholder
                }
            },
        };
        Ok(self.new_use(def, pos, crossed_with))
    }

    /// Searches the scopes of the current function, innermost first. Also
    /// reports whether a `with` body was crossed on the way.
    fn lookup(&mut self, name: Atom) -> Result<(Option<DefId>, bool)> {
        let base = self.context().scope_base;
        let mut crossed_with = false;
        for &scope in self.scope_stack[base..].iter().rev() {
            let data = &self.scopes[scope.index()];
            if data.kind == ScopeKind::With {
                crossed_with = true;
                continue;
            }
            if let Some(def) = data.get(name) {
                return Ok((Some(def), crossed_with));
            }
        }

        let funbox = self.current_funbox();
        if name == Atom::ARGUMENTS && self.funboxes[funbox.index()].has_own_this() {
            let fb = &self.funboxes[funbox.index()];
            let scope = fb.scope;
            let pos = fb.loc.pos;
            let def = self.new_def(name, DefKind::Arguments, scope, pos)?;
            self.scopes[scope.index()].names.insert(name, def);
            let fb = &mut self.funboxes[funbox.index()];
            fb.uses_arguments = true;
            fb.arguments = Some(def);
            return Ok((Some(def), crossed_with));
        }
        Ok((None, crossed_with))
    }

    fn new_use(&mut self, def: DefId, pos: SourcePos, dynamic: bool) -> UseId {
        let id = UseId(self.uses.len() as u32);
        self.uses.push(UseSite {
            def,
            next: None,
            scope: self.current_scope(),
            funbox: self.current_funbox(),
            pos,
            cookie: None,
            dynamic,
            declaration: false,
        });
        self.link(id, def);
        id
    }

    /// Threads `use_id` onto `def`'s chain and computes its cookie.
    fn link(&mut self, use_id: UseId, def: DefId) {
        let d = &self.defs[def.index()];
        let u = &self.uses[use_id.index()];
        let cookie = match d.slot {
            Some(slot) if !u.dynamic => {
                let skip = self.level(u.funbox) - self.level(d.funbox);
                Some(Cookie { skip, slot })
            }
            _ => None,
        };
        let u = &mut self.uses[use_id.index()];
        u.def = def;
        u.cookie = cookie;
        self.prepend_use(def, use_id);
    }

    fn prepend_use(&mut self, def: DefId, use_id: UseId) {
        let head = self.defs[def.index()].first_use;
        self.uses[use_id.index()].next = head;
        self.defs[def.index()].first_use = Some(use_id);
    }

    // ==================== Unit completion ====================

    /// Finishes the unit after the root function has ended. Leftover
    /// placeholders become `free_kind` (global or free) names.
    pub fn finish_unit(&mut self, free_kind: DefKind) {
        assert!(self.fn_stack.is_empty(), "finish_unit with open functions");
        for &def in &self.unresolved {
            let d = &mut self.defs[def.index()];
            d.kind = free_kind;
            d.slot = None;
        }
        let unresolved = std::mem::take(&mut self.unresolved);
        for def in &unresolved {
            let chain: Vec<UseId> = self.uses_of(*def).collect();
            for u in chain {
                self.uses[u.index()].cookie = None;
            }
        }
        self.unresolved = unresolved;

        for i in 0..self.uses.len() {
            let (def, funbox) = (self.uses[i].def, self.uses[i].funbox);
            if self.defs[def.index()].funbox != funbox {
                self.defs[def.index()].closed_over = true;
            }
        }
    }

    /// Names the root function uses without declaring, in first-use order.
    pub fn free_names(&self) -> Vec<Atom> {
        self.unresolved.iter().map(|def| self.defs[def.index()].name).collect()
    }

    // ==================== Restart support ====================

    /// Saves arena sizes.
    pub fn mark(&self) -> BinderMark {
        BinderMark {
            defs: self.defs.len(),
            uses: self.uses.len(),
            scopes: self.scopes.len(),
            funboxes: self.funboxes.len(),
            scope_stack: self.scope_stack.len(),
            fn_stack: self.fn_stack.len(),
            warnings: self.warnings.len(),
            open: self
                .fn_stack
                .iter()
                .map(|ctx| {
                    let fb = &self.funboxes[ctx.funbox.index()];
                    OpenFunctionState {
                        funbox: ctx.funbox,
                        uses_arguments: fb.uses_arguments,
                        uses_this: fb.uses_this,
                        has_direct_eval: fb.has_direct_eval,
                        has_with: fb.has_with,
                        dynamic: fb.dynamic,
                        simple_params: fb.simple_params,
                        rest: fb.rest,
                        arguments: fb.arguments,
                        block_slots: fb.block_slots,
                    }
                })
                .collect(),
        }
    }

    /// Discards everything created since `mark`, repairing the use-chains of
    /// older definitions.
    pub fn truncate(&mut self, mark: &BinderMark) {
        // Newer uses are always prepended, so on older chains they form a
        // prefix that can be skipped.
        for def in &mut self.defs[..mark.defs] {
            while let Some(head) = def.first_use
                && head.index() >= mark.uses
            {
                def.first_use = self.uses[head.index()].next;
            }
        }

        self.fn_stack.truncate(mark.fn_stack);
        self.scope_stack.truncate(mark.scope_stack);
        self.funboxes.truncate(mark.funboxes);
        self.scopes.truncate(mark.scopes);
        self.uses.truncate(mark.uses);
        self.defs.truncate(mark.defs);
        self.warnings.truncate(mark.warnings);

        for ctx in &mut self.fn_stack {
            ctx.lexdeps.retain(|_, def| def.index() < mark.defs);
        }
        for scope in &mut self.scopes {
            scope.names.retain(|_, def| def.index() < mark.defs);
            scope.decls.retain(|def| def.index() < mark.defs);
            scope.fun_decls.retain(|fb| fb.index() < mark.funboxes);
        }
        for fb in &mut self.funboxes {
            fb.args.retain(|def| def.index() < mark.defs);
            fb.vars.retain(|def| def.index() < mark.defs);
        }
        for saved in &mark.open {
            let fb = &mut self.funboxes[saved.funbox.index()];
            fb.uses_arguments = saved.uses_arguments;
            fb.uses_this = saved.uses_this;
            fb.has_direct_eval = saved.has_direct_eval;
            fb.has_with = saved.has_with;
            fb.dynamic = saved.dynamic;
            fb.simple_params = saved.simple_params;
            fb.rest = saved.rest;
            fb.arguments = saved.arguments;
            fb.block_slots = saved.block_slots;
        }
    }

    /// Records a warning.
    pub fn warn(&mut self, message: impl Into<String>, pos: SourcePos) {
        let message = message.into();
        tracing::warn!(%pos, "{message}");
        self.warnings.push(Diagnostic { message, pos });
    }

    /// Definitions stored in block-scoped slots of `funbox`, in slot order.
    pub fn block_defs(&self, funbox: FunBoxId) -> Vec<DefId> {
        let mut defs: Vec<(u16, DefId)> = self
            .scopes
            .iter()
            .filter(|scope| scope.funbox == funbox)
            .flat_map(|scope| scope.decls.iter().copied())
            .filter_map(|def| match self.defs[def.index()].slot {
                Some(Slot::Block(slot)) => Some((slot, def)),
                _ => None,
            })
            .collect();
        defs.sort_unstable();
        defs.into_iter().map(|(_, def)| def).collect()
    }

    // ==================== Reporting ====================

    /// Every use-site with the binding it resolved to, sorted by position.
    pub fn resolved_bindings(&self, atoms: &AtomTable) -> Vec<ResolvedBinding> {
        let mut out: Vec<ResolvedBinding> = self
            .uses
            .iter()
            .map(|u| {
                let d = &self.defs[u.def.index()];
                let decl = match d.kind {
                    DefKind::Global | DefKind::Free | DefKind::Placeholder => None,
                    _ => Some(d.pos),
                };
                ResolvedBinding {
                    name: atoms.get(d.name).to_string(),
                    pos: u.pos,
                    kind: d.kind.describe().to_string(),
                    decl,
                }
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Binder, AtomTable) {
        let mut binder = Binder::new();
        binder
            .begin_function(None, FunctionKind::Script, FunctionSyntax::Script, false, Loc::default())
            .unwrap();
        (binder, AtomTable::new())
    }

    fn begin(binder: &mut Binder, kind: FunctionKind, syntax: FunctionSyntax) -> FunBoxId {
        binder.begin_function(None, kind, syntax, false, Loc::default()).unwrap()
    }

    #[test]
    fn test_reference_before_var_is_adopted() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let use_id = binder.reference(x, SourcePos::new(1, 0)).unwrap();
        assert_eq!(binder.def(binder.use_site(use_id).def).kind, DefKind::Placeholder);

        let def = binder.declare(x, DefKind::Var, SourcePos::new(2, 4), &atoms).unwrap();
        let site = binder.use_site(use_id);
        assert_eq!(site.def, def);
        assert_eq!(
            site.cookie,
            Some(Cookie {
                skip: 0,
                slot: Slot::Local(0)
            })
        );
    }

    #[test]
    fn test_free_name_in_nested_function_resolves_in_parent() {
        let (mut binder, mut atoms) = setup();
        let y = atoms.intern("y");
        begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        let use_id = binder.reference(y, SourcePos::new(1, 20)).unwrap();
        binder.end_function().unwrap();

        let def = binder.declare(y, DefKind::Var, SourcePos::new(2, 4), &atoms).unwrap();
        let site = binder.use_site(use_id);
        assert_eq!(site.def, def);
        assert_eq!(site.cookie.map(|c| c.skip), Some(1));

        binder.end_function().unwrap();
        binder.finish_unit(DefKind::Global);
        assert!(binder.def(def).closed_over);
    }

    #[test]
    fn test_block_let_adopts_only_uses_inside_block() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let outer = binder.reference(x, SourcePos::new(1, 0)).unwrap();
        let block = binder.push_scope(ScopeKind::Block);
        let inner = binder.reference(x, SourcePos::new(2, 2)).unwrap();
        let def = binder.declare(x, DefKind::Let, SourcePos::new(3, 6), &atoms).unwrap();
        binder.pop_scope(block);

        assert_eq!(binder.use_site(inner).def, def);
        assert_ne!(binder.use_site(outer).def, def);
        assert_eq!(
            binder.use_site(inner).cookie.map(|c| c.slot),
            Some(Slot::Block(0))
        );

        binder.end_function().unwrap();
        binder.finish_unit(DefKind::Global);
        assert_eq!(binder.def(binder.use_site(outer).def).kind, DefKind::Global);
        assert_eq!(binder.use_site(outer).cookie, None);
    }

    #[test]
    fn test_with_body_uses_are_dynamic() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        binder.declare(x, DefKind::Var, SourcePos::default(), &atoms).unwrap();
        binder.note_dynamic_scope(true);
        let with = binder.push_scope(ScopeKind::With);
        let use_id = binder.reference(x, SourcePos::new(1, 10)).unwrap();
        binder.pop_scope(with);

        let site = binder.use_site(use_id);
        assert!(site.dynamic);
        assert_eq!(site.cookie, None);
        assert!(binder.funbox(binder.current_funbox()).has_with);
    }

    #[test]
    fn test_direct_eval_clears_cookies_and_marks_ancestors() {
        let (mut binder, mut atoms) = setup();
        let a = atoms.intern("a");
        let script = binder.current_funbox();
        let f = begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        binder.declare(a, DefKind::Var, SourcePos::default(), &atoms).unwrap();
        let use_id = binder.reference(a, SourcePos::new(1, 5)).unwrap();
        assert!(binder.use_site(use_id).cookie.is_some());
        binder.note_dynamic_scope(false);
        binder.end_function().unwrap();

        assert_eq!(binder.use_site(use_id).cookie, None);
        assert!(binder.funbox(f).has_direct_eval);
        assert!(binder.funbox(script).dynamic);
    }

    #[test]
    fn test_duplicate_argument_policy() {
        let (mut binder, mut atoms) = setup();
        let a = atoms.intern("a");
        begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        binder.declare(a, DefKind::Arg, SourcePos::default(), &atoms).unwrap();
        let second = binder.declare(a, DefKind::Arg, SourcePos::new(1, 3), &atoms).unwrap();
        assert_eq!(binder.warnings.len(), 1);
        assert_eq!(binder.def(second).slot, Some(Slot::Arg(1)));
        binder.end_function().unwrap();

        let f = binder
            .begin_function(None, FunctionKind::Normal, FunctionSyntax::Expression, true, Loc::default())
            .unwrap();
        binder.declare(a, DefKind::Arg, SourcePos::default(), &atoms).unwrap();
        let err = binder.declare(a, DefKind::Arg, SourcePos::new(1, 3), &atoms).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Semantic);
        assert!(binder.funbox(f).strict);
    }

    #[test]
    fn test_let_redeclaration_is_an_error() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        binder.declare(x, DefKind::Let, SourcePos::default(), &atoms).unwrap();
        let err = binder.declare(x, DefKind::Var, SourcePos::new(2, 0), &atoms).unwrap_err();
        assert!(err.message.contains("redeclaration of let x"));
    }

    #[test]
    fn test_var_redeclaration_is_idempotent() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let first = binder.declare(x, DefKind::Var, SourcePos::default(), &atoms).unwrap();
        let second = binder.declare(x, DefKind::Var, SourcePos::new(2, 0), &atoms).unwrap();
        assert_eq!(first, second);
        assert_eq!(binder.funbox(binder.current_funbox()).nvars(), 1);
    }

    #[test]
    fn test_arguments_in_arrow_binds_to_enclosing_function() {
        let (mut binder, _atoms) = setup();
        let f = begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        begin(&mut binder, FunctionKind::Arrow, FunctionSyntax::Arrow);
        let use_id = binder.reference(Atom::ARGUMENTS, SourcePos::default()).unwrap();
        binder.end_function().unwrap();

        let def = binder.use_site(use_id).def;
        assert_eq!(binder.def(def).kind, DefKind::Arguments);
        assert_eq!(binder.def(def).funbox, f);
        assert!(binder.funbox(f).uses_arguments);
        assert_eq!(binder.use_site(use_id).cookie.map(|c| c.skip), Some(1));
    }

    #[test]
    fn test_truncate_discards_partial_function() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let outer = binder.declare(x, DefKind::Var, SourcePos::default(), &atoms).unwrap();
        let mark = binder.mark();
        begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        binder.reference(x, SourcePos::new(2, 0)).unwrap();
        binder.truncate(&mark);

        assert_eq!(binder.funbox_count(), 1);
        assert_eq!(binder.use_count(), 0);
        assert_eq!(binder.uses_of(outer).count(), 0);
        assert_eq!(binder.current_funbox(), FunBoxId(0));
    }

    #[test]
    fn test_truncate_restores_open_function_flags() {
        let (mut binder, mut atoms) = setup();
        let script = binder.current_funbox();
        let f = begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        let mark = binder.mark();

        let y = atoms.intern("y");
        let block = binder.push_scope(ScopeKind::Block);
        binder.declare(y, DefKind::Let, SourcePos::default(), &atoms).unwrap();
        binder.pop_scope(block);
        begin(&mut binder, FunctionKind::Arrow, FunctionSyntax::Arrow);
        binder.note_this();
        binder.reference(Atom::ARGUMENTS, SourcePos::default()).unwrap();
        binder.note_dynamic_scope(false);
        binder.end_function().unwrap();
        assert!(binder.funbox(f).uses_this);
        assert!(binder.funbox(f).uses_arguments);
        assert!(binder.funbox(script).dynamic);
        binder.truncate(&mark);

        let fb = binder.funbox(f);
        assert!(!fb.uses_this);
        assert!(!fb.uses_arguments);
        assert_eq!(fb.arguments, None);
        assert_eq!(fb.block_slots, 0);
        assert!(!fb.dynamic);
        assert!(!binder.funbox(script).dynamic);
        assert_eq!(binder.current_funbox(), f);
    }

    #[test]
    fn test_block_let_shadows_earlier_use_in_block() {
        // var x = 1; { x; let x = 2; }
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let outer = binder.declare(x, DefKind::Var, SourcePos::new(1, 4), &atoms).unwrap();
        let block = binder.push_scope(ScopeKind::Block);
        let use_id = binder.reference(x, SourcePos::new(1, 14)).unwrap();
        assert_eq!(binder.use_site(use_id).def, outer);
        let inner = binder.declare(x, DefKind::Let, SourcePos::new(1, 21), &atoms).unwrap();
        binder.pop_scope(block);

        let site = binder.use_site(use_id);
        assert_eq!(site.def, inner);
        assert_eq!(site.cookie, Some(Cookie { skip: 0, slot: Slot::Block(0) }));
        assert_eq!(binder.uses_of(outer).count(), 0);
    }

    #[test]
    fn test_block_let_shadows_use_in_finished_closure() {
        // var x = 1; { var f = function () { return x; }; let x = 2; }
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let outer = binder.declare(x, DefKind::Var, SourcePos::new(1, 4), &atoms).unwrap();
        let block = binder.push_scope(ScopeKind::Block);
        begin(&mut binder, FunctionKind::Normal, FunctionSyntax::Expression);
        let use_id = binder.reference(x, SourcePos::new(1, 44)).unwrap();
        binder.end_function().unwrap();
        assert_eq!(binder.use_site(use_id).def, outer);

        let inner = binder.declare(x, DefKind::Let, SourcePos::new(1, 53), &atoms).unwrap();
        binder.pop_scope(block);

        let site = binder.use_site(use_id);
        assert_eq!(site.def, inner);
        assert_eq!(site.cookie, Some(Cookie { skip: 1, slot: Slot::Block(0) }));

        binder.end_function().unwrap();
        binder.finish_unit(DefKind::Global);
        assert!(binder.def(inner).closed_over);
        assert!(!binder.def(outer).closed_over);
    }

    #[test]
    fn test_block_function_shadows_earlier_call_in_block() {
        // function g(){return 1;} { g(); function g(){return 2;} }
        let (mut binder, mut atoms) = setup();
        let g = atoms.intern("g");
        let outer = binder.declare(g, DefKind::Function, SourcePos::new(1, 9), &atoms).unwrap();
        let block = binder.push_scope(ScopeKind::Block);
        let call = binder.reference(g, SourcePos::new(1, 27)).unwrap();
        let inner = binder.declare(g, DefKind::Function, SourcePos::new(1, 42), &atoms).unwrap();
        binder.pop_scope(block);

        assert_ne!(inner, outer);
        let site = binder.use_site(call);
        assert_eq!(site.def, inner);
        assert_eq!(site.cookie, Some(Cookie { skip: 0, slot: Slot::Block(0) }));
    }

    #[test]
    fn test_block_let_leaves_uses_outside_block_alone() {
        let (mut binder, mut atoms) = setup();
        let x = atoms.intern("x");
        let outer = binder.declare(x, DefKind::Var, SourcePos::default(), &atoms).unwrap();
        let before = binder.reference(x, SourcePos::new(1, 0)).unwrap();
        let first = binder.push_scope(ScopeKind::Block);
        let sibling = binder.reference(x, SourcePos::new(2, 2)).unwrap();
        binder.pop_scope(first);
        let second = binder.push_scope(ScopeKind::Block);
        binder.declare(x, DefKind::Let, SourcePos::new(3, 6), &atoms).unwrap();
        binder.pop_scope(second);

        assert_eq!(binder.use_site(before).def, outer);
        assert_eq!(binder.use_site(sibling).def, outer);
    }

    #[test]
    fn test_unresolved_names_become_global() {
        let (mut binder, mut atoms) = setup();
        let print = atoms.intern("print");
        binder.reference(print, SourcePos::default()).unwrap();
        binder.end_function().unwrap();
        binder.finish_unit(DefKind::Global);
        assert_eq!(binder.free_names(), vec![print]);
        let resolved = binder.resolved_bindings(&atoms);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, "global");
        assert_eq!(resolved[0].decl, None);
    }
}
